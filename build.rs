// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn atoms(required: bool) -> Arg {
    Arg::new("atoms")
        .num_args(0..)
        .required(required)
        .help("Package names, capabilities, paths or version expressions")
}

fn build_cli() -> Command {
    Command::new("kiln")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Kiln Contributors")
        .about("RPM package manager with cached repository metadata")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("/etc/kiln/kiln.toml")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .value_name("PATH")
                .help("Metadata and package cache directory"),
        )
        .arg(
            Arg::new("db_path")
                .short('d')
                .long("db-path")
                .value_name("PATH")
                .help("Installed-package database"),
        )
        .arg(Arg::new("arch").long("arch").value_name("ARCH").help("Machine architecture"))
        .arg(
            Arg::new("assume_yes")
                .short('y')
                .long("assume-yes")
                .action(ArgAction::SetTrue)
                .help("Answer yes to the confirmation prompt"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More log output (-v info, -vv debug)"),
        )
        .subcommand(
            Command::new("search")
                .about("Search package names")
                .arg(Arg::new("term").required(true).help("Case-insensitive substring")),
        )
        .subcommand(Command::new("list").about("List packages matching atoms").arg(atoms(false)))
        .subcommand(Command::new("info").about("Show package details").arg(atoms(false)))
        .subcommand(Command::new("install").about("Install packages").arg(atoms(true)))
        .subcommand(
            Command::new("remove")
                .visible_alias("erase")
                .about("Remove installed packages")
                .arg(atoms(true)),
        )
        .subcommand(
            Command::new("update")
                .visible_alias("up")
                .about("Update installed packages (all if no atoms given)")
                .arg(atoms(false)),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("kiln.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
