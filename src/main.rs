// src/main.rs

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use kiln::command::Command;
use kiln::config::{Config, DEFAULT_CONFIG_PATH};
use kiln::pool::{ArchPolicy, PackageId, Pool};
use kiln::repository::{Fetcher, RefreshStatus, RepoCache, RepoDescriptor, RepoExtensionLoader, Refresher};
use kiln::resolver::{AtomResolver, Job};
use kiln::solver::{DirectEngine, Problem, Resolution, ResolutionEngine, requests_for};
use kiln::transaction::{DbCommitter, DeltaCandidate, RpmStep, Transaction, TransactionOrchestrator};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "RPM package manager with cached repository metadata", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Metadata and package cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Installed-package database
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    /// Machine architecture
    #[arg(long, global = true)]
    arch: Option<String>,

    /// Answer yes to the confirmation prompt
    #[arg(short = 'y', long, global = true)]
    assume_yes: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search package names
    Search {
        /// Case-insensitive substring
        term: String,
    },
    /// List packages matching atoms
    List {
        atoms: Vec<String>,
    },
    /// Show package details
    Info {
        atoms: Vec<String>,
    },
    /// Install packages
    Install {
        #[arg(required = true)]
        atoms: Vec<String>,
    },
    /// Remove installed packages
    #[command(alias = "erase")]
    Remove {
        #[arg(required = true)]
        atoms: Vec<String>,
    },
    /// Update installed packages (all if no atoms given)
    #[command(alias = "up")]
    Update {
        atoms: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Loaded configuration, repositories and package universe
struct Session {
    config: Config,
    pool: Pool,
    repos: Vec<RepoDescriptor>,
    fetcher: Fetcher,
}

fn open_session(cli: &Cli) -> Result<Session> {
    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(path) = &cli.db_path {
        config.db_path = path.clone();
    }
    if let Some(arch) = &cli.arch {
        config.arch = Some(arch.clone());
    }

    let arch = config.arch.as_deref().map(ArchPolicy::new).unwrap_or_else(ArchPolicy::native);
    info!("Machine architecture: {}", arch.arch());
    let mut pool = Pool::new(arch);

    let fetcher = Fetcher::http()?;
    let refresher = Refresher::new(RepoCache::new(&config.cache_dir), fetcher.clone())
        .with_metadata_expire(config.metadata_expire());

    refresher
        .load_system(&mut pool, &config.db_path)
        .context("Failed to read installed packages")?;

    let mut repos = config.repositories()?;
    for report in refresher.refresh_all(&mut pool, &mut repos) {
        match report.status {
            RefreshStatus::Disabled => debug!("{}", report),
            _ => println!("{}", report),
        }
    }

    pool.set_loader(Box::new(RepoExtensionLoader::new(
        RepoCache::new(&config.cache_dir),
        fetcher.clone(),
        repos.iter().cloned(),
    )));
    pool.create_whatprovides();

    Ok(Session {
        config,
        pool,
        repos,
        fetcher,
    })
}

/// Resolve atoms, reporting the ones that match nothing
fn resolve_atoms(pool: &mut Pool, atoms: &[String], command: Command) -> Vec<Job> {
    let mut resolver = AtomResolver::new(pool);
    let mut jobs = Vec::new();
    for atom in atoms {
        let matched = resolver.resolve(atom, command);
        for note in resolver.take_notes() {
            println!("{}", note);
        }
        if matched.is_empty() {
            println!("nothing matches '{}'", atom);
        }
        jobs.extend(matched);
    }
    jobs
}

fn unique_packages(pool: &Pool, jobs: &[Job]) -> Vec<PackageId> {
    let mut seen = Vec::new();
    for job in jobs {
        for id in job.packages(pool) {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }
    seen
}

fn cmd_search(session: &Session, term: &str) -> ExitCode {
    let mut matches = session.pool.search_names(term);
    matches.sort_by(|a, b| {
        let (sa, sb) = (session.pool.solvable(*a), session.pool.solvable(*b));
        sa.name.cmp(&sb.name).then_with(|| a.cmp(b))
    });
    for id in matches {
        let s = session.pool.solvable(id);
        println!(
            "  - {} [{}]: {}",
            s,
            session.pool.repo(id.repo).name,
            s.summary.as_deref().unwrap_or("")
        );
    }
    ExitCode::SUCCESS
}

fn cmd_list(session: &Session, jobs: &[Job], details: bool) -> ExitCode {
    let pool = &session.pool;
    for id in unique_packages(pool, jobs) {
        let s = pool.solvable(id);
        let repo = &pool.repo(id.repo).name;
        if details {
            println!("Name:        {}", s);
            println!("Repo:        {}", repo);
            println!("Summary:     {}", s.summary.as_deref().unwrap_or(""));
            if let Some(url) = &s.url {
                println!("Url:         {}", url);
            }
            println!("License:     {}", s.license.as_deref().unwrap_or(""));
            println!("Description:\n{}", s.description.as_deref().unwrap_or(""));
            println!();
        } else {
            println!("  - {} [{}]", s, repo);
            if let Some(summary) = &s.summary {
                println!("    {}", summary);
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_problems(problems: &[Problem]) {
    for (i, problem) in problems.iter().enumerate() {
        println!("Problem {}/{}:", i + 1, problems.len());
        println!("  {}", problem);
        for (j, solution) in problem.solutions.iter().enumerate() {
            println!("  Solution {}:", j + 1);
            for element in &solution.elements {
                println!("    - {}", element);
            }
        }
        println!();
    }
}

fn print_transaction(pool: &Pool, transaction: &Transaction) {
    println!();
    println!("Transaction summary:");
    println!();
    for group in transaction.classify(pool) {
        println!("{}", group);
        for step in &group.steps {
            println!("  - {}", step.describe(pool));
        }
        println!();
    }
    println!("install size change: {} K", transaction.install_size_change(pool) / 1024);
    println!();
}

fn print_deltas(pool: &Pool, deltas: &[DeltaCandidate]) {
    if deltas.is_empty() {
        return;
    }
    println!("{} delta rpms available:", deltas.len());
    for delta in deltas {
        println!(
            "  - {} from {}",
            pool.solvable(delta.package),
            pool.solvable(delta.base).evr
        );
    }
}

fn confirm() -> Result<bool> {
    let stdin = io::stdin();
    loop {
        print!("OK to continue (y/n)? ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim() {
            "y" | "Y" | "yes" => return Ok(true),
            "n" | "N" | "no" => return Ok(false),
            _ => continue,
        }
    }
}

fn cmd_transaction(mut session: Session, jobs: Vec<Job>, command: Command, assume_yes: bool) -> Result<ExitCode> {
    if jobs.is_empty() && command != Command::Update {
        println!("no package matched.");
        return Ok(ExitCode::from(1));
    }

    let requests = requests_for(&session.pool, command, jobs);
    let mut engine = DirectEngine::new();
    let transaction = match engine.solve(&session.pool, &requests) {
        Resolution::Problems(problems) => {
            print_problems(&problems);
            return Ok(ExitCode::from(1));
        }
        Resolution::Transaction(transaction) => transaction,
    };

    if transaction.is_empty() {
        println!("Nothing to do.");
        return Ok(ExitCode::SUCCESS);
    }

    print_transaction(&session.pool, &transaction);
    if !assume_yes && !confirm()? {
        return Ok(ExitCode::from(1));
    }

    let orchestrator = TransactionOrchestrator::new(
        session.fetcher.clone(),
        session.repos.clone(),
        session.config.cache_dir.join("packages"),
    );

    let to_download = transaction.needs_download();
    if !to_download.is_empty() {
        println!(
            "Downloading {} packages, {} K",
            to_download.len(),
            transaction.download_size(&session.pool) / 1024
        );
    }
    let batch = orchestrator.download(&mut session.pool, &transaction)?;
    let pool = &session.pool;
    print_deltas(pool, &batch.deltas);

    println!("Committing transaction:");
    for step in transaction.steps() {
        match step.kind.rpm_step() {
            RpmStep::Erase => println!("  erase {}", pool.solvable(step.package)),
            RpmStep::Install | RpmStep::MultiInstall => println!("  install {}", pool.solvable(step.package)),
        }
    }

    let mut backend = DbCommitter::new(session.config.db_path.to_string_lossy());
    orchestrator.commit(pool, &transaction, &batch.packages, &mut backend)?;
    println!("Transaction complete.");
    Ok(ExitCode::SUCCESS)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let (command, atoms) = match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "kiln", &mut io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Search { term } => {
            let session = open_session(&cli)?;
            return Ok(cmd_search(&session, term));
        }
        Commands::List { atoms } => (Command::List, atoms.clone()),
        Commands::Info { atoms } => (Command::Info, atoms.clone()),
        Commands::Install { atoms } => (Command::Install, atoms.clone()),
        Commands::Remove { atoms } => (Command::Remove, atoms.clone()),
        Commands::Update { atoms } => (Command::Update, atoms.clone()),
    };

    let mut session = open_session(&cli)?;
    let jobs = resolve_atoms(&mut session.pool, &atoms, command);

    if command.needs_solver() {
        return cmd_transaction(session, jobs, command, cli.assume_yes);
    }

    if jobs.is_empty() {
        println!("no package matched.");
        return Ok(ExitCode::from(1));
    }
    Ok(cmd_list(&session, &jobs, command == Command::Info))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
