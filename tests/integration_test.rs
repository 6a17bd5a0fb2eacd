// tests/integration_test.rs

//! Integration tests for Kiln
//!
//! These tests drive the whole pipeline against a `file://` rpm-md
//! repository: refresh, atom resolution, the direct engine, download and
//! commit into the installed-package database.

use flate2::Compression;
use flate2::write::GzEncoder;
use kiln::command::Command;
use kiln::db;
use kiln::db::models::{FileEntry, InstalledPackage};
use kiln::pool::{ArchPolicy, Pool};
use kiln::repository::{Fetcher, RefreshStatus, RepoCache, RepoDescriptor, Refresher};
use kiln::resolver::AtomResolver;
use kiln::solver::{DirectEngine, Resolution, ResolutionEngine, requests_for};
use kiln::transaction::{DbCommitter, DeltaCandidate, StepKind, Transaction, TransactionOrchestrator};
use kiln::Error;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A package published in the test repository
struct Published {
    name: &'static str,
    version: &'static str,
    requires: &'static [&'static str],
    files: &'static [&'static str],
}

const FOO: Published = Published {
    name: "foo",
    version: "1.0",
    requires: &[],
    files: &["/usr/bin/foo"],
};

const BAR: Published = Published {
    name: "bar",
    version: "2.0",
    requires: &["foo"],
    files: &["/usr/bin/bar"],
};

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn build_rpm(work: &Path, out: &Path, pkg: &Published) -> PathBuf {
    let mut builder = rpm::PackageBuilder::new(pkg.name, pkg.version, "MIT", "x86_64", "test package")
        .release("1")
        .vendor("Example");
    for req in pkg.requires {
        builder = builder.requires(rpm::Dependency::any(*req));
    }
    for (i, file) in pkg.files.iter().enumerate() {
        let source = work.join(format!("{}-payload-{}", pkg.name, i));
        fs::write(&source, format!("content of {}", file)).unwrap();
        builder = builder.with_file(&source, rpm::FileOptions::new(*file)).unwrap();
    }
    let package = builder.build().unwrap();

    let path = out.join(format!("{}-{}-1.x86_64.rpm", pkg.name, pkg.version));
    let mut file = File::create(&path).unwrap();
    package.write(&mut file).unwrap();
    path
}

fn primary_record(pkg: &Published, location: &str, checksum: &str, size: u64) -> String {
    let requires: String = pkg
        .requires
        .iter()
        .map(|r| format!("      <rpm:entry name=\"{}\"/>\n", r))
        .collect();
    let files: String = pkg
        .files
        .iter()
        .map(|f| format!("    <file>{}</file>\n", f))
        .collect();
    format!(
        r#"<package type="rpm">
  <name>{name}</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="{ver}" rel="1"/>
  <checksum type="sha256" pkgid="YES">{checksum}</checksum>
  <summary>{name} test package</summary>
  <size package="{size}" installed="{size}" archive="{size}"/>
  <location href="{location}"/>
  <format>
    <rpm:provides>
      <rpm:entry name="{name}" flags="EQ" epoch="0" ver="{ver}" rel="1"/>
    </rpm:provides>
    <rpm:requires>
{requires}    </rpm:requires>
{files}  </format>
</package>
"#,
        name = pkg.name,
        ver = pkg.version,
    )
}

/// Publish `packages` as an rpm-md repository under `root`; a package
/// listed in `unpublished` appears in the metadata without its file
fn write_repository(work: &Path, root: &Path, packages: &[&Published], unpublished: &[&Published]) {
    let pkg_dir = root.join("Packages");
    fs::create_dir_all(&pkg_dir).unwrap();
    fs::create_dir_all(root.join("repodata")).unwrap();

    let mut records = String::new();
    for pkg in packages {
        let path = build_rpm(work, &pkg_dir, pkg);
        let data = fs::read(&path).unwrap();
        let location = format!("Packages/{}", path.file_name().unwrap().to_string_lossy());
        records.push_str(&primary_record(pkg, &location, &sha256_hex(&data), data.len() as u64));
    }
    for pkg in unpublished {
        let location = format!("Packages/{}-{}-1.x86_64.rpm", pkg.name, pkg.version);
        records.push_str(&primary_record(pkg, &location, &sha256_hex(b"gone"), 4));
    }

    let primary = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="{}">
{}</metadata>"#,
        packages.len() + unpublished.len(),
        records
    );
    let primary = gzip(primary.as_bytes());
    fs::write(root.join("repodata/primary.xml.gz"), &primary).unwrap();

    let repomd = format!(
        r#"<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1</revision>
  <data type="primary">
    <checksum type="sha256">{}</checksum>
    <location href="repodata/primary.xml.gz"/>
  </data>
</repomd>"#,
        sha256_hex(&primary)
    );
    fs::write(root.join("repodata/repomd.xml"), repomd).unwrap();
}

/// Temporary system root: remote repository, cache and database
struct TestSystem {
    dir: TempDir,
}

impl TestSystem {
    fn new(packages: &[&Published], unpublished: &[&Published]) -> Self {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        write_repository(&work, &dir.path().join("remote"), packages, unpublished);
        Self { dir }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("var/lib/kiln/kiln.db")
    }

    fn refresher(&self) -> Refresher {
        Refresher::new(RepoCache::new(self.dir.path().join("cache")), Fetcher::http().unwrap())
    }

    fn descriptor(&self) -> RepoDescriptor {
        RepoDescriptor::new("main", format!("file://{}", self.dir.path().join("remote").display()))
    }

    /// Load the installed database and the repository into a fresh pool
    fn open(&self) -> (Pool, Vec<RepoDescriptor>, Vec<RefreshStatus>) {
        let refresher = self.refresher();
        let mut pool = Pool::new(ArchPolicy::new("x86_64"));
        refresher.load_system(&mut pool, &self.db_path()).unwrap();

        let mut repos = vec![self.descriptor()];
        let statuses = refresher
            .refresh_all(&mut pool, &mut repos)
            .into_iter()
            .map(|r| r.status)
            .collect();
        pool.create_whatprovides();
        (pool, repos, statuses)
    }

    fn plan(&self, pool: &mut Pool, atoms: &[&str], command: Command) -> Transaction {
        let jobs = AtomResolver::new(pool)
            .resolve_all(atoms, command)
            .into_iter()
            .flat_map(|(_, jobs)| jobs)
            .collect();
        let requests = requests_for(pool, command, jobs);
        match DirectEngine::new().solve(pool, &requests) {
            Resolution::Transaction(transaction) => transaction,
            Resolution::Problems(problems) => panic!("unexpected problems: {:?}", problems),
        }
    }

    fn execute(
        &self,
        pool: &mut Pool,
        repos: Vec<RepoDescriptor>,
        transaction: &Transaction,
    ) -> kiln::Result<Vec<DeltaCandidate>> {
        let orchestrator =
            TransactionOrchestrator::new(Fetcher::http().unwrap(), repos, self.dir.path().join("cache/packages"));
        let mut backend = DbCommitter::new(self.db_path().to_string_lossy());
        orchestrator.execute(pool, transaction, &mut backend)
    }

    fn installed_names(&self) -> Vec<String> {
        let conn = db::open(&self.db_path().to_string_lossy()).unwrap();
        let mut names: Vec<String> = InstalledPackage::list_all(&conn)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        names
    }
}

#[test]
fn test_install_from_file_repository() {
    let system = TestSystem::new(&[&FOO, &BAR], &[]);
    let (mut pool, repos, statuses) = system.open();
    assert_eq!(statuses, vec![RefreshStatus::Fetched { cached: true }]);

    let transaction = system.plan(&mut pool, &["foo"], Command::Install);
    assert_eq!(transaction.steps().len(), 1);
    assert_eq!(transaction.steps()[0].kind, StepKind::Install);

    system.execute(&mut pool, repos, &transaction).unwrap();
    assert_eq!(system.installed_names(), vec!["foo"]);

    let conn = db::open(&system.db_path().to_string_lossy()).unwrap();
    let owners = FileEntry::find_by_path(&conn, "/usr/bin/foo").unwrap();
    assert_eq!(owners.len(), 1);
}

#[test]
fn test_second_session_uses_cache_and_sees_installed() {
    let system = TestSystem::new(&[&FOO], &[]);
    let (mut pool, repos, _) = system.open();
    let transaction = system.plan(&mut pool, &["foo"], Command::Install);
    system.execute(&mut pool, repos, &transaction).unwrap();

    let (pool, _, statuses) = system.open();
    assert_eq!(statuses, vec![RefreshStatus::Cached]);
    assert_eq!(pool.installed_named("foo").len(), 1);
}

#[test]
fn test_install_with_dependency_together() {
    let system = TestSystem::new(&[&FOO, &BAR], &[]);
    let (mut pool, repos, _) = system.open();

    let transaction = system.plan(&mut pool, &["foo", "bar"], Command::Install);
    system.execute(&mut pool, repos, &transaction).unwrap();
    assert_eq!(system.installed_names(), vec!["bar", "foo"]);
}

#[test]
fn test_unmet_requirement_aborts_commit() {
    let system = TestSystem::new(&[&FOO, &BAR], &[]);
    let (mut pool, repos, _) = system.open();

    let transaction = system.plan(&mut pool, &["bar"], Command::Install);
    match system.execute(&mut pool, repos, &transaction) {
        Err(Error::CommitConflict(problems)) => {
            assert!(problems.iter().any(|p| p.contains("is needed by")), "{:?}", problems);
        }
        other => panic!("expected commit conflict, got {:?}", other),
    }
    assert!(system.installed_names().is_empty());
}

#[test]
fn test_missing_package_file_aborts_download() {
    let system = TestSystem::new(&[&FOO], &[&BAR]);
    let (mut pool, repos, _) = system.open();

    let transaction = system.plan(&mut pool, &["foo", "bar"], Command::Install);
    match system.execute(&mut pool, repos, &transaction) {
        Err(Error::DownloadMissing { alias, location }) => {
            assert_eq!(alias, "main");
            assert_eq!(location, "Packages/bar-2.0-1.x86_64.rpm");
        }
        other => panic!("expected missing download, got {:?}", other),
    }
    assert!(!system.db_path().exists() || system.installed_names().is_empty());
}

#[test]
fn test_remove_installed_package() {
    let system = TestSystem::new(&[&FOO], &[]);
    let (mut pool, repos, _) = system.open();
    let transaction = system.plan(&mut pool, &["foo"], Command::Install);
    system.execute(&mut pool, repos, &transaction).unwrap();

    let (mut pool, repos, _) = system.open();
    let transaction = system.plan(&mut pool, &["foo"], Command::Remove);
    assert_eq!(transaction.steps().len(), 1);
    assert_eq!(transaction.steps()[0].kind, StepKind::Erase);
    assert!(transaction.needs_download().is_empty());

    system.execute(&mut pool, repos, &transaction).unwrap();
    assert!(system.installed_names().is_empty());
}

#[test]
fn test_database_init_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested/path/to/kiln.db");

    db::init(&db_path.to_string_lossy()).unwrap();
    assert!(db_path.exists(), "Database should exist in nested path");

    let conn = db::open(&db_path.to_string_lossy()).unwrap();
    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
    assert_eq!(foreign_keys, 1, "Foreign keys should be enabled");
}
