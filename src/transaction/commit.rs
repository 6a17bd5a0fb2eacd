// src/transaction/commit.rs

//! Commit backends
//!
//! A commit backend receives the erase and install steps of a transaction
//! as one batch, checks it, and applies it. `DbCommitter` applies the batch
//! to the installed-package database.

use crate::db::{self, models::*, system};
use crate::error::Result;
use crate::packages::RpmHeader;
use crate::pool::{Dependency, Solvable};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// How an install step treats installed packages of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Replace installed packages of the same name and arch
    Upgrade,
    /// Install alongside them
    Install,
}

/// Receives a transaction batch and applies it
pub trait CommitBackend {
    /// Queue removal of the installed package with database id `installed_id`
    fn add_erase(&mut self, installed_id: i64) -> Result<()>;

    /// Queue the package file at `path`, downloaded from `repo`
    ///
    /// `replaces` names the installed package an upgrade-type step replaces.
    fn add_install(&mut self, path: &Path, repo: &str, mode: InstallMode, replaces: Option<i64>) -> Result<()>;

    /// Check the queued batch; any returned problem means nothing is applied
    fn check(&mut self) -> Result<Vec<String>>;

    /// Apply the queued batch, returning problems encountered while running
    fn run(&mut self) -> Result<Vec<String>>;
}

/// Problem found while checking a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitProblem {
    /// Erase of a package that is not installed
    NotInstalled { id: i64 },
    /// Side-by-side install of an exact version already present
    AlreadyInstalled { package: String },
    /// File already owned by an installed package that stays
    FileOwnedByOther { path: String, package: String, owner: String },
    /// Two packages of the batch ship the same file
    FileInBatch { path: String, package: String, other: String },
    /// Requirement of an incoming package nobody provides
    Unresolved { dep: String, package: String },
    /// Requirement of a remaining package only the erased ones provided
    BrokenByErase { dep: String, package: String },
}

impl fmt::Display for CommitProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitProblem::NotInstalled { id } => write!(f, "package with database id {} is not installed", id),
            CommitProblem::AlreadyInstalled { package } => write!(f, "package {} is already installed", package),
            CommitProblem::FileOwnedByOther { path, package, owner } => write!(
                f,
                "file {} from install of {} conflicts with file from package {}",
                path, package, owner
            ),
            CommitProblem::FileInBatch { path, package, other } => write!(
                f,
                "file {} conflicts between attempted installs of {} and {}",
                path, other, package
            ),
            CommitProblem::Unresolved { dep, package } => write!(f, "{} is needed by {}", dep, package),
            CommitProblem::BrokenByErase { dep, package } => {
                write!(f, "{} is needed by (installed) {}", dep, package)
            }
        }
    }
}

struct PendingInstall {
    header: RpmHeader,
    repo: String,
    mode: InstallMode,
    replaces: Option<i64>,
}

/// Applies batches to the installed-package database
pub struct DbCommitter {
    db_path: String,
    erases: Vec<i64>,
    installs: Vec<PendingInstall>,
}

impl DbCommitter {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            erases: Vec::new(),
            installs: Vec::new(),
        }
    }

    /// Installed ids that leave the database when the batch is applied
    fn removed_ids(&self, installed: &[Solvable]) -> HashSet<i64> {
        let mut removed: HashSet<i64> = self.erases.iter().copied().collect();
        for install in &self.installs {
            let pkg = &install.header.package;
            removed.extend(install.replaces);
            for s in installed {
                let same_slot = s.name == pkg.name && s.arch == pkg.arch;
                let replaced = match install.mode {
                    InstallMode::Upgrade => same_slot,
                    InstallMode::Install => false,
                };
                if replaced {
                    removed.extend(s.installed_id);
                }
            }
        }
        removed
    }

    fn check_batch(&self, conn: &rusqlite::Connection) -> Result<Vec<CommitProblem>> {
        let installed = system::read_installed(conn)?;
        let by_id: HashMap<i64, &Solvable> = installed
            .iter()
            .filter_map(|s| s.installed_id.map(|id| (id, s)))
            .collect();
        let removed = self.removed_ids(&installed);
        let mut problems = Vec::new();

        for &id in &self.erases {
            if !by_id.contains_key(&id) {
                problems.push(CommitProblem::NotInstalled { id });
            }
        }

        for install in &self.installs {
            let pkg = &install.header.package;
            if install.mode == InstallMode::Install
                && InstalledPackage::find_exact(conn, &pkg.name, &pkg.evr, &pkg.arch)?.is_some()
            {
                problems.push(CommitProblem::AlreadyInstalled {
                    package: pkg.to_string(),
                });
            }
        }

        // File ownership
        let mut batch_owner: HashMap<&str, &Solvable> = HashMap::new();
        for install in &self.installs {
            let pkg = &install.header.package;
            for path in install.header.regular_files() {
                if let Some(other) = batch_owner.get(path)
                    && other.name != pkg.name
                {
                    problems.push(CommitProblem::FileInBatch {
                        path: path.to_string(),
                        package: pkg.to_string(),
                        other: other.to_string(),
                    });
                }
                batch_owner.insert(path, pkg);

                for entry in FileEntry::find_by_path(conn, path)? {
                    if removed.contains(&entry.package_id) {
                        continue;
                    }
                    if let Some(owner) = by_id.get(&entry.package_id)
                        && owner.name != pkg.name
                    {
                        problems.push(CommitProblem::FileOwnedByOther {
                            path: path.to_string(),
                            package: pkg.to_string(),
                            owner: owner.to_string(),
                        });
                    }
                }
            }
        }

        // Dependencies against the state after the batch
        let before: Vec<&Solvable> = installed.iter().collect();
        let remaining: Vec<&Solvable> = installed
            .iter()
            .filter(|s| s.installed_id.is_none_or(|id| !removed.contains(&id)))
            .collect();
        let mut after = remaining.clone();
        after.extend(self.installs.iter().map(|i| &i.header.package));

        for install in &self.installs {
            let pkg = &install.header.package;
            for dep in pkg.requires.iter().filter(|d| !is_rpmlib(d)) {
                if !satisfied(dep, &after) {
                    problems.push(CommitProblem::Unresolved {
                        dep: dep.to_string(),
                        package: pkg.to_string(),
                    });
                }
            }
        }

        if !removed.is_empty() {
            for s in &remaining {
                for dep in s.requires.iter().filter(|d| !is_rpmlib(d)) {
                    if satisfied(dep, &before) && !satisfied(dep, &after) {
                        problems.push(CommitProblem::BrokenByErase {
                            dep: dep.to_string(),
                            package: s.to_string(),
                        });
                    }
                }
            }
        }

        Ok(problems)
    }

    fn describe(&self, by_id: &HashMap<i64, String>) -> String {
        let mut parts: Vec<String> = self
            .installs
            .iter()
            .map(|i| format!("install {}", i.header.package))
            .collect();
        parts.extend(self.erases.iter().map(|id| {
            let name = by_id.get(id).cloned().unwrap_or_else(|| format!("#{}", id));
            format!("erase {}", name)
        }));
        parts.join(", ")
    }
}

fn is_rpmlib(dep: &Dependency) -> bool {
    dep.name.starts_with("rpmlib(")
}

fn satisfied(dep: &Dependency, packages: &[&Solvable]) -> bool {
    let wanted = dep
        .evr
        .as_deref()
        .filter(|_| !dep.flags.is_empty())
        .map(crate::version::Evr::parse);

    packages.iter().any(|s| {
        let by_name = s.name == dep.name
            && wanted
                .as_ref()
                .is_none_or(|w| dep.flags.accepts(s.parsed_evr().compare_match(w)));
        let by_provide = s.provides.iter().any(|p| {
            p.name == dep.name && wanted.as_ref().is_none_or(|w| p.provides_match(dep.flags, w))
        });
        let by_file = dep.name.starts_with('/') && s.files.iter().any(|f| *f == dep.name);
        by_name || by_provide || by_file
    })
}

impl CommitBackend for DbCommitter {
    fn add_erase(&mut self, installed_id: i64) -> Result<()> {
        self.erases.push(installed_id);
        Ok(())
    }

    fn add_install(&mut self, path: &Path, repo: &str, mode: InstallMode, replaces: Option<i64>) -> Result<()> {
        let header = RpmHeader::read(path)?;
        debug!("Queued {} ({:?})", header.package, mode);
        self.installs.push(PendingInstall {
            header,
            repo: repo.to_string(),
            mode,
            replaces,
        });
        Ok(())
    }

    fn check(&mut self) -> Result<Vec<String>> {
        db::init(&self.db_path)?;
        let conn = db::open(&self.db_path)?;
        let problems = self.check_batch(&conn)?;
        for problem in &problems {
            warn!("{}", problem);
        }
        Ok(problems.iter().map(|p| p.to_string()).collect())
    }

    fn run(&mut self) -> Result<Vec<String>> {
        db::init(&self.db_path)?;
        let mut conn = db::open(&self.db_path)?;

        let names: HashMap<i64, String> = InstalledPackage::list_all(&conn)?
            .into_iter()
            .filter_map(|p| p.id.map(|id| (id, format!("{}-{}.{}", p.name, p.evr, p.arch))))
            .collect();
        let description = self.describe(&names);

        let result = db::transaction(&mut conn, |tx| {
            let mut changeset = Changeset::new(description.clone());
            let changeset_id = changeset.insert(tx)?;

            for &id in &self.erases {
                InstalledPackage::delete(tx, id)?;
            }

            for install in &self.installs {
                let pkg = &install.header.package;
                if let Some(id) = install.replaces {
                    InstalledPackage::delete(tx, id)?;
                }
                if install.mode == InstallMode::Upgrade {
                    for old in InstalledPackage::find_by_name(tx, &pkg.name)? {
                        if old.arch == pkg.arch
                            && let Some(id) = old.id
                        {
                            InstalledPackage::delete(tx, id)?;
                        }
                    }
                }

                let files: Vec<String> = install.header.files.iter().map(|f| f.path.clone()).collect();
                system::record_install(tx, pkg, Some(&install.repo), changeset_id, &files)?;
            }

            changeset.update_status(tx, ChangesetStatus::Applied)?;
            Ok(changeset_id)
        });

        match result {
            Ok(changeset_id) => {
                db::checkpoint(&conn)?;
                info!(
                    "Changeset {} applied: {} installed, {} erased",
                    changeset_id,
                    self.installs.len(),
                    self.erases.len()
                );
                self.erases.clear();
                self.installs.clear();
                Ok(Vec::new())
            }
            Err(e) => {
                warn!("Commit failed: {}", e);
                let mut failed = Changeset::new(description);
                failed.insert(&conn)?;
                failed.update_status(&conn, ChangesetStatus::Failed)?;
                Ok(vec![e.to_string()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::rpm::tests::build_rpm;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        db_path: String,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db_path = dir.path().join("kiln.db").to_str().unwrap().to_string();
            db::init(&db_path).unwrap();
            Self { dir, db_path }
        }

        fn rpm(&self, name: &str, version: &str, requires: &[&str], files: &[&str]) -> std::path::PathBuf {
            build_rpm(self.dir.path(), name, version, "1", requires, files)
        }

        fn installed(&self) -> Vec<InstalledPackage> {
            let conn = db::open(&self.db_path).unwrap();
            InstalledPackage::list_all(&conn).unwrap()
        }

        fn install(&self, path: &Path) {
            let mut committer = DbCommitter::new(&self.db_path);
            committer.add_install(path, "main", InstallMode::Upgrade, None).unwrap();
            assert!(committer.check().unwrap().is_empty());
            assert!(committer.run().unwrap().is_empty());
        }

        fn id_of(&self, name: &str) -> i64 {
            self.installed()
                .into_iter()
                .find(|p| p.name == name)
                .and_then(|p| p.id)
                .unwrap()
        }
    }

    #[test]
    fn test_install_records_package_and_files() {
        let fx = Fixture::new();
        fx.install(&fx.rpm("foo", "1.0", &[], &["/usr/bin/foo"]));

        let installed = fx.installed();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].evr, "1.0-1");
        assert_eq!(installed[0].from_repo.as_deref(), Some("main"));

        let conn = db::open(&fx.db_path).unwrap();
        let owners = FileEntry::find_by_path(&conn, "/usr/bin/foo").unwrap();
        assert_eq!(owners.len(), 1);

        let (status, description): (String, String) = conn
            .query_row(
                "SELECT status, description FROM changesets ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, ChangesetStatus::Applied.as_str());
        assert!(description.contains("install foo-1.0-1.x86_64"));
    }

    #[test]
    fn test_upgrade_replaces_same_name_and_arch() {
        let fx = Fixture::new();
        fx.install(&fx.rpm("foo", "1.0", &[], &["/usr/bin/foo"]));
        fx.install(&fx.rpm("foo", "2.0", &[], &["/usr/bin/foo"]));

        let installed = fx.installed();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].evr, "2.0-1");
    }

    #[test]
    fn test_file_owned_by_other_package_conflicts() {
        let fx = Fixture::new();
        fx.install(&fx.rpm("foo", "1.0", &[], &["/usr/bin/tool"]));

        let mut committer = DbCommitter::new(&fx.db_path);
        committer
            .add_install(&fx.rpm("bar", "1.0", &[], &["/usr/bin/tool"]), "main", InstallMode::Upgrade, None)
            .unwrap();
        let problems = committer.check().unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("/usr/bin/tool"));
        assert!(problems[0].contains("foo-1.0-1.x86_64"));
    }

    #[test]
    fn test_file_conflict_inside_batch() {
        let fx = Fixture::new();
        let mut committer = DbCommitter::new(&fx.db_path);
        for name in ["left", "right"] {
            committer
                .add_install(&fx.rpm(name, "1.0", &[], &["/etc/shared.conf"]), "main", InstallMode::Upgrade, None)
                .unwrap();
        }
        let problems = committer.check().unwrap();
        assert_eq!(
            problems,
            vec!["file /etc/shared.conf conflicts between attempted installs of left-1.0-1.x86_64 and right-1.0-1.x86_64"]
        );
    }

    #[test]
    fn test_unresolved_requirement() {
        let fx = Fixture::new();
        let mut committer = DbCommitter::new(&fx.db_path);
        committer
            .add_install(&fx.rpm("bar", "1.0", &["libmissing"], &[]), "main", InstallMode::Upgrade, None)
            .unwrap();
        assert_eq!(committer.check().unwrap(), vec!["libmissing is needed by bar-1.0-1.x86_64"]);
    }

    #[test]
    fn test_erase_breaking_installed_dependent() {
        let fx = Fixture::new();
        fx.install(&fx.rpm("foo", "1.0", &[], &["/usr/lib/libfoo.so"]));
        fx.install(&fx.rpm("baz", "1.0", &["foo"], &[]));

        let mut committer = DbCommitter::new(&fx.db_path);
        committer.add_erase(fx.id_of("foo")).unwrap();
        assert_eq!(committer.check().unwrap(), vec!["foo is needed by (installed) baz-1.0-1.x86_64"]);
    }

    #[test]
    fn test_erase_removes_package() {
        let fx = Fixture::new();
        fx.install(&fx.rpm("foo", "1.0", &[], &["/usr/bin/foo"]));

        let mut committer = DbCommitter::new(&fx.db_path);
        committer.add_erase(fx.id_of("foo")).unwrap();
        assert!(committer.check().unwrap().is_empty());
        assert!(committer.run().unwrap().is_empty());
        assert!(fx.installed().is_empty());

        let conn = db::open(&fx.db_path).unwrap();
        assert!(FileEntry::find_by_path(&conn, "/usr/bin/foo").unwrap().is_empty());
    }

    #[test]
    fn test_multi_install_of_installed_version() {
        let fx = Fixture::new();
        let path = fx.rpm("kernel", "6.1", &[], &["/boot/vmlinuz-6.1"]);
        fx.install(&path);

        let mut committer = DbCommitter::new(&fx.db_path);
        committer.add_install(&path, "main", InstallMode::Install, None).unwrap();
        assert_eq!(
            committer.check().unwrap(),
            vec!["package kernel-6.1-1.x86_64 is already installed"]
        );
    }

    #[test]
    fn test_erase_of_unknown_id() {
        let fx = Fixture::new();
        let mut committer = DbCommitter::new(&fx.db_path);
        committer.add_erase(42).unwrap();
        assert_eq!(committer.check().unwrap(), vec!["package with database id 42 is not installed"]);
    }
}
