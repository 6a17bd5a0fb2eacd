// src/transaction/mod.rs

//! Transaction orchestration
//!
//! Takes the ordered transaction computed by the resolution engine and
//! drives it to completion:
//!
//! 1. Classify steps into reporting groups (pure projection)
//! 2. Select the steps that need a package download
//! 3. Look for delta rpms that could rebuild a package from an installed one
//! 4. Download every needed package; any failure aborts before commit
//! 5. Hand erase/install steps to the commit backend as one batch
//!
//! No rollback is attempted here; a partially applied batch is the commit
//! backend's concern.

pub mod commit;

pub use commit::{CommitBackend, DbCommitter, InstallMode};

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::pool::{DeltaInfo, PackageId, Pool};
use crate::repository::fetch::FetchedFile;
use crate::repository::{FetchOutcome, Fetcher, RepoDescriptor};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Kind of a transaction step
///
/// Declaration order is reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    Erase,
    Reinstall,
    Downgrade,
    /// Same version, different content
    Change,
    Upgrade,
    Install,
    /// Installed alongside other versions of the same name
    MultiInstall,
    VendorChange,
    ArchChange,
}

/// What the package database sees of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpmStep {
    Erase,
    Install,
    MultiInstall,
}

impl StepKind {
    /// Collapse to erase/install: replacing steps are installs in upgrade mode
    pub fn rpm_step(&self) -> RpmStep {
        match self {
            StepKind::Erase => RpmStep::Erase,
            StepKind::MultiInstall => RpmStep::MultiInstall,
            _ => RpmStep::Install,
        }
    }

    pub fn needs_download(&self) -> bool {
        self.rpm_step() != RpmStep::Erase
    }
}

/// One step of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStep {
    /// The package erased or brought in
    pub package: PackageId,
    pub kind: StepKind,
    /// The installed package being replaced, for replacing steps
    pub other: Option<PackageId>,
}

impl TransactionStep {
    /// One-line description for reports
    pub fn describe(&self, pool: &Pool) -> String {
        let new = pool.solvable(self.package);
        match (self.kind, self.other) {
            (StepKind::Upgrade | StepKind::Downgrade, Some(old)) => {
                format!("{} -> {}", pool.solvable(old), new)
            }
            _ => new.to_string(),
        }
    }
}

/// A reporting group of steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGroup {
    pub kind: StepKind,
    /// Vendor or architecture changed from, for change groups
    pub from: Option<String>,
    pub to: Option<String>,
    pub steps: Vec<TransactionStep>,
}

impl fmt::Display for StepGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.steps.len();
        let from = self.from.as_deref().unwrap_or("");
        let to = self.to.as_deref().unwrap_or("");
        match self.kind {
            StepKind::Erase => write!(f, "{} erased packages:", count),
            StepKind::Install => write!(f, "{} installed packages:", count),
            StepKind::MultiInstall => write!(f, "{} multi-installed packages:", count),
            StepKind::Reinstall => write!(f, "{} reinstalled packages:", count),
            StepKind::Downgrade => write!(f, "{} downgraded packages:", count),
            StepKind::Change => write!(f, "{} changed packages:", count),
            StepKind::Upgrade => write!(f, "{} upgraded packages:", count),
            StepKind::VendorChange => write!(f, "{} vendor changes from '{}' to '{}':", count, from, to),
            StepKind::ArchChange => write!(f, "{} arch changes from '{}' to '{}':", count, from, to),
        }
    }
}

/// A delta rpm able to rebuild a new package from an installed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaCandidate {
    pub package: PackageId,
    /// Installed package the delta applies to
    pub base: PackageId,
    pub delta: DeltaInfo,
}

/// The ordered steps computed by the resolution engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    steps: Vec<TransactionStep>,
}

impl Transaction {
    pub fn new(steps: Vec<TransactionStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[TransactionStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Group steps for reporting
    ///
    /// Vendor and architecture changes are grouped per (from, to) pair.
    pub fn classify(&self, pool: &Pool) -> Vec<StepGroup> {
        let mut groups: BTreeMap<(StepKind, Option<String>, Option<String>), Vec<TransactionStep>> =
            BTreeMap::new();

        for step in &self.steps {
            let (from, to) = match (step.kind, step.other) {
                (StepKind::VendorChange, Some(old)) => (
                    pool.solvable(old).vendor.clone(),
                    pool.solvable(step.package).vendor.clone(),
                ),
                (StepKind::ArchChange, Some(old)) => (
                    Some(pool.solvable(old).arch.clone()),
                    Some(pool.solvable(step.package).arch.clone()),
                ),
                _ => (None, None),
            };
            groups.entry((step.kind, from, to)).or_default().push(*step);
        }

        groups
            .into_iter()
            .map(|((kind, from, to), steps)| StepGroup { kind, from, to, steps })
            .collect()
    }

    /// Steps that bring in a package file, in transaction order
    pub fn needs_download(&self) -> Vec<TransactionStep> {
        self.steps
            .iter()
            .filter(|s| s.kind.needs_download())
            .copied()
            .collect()
    }

    /// Net change of installed size in bytes
    pub fn install_size_change(&self, pool: &Pool) -> i64 {
        let size = |id: PackageId| i64::try_from(pool.solvable(id).install_size).unwrap_or(i64::MAX);
        self.steps
            .iter()
            .map(|step| match step.kind {
                StepKind::Erase => -size(step.package),
                _ => size(step.package) - step.other.map(size).unwrap_or(0),
            })
            .sum()
    }

    /// Total size of the packages to download
    pub fn download_size(&self, pool: &Pool) -> u64 {
        self.needs_download()
            .iter()
            .map(|s| pool.solvable(s.package).download_size)
            .sum()
    }

    /// Delta rpms usable for the packages to download
    ///
    /// A delta qualifies when its target matches the new package and its
    /// base matches an installed package of the same name and arch. At most
    /// one candidate is kept per package: the last qualifying delta.
    pub fn delta_candidates(&self, pool: &mut Pool) -> Vec<DeltaCandidate> {
        let Some(installed) = pool.installed() else {
            return Vec::new();
        };
        if pool.repo(installed).solvables.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for step in self.needs_download() {
            let id = step.package;
            let deltas = pool.deltas(id.repo).to_vec();
            let p = pool.solvable(id);

            let mut selected = None;
            for delta in deltas {
                if delta.name != p.name || delta.evr != p.evr || delta.arch != p.arch {
                    continue;
                }
                let mut base = None;
                for installed_id in pool.installed_named(&p.name) {
                    let ip = pool.solvable(installed_id);
                    if ip.arch == p.arch && ip.evr == delta.base_evr {
                        base = Some(installed_id);
                    }
                }
                if let Some(base) = base {
                    debug!("{}: delta from {} available", p, pool.solvable(base).evr);
                    selected = Some(DeltaCandidate {
                        package: id,
                        base,
                        delta,
                    });
                }
            }
            candidates.extend(selected);
        }
        candidates
    }
}

/// A package file ready for commit
#[derive(Debug)]
pub struct DownloadedPackage {
    pub package: PackageId,
    file: PackageFile,
}

#[derive(Debug)]
enum PackageFile {
    Temporary(FetchedFile),
    Kept(PathBuf),
}

impl DownloadedPackage {
    pub fn path(&self) -> &Path {
        match &self.file {
            PackageFile::Temporary(file) => file.path(),
            PackageFile::Kept(path) => path,
        }
    }
}

/// Packages fetched for a transaction and the delta rpms found for them
#[derive(Debug)]
pub struct DownloadBatch {
    /// In transaction order
    pub packages: Vec<DownloadedPackage>,
    pub deltas: Vec<DeltaCandidate>,
}

/// Everything one download needs, detached from the pool
struct DownloadTask {
    package: PackageId,
    repo: RepoDescriptor,
    location: Option<String>,
    checksum: Option<Checksum>,
}

/// Drives downloads and the commit of a transaction
pub struct TransactionOrchestrator {
    fetcher: Fetcher,
    repos: Vec<RepoDescriptor>,
    packages_dir: PathBuf,
}

impl TransactionOrchestrator {
    /// `packages_dir` receives packages of repositories with keeppackages set
    pub fn new(fetcher: Fetcher, repos: Vec<RepoDescriptor>, packages_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            repos,
            packages_dir: packages_dir.into(),
        }
    }

    fn descriptor(&self, id: PackageId) -> Option<&RepoDescriptor> {
        self.repos.iter().find(|d| d.handle == Some(id.repo))
    }

    /// Download every package the transaction brings in
    ///
    /// Delta rpms for the packages are looked up first; they are reported,
    /// the full packages are still fetched. Downloads run in parallel and
    /// the result keeps transaction order. Any missing or unverifiable
    /// package fails the whole batch.
    pub fn download(&self, pool: &mut Pool, transaction: &Transaction) -> Result<DownloadBatch> {
        let deltas = transaction.delta_candidates(pool);
        for candidate in &deltas {
            info!(
                "{}: delta rpm {} from installed {}",
                pool.solvable(candidate.package),
                candidate.delta.location,
                pool.solvable(candidate.base)
            );
        }

        let pool = &*pool;
        let mut tasks = Vec::new();
        for step in transaction.needs_download() {
            let s = pool.solvable(step.package);
            let Some(repo) = self.descriptor(step.package) else {
                return Err(Error::DownloadMissing {
                    alias: pool.repo(step.package.repo).name.clone(),
                    location: s.to_string(),
                });
            };
            tasks.push(DownloadTask {
                package: step.package,
                repo: repo.clone(),
                location: s.location.clone(),
                checksum: s.checksum.clone(),
            });
        }

        if tasks.is_empty() {
            return Ok(DownloadBatch {
                packages: Vec::new(),
                deltas,
            });
        }
        info!("Downloading {} packages", tasks.len());

        let results: Vec<Result<DownloadedPackage>> =
            tasks.into_par_iter().map(|task| self.download_one(task)).collect();
        Ok(DownloadBatch {
            packages: results.into_iter().collect::<Result<_>>()?,
            deltas,
        })
    }

    fn download_one(&self, task: DownloadTask) -> Result<DownloadedPackage> {
        let missing = |location: &str| Error::DownloadMissing {
            alias: task.repo.name.clone(),
            location: location.to_string(),
        };
        let location = task.location.as_deref().ok_or_else(|| missing("<no location>"))?;

        let file = match self
            .fetcher
            .fetch(&task.repo, location, false, task.checksum.as_ref())
        {
            FetchOutcome::Fetched(file) => file,
            FetchOutcome::Absent => return Err(missing(location)),
            FetchOutcome::Failed(failure) => {
                warn!("{}", failure);
                return Err(missing(location));
            }
        };

        let file = if task.repo.keeppackages {
            let name = Path::new(location)
                .file_name()
                .ok_or_else(|| missing(location))?;
            let dest = self.packages_dir.join(&task.repo.alias).join(name);
            PackageFile::Kept(file.persist(&dest)?)
        } else {
            PackageFile::Temporary(file)
        };

        Ok(DownloadedPackage {
            package: task.package,
            file,
        })
    }

    /// Submit the transaction to the commit backend
    ///
    /// Conflicts found by the check pass abort before anything is applied.
    /// Problems reported while running are returned verbatim.
    pub fn commit(
        &self,
        pool: &Pool,
        transaction: &Transaction,
        downloads: &[DownloadedPackage],
        backend: &mut dyn CommitBackend,
    ) -> Result<()> {
        let files: HashMap<PackageId, &Path> = downloads.iter().map(|d| (d.package, d.path())).collect();

        for step in transaction.steps() {
            let s = pool.solvable(step.package);
            match step.kind.rpm_step() {
                RpmStep::Erase => {
                    let id = s.installed_id.ok_or_else(|| {
                        Error::CommitFailure(vec![format!(
                            "internal error: installed package {} has no database id",
                            s
                        )])
                    })?;
                    backend.add_erase(id)?;
                }
                RpmStep::Install | RpmStep::MultiInstall => {
                    let path = files.get(&step.package).ok_or_else(|| Error::DownloadMissing {
                        alias: pool.repo(step.package.repo).name.clone(),
                        location: s.location.clone().unwrap_or_else(|| s.to_string()),
                    })?;
                    let mode = if step.kind.rpm_step() == RpmStep::MultiInstall {
                        InstallMode::Install
                    } else {
                        InstallMode::Upgrade
                    };
                    let replaces = step.other.and_then(|o| pool.solvable(o).installed_id);
                    backend.add_install(path, &pool.repo(step.package.repo).name, mode, replaces)?;
                }
            }
        }

        let conflicts = backend.check()?;
        if !conflicts.is_empty() {
            return Err(Error::CommitConflict(conflicts));
        }

        let problems = backend.run()?;
        if !problems.is_empty() {
            return Err(Error::CommitFailure(problems));
        }
        Ok(())
    }

    /// Download, then commit; returns the delta rpms found on the way
    pub fn execute(
        &self,
        pool: &mut Pool,
        transaction: &Transaction,
        backend: &mut dyn CommitBackend,
    ) -> Result<Vec<DeltaCandidate>> {
        let batch = self.download(pool, transaction)?;
        self.commit(pool, transaction, &batch.packages, backend)?;
        Ok(batch.deltas)
    }
}
