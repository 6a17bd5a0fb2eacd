// src/pool/mod.rs

//! The package universe handed to the resolution engine
//!
//! A [`Pool`] owns one [`Repo`] per repository plus the installed-system
//! repository. Each repo owns its [`Solvable`]s. Extension data (complete
//! file lists and delta information) is attached lazily: a repo carries
//! [`ExtensionStub`]s, and the first time such data is dereferenced the pool
//! invokes its registered [`StubLoader`].

pub mod arch;

pub use arch::ArchPolicy;

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::version::Evr;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use tracing::{debug, warn};

bitflags! {
    /// Relation operators; combinable, so `GT | EQ` is `>=`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RelFlags: u8 {
        const LT = 0b001;
        const EQ = 0b010;
        const GT = 0b100;
    }
}

impl RelFlags {
    /// Parse an operator made of `<`, `=` and `>` characters
    pub fn from_operator(op: &str) -> Option<Self> {
        let mut flags = RelFlags::empty();
        for c in op.chars() {
            match c {
                '<' => flags |= RelFlags::LT,
                '=' => flags |= RelFlags::EQ,
                '>' => flags |= RelFlags::GT,
                _ => return None,
            }
        }
        (!flags.is_empty()).then_some(flags)
    }

    /// True if an ordering `candidate <=> constraint` satisfies the relation
    pub fn accepts(&self, ord: Ordering) -> bool {
        match ord {
            Ordering::Less => self.contains(RelFlags::LT),
            Ordering::Equal => self.contains(RelFlags::EQ),
            Ordering::Greater => self.contains(RelFlags::GT),
        }
    }

    pub fn as_operator(&self) -> &'static str {
        const LT_EQ: u8 = RelFlags::LT.bits() | RelFlags::EQ.bits();
        const GT_EQ: u8 = RelFlags::GT.bits() | RelFlags::EQ.bits();
        const LT_GT: u8 = RelFlags::LT.bits() | RelFlags::GT.bits();
        match self.bits() {
            0b001 => "<",
            0b010 => "=",
            0b100 => ">",
            LT_EQ => "<=",
            GT_EQ => ">=",
            LT_GT => "!=",
            _ => "<=>",
        }
    }
}

/// A capability: provides, requires, conflicts or obsoletes entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub flags: RelFlags,
    pub evr: Option<String>,
}

impl Dependency {
    /// Unversioned capability
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: RelFlags::empty(),
            evr: None,
        }
    }

    /// Versioned capability
    pub fn versioned(name: impl Into<String>, flags: RelFlags, evr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags,
            evr: Some(evr.into()),
        }
    }

    /// Does this provide satisfy `flags evr`?
    ///
    /// Unversioned provides satisfy every constraint. Ranged provides are
    /// accepted as overlapping.
    pub fn provides_match(&self, flags: RelFlags, evr: &Evr) -> bool {
        match &self.evr {
            None => true,
            Some(mine) if self.flags == RelFlags::EQ => {
                flags.accepts(Evr::parse(mine).compare_match(evr))
            }
            Some(_) => true,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.evr {
            Some(evr) if !self.flags.is_empty() => {
                write!(f, "{} {} {}", self.name, self.flags.as_operator(), evr)
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Index of a repository inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(pub usize);

/// Stable identity of a package: its repository and position in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub repo: RepoId,
    pub index: usize,
}

/// A package record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solvable {
    pub name: String,
    pub evr: String,
    pub arch: String,
    pub vendor: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub obsoletes: Vec<Dependency>,
    /// Files listed in the primary metadata (indexed as provides)
    pub files: Vec<String>,
    /// Complete file list from the file-list extension
    #[serde(skip)]
    pub filelist: Vec<String>,
    pub location: Option<String>,
    pub checksum: Option<Checksum>,
    pub download_size: u64,
    pub install_size: u64,
    /// Row id in the installed-package database
    pub installed_id: Option<i64>,
}

impl Solvable {
    pub fn new(name: impl Into<String>, evr: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            evr: evr.into(),
            arch: arch.into(),
            ..Default::default()
        }
    }

    pub fn parsed_evr(&self) -> Evr {
        Evr::parse(&self.evr)
    }

    /// Files to search: the complete list when loaded, else the primary subset
    pub fn all_files(&self) -> &[String] {
        if self.filelist.is_empty() {
            &self.files
        } else {
            &self.filelist
        }
    }
}

impl fmt::Display for Solvable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.evr, self.arch)
    }
}

/// Kinds of lazily loaded extension data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtensionKind {
    FileLists,
    DeltaInfo,
}

impl ExtensionKind {
    /// Short identifier used in cache file names
    pub const fn id(&self) -> &'static str {
        match self {
            Self::FileLists => "FL",
            Self::DeltaInfo => "DL",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Load state of an extension stub; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubState {
    #[default]
    Pending,
    Loaded,
    Failed,
}

/// Placeholder for extension data that materializes on first access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionStub {
    pub kind: ExtensionKind,
    pub location: String,
    pub checksum: Checksum,
    #[serde(skip)]
    pub state: StubState,
}

/// One entry of a repository's delta metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaInfo {
    pub name: String,
    pub evr: String,
    pub arch: String,
    pub base_evr: String,
    pub location: String,
    pub checksum: Option<Checksum>,
}

bitflags! {
    /// How a cache blob is ingested into a repo
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoadFlags: u8 {
        /// The blob adds data to existing records instead of new records
        const EXTEND_SOLVABLES = 0b01;
        /// Strings stay local to the extension and are not indexed pool-wide
        const LOCAL_POOL = 0b10;
    }
}

/// Metadata-ingestion collaborator used by the repository cache
pub trait MetadataStore {
    /// Read a blob previously produced by [`MetadataStore::dump`]
    fn ingest(&mut self, blob: &mut dyn Read, flags: LoadFlags) -> Result<()>;

    /// Serialize primary data (`None`) or one extension
    fn dump(&self, ext: Option<ExtensionKind>, out: &mut dyn Write) -> Result<()>;
}

/// Lazy-loading capability registered with the pool
///
/// Invoked synchronously the first time a stub's data is needed. Returning
/// false leaves the repo usable without that extension.
pub trait StubLoader {
    fn load_stub(&mut self, repo: &mut Repo, stub: &ExtensionStub) -> bool;
}

/// A repository's package records
#[derive(Debug, Clone, Default)]
pub struct Repo {
    /// Repository alias
    pub name: String,
    /// Engine priority; higher wins
    pub priority: i32,
    pub solvables: Vec<Solvable>,
    pub stubs: Vec<ExtensionStub>,
    pub deltas: Vec<DeltaInfo>,
}

#[derive(Serialize)]
#[serde(rename = "CacheBlob")]
enum CacheBlobRef<'a> {
    Primary {
        solvables: &'a [Solvable],
        stubs: &'a [ExtensionStub],
    },
    FileLists(Vec<(usize, &'a [String])>),
    Deltas(&'a [DeltaInfo]),
}

#[derive(Deserialize)]
enum CacheBlob {
    Primary {
        solvables: Vec<Solvable>,
        stubs: Vec<ExtensionStub>,
    },
    FileLists(Vec<(usize, Vec<String>)>),
    Deltas(Vec<DeltaInfo>),
}

impl Repo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_solvable(&mut self, solvable: Solvable) -> usize {
        self.solvables.push(solvable);
        self.solvables.len() - 1
    }

    /// Attach an extension stub, replacing any stub of the same kind
    pub fn add_stub(&mut self, stub: ExtensionStub) {
        self.stubs.retain(|s| s.kind != stub.kind);
        self.stubs.push(stub);
    }

    pub fn stub(&self, kind: ExtensionKind) -> Option<&ExtensionStub> {
        self.stubs.iter().find(|s| s.kind == kind)
    }

    /// Find a solvable by name, evr and arch
    pub fn find(&self, name: &str, evr: &str, arch: &str) -> Option<usize> {
        self.solvables
            .iter()
            .position(|s| s.name == name && s.evr == evr && s.arch == arch)
    }
}

impl MetadataStore for Repo {
    fn ingest(&mut self, blob: &mut dyn Read, flags: LoadFlags) -> Result<()> {
        let decoder = zstd::stream::read::Decoder::new(blob)?;
        let blob: CacheBlob = serde_json::from_reader(decoder)
            .map_err(|e| Error::Cache(format!("Failed to decode cache blob: {}", e)))?;

        let extend = flags.contains(LoadFlags::EXTEND_SOLVABLES);
        match blob {
            CacheBlob::Primary { solvables, stubs } if !extend => {
                debug!("Ingesting {} solvables into {}", solvables.len(), self.name);
                self.solvables.extend(solvables);
                for stub in stubs {
                    self.add_stub(stub);
                }
            }
            CacheBlob::FileLists(lists) if extend => {
                // A blob that names an unknown record is rejected whole
                if let Some((index, _)) = lists.iter().find(|(index, _)| *index >= self.solvables.len()) {
                    return Err(Error::Cache(format!("File list for unknown record {}", index)));
                }
                for (index, files) in lists {
                    let solvable = &mut self.solvables[index];
                    if !flags.contains(LoadFlags::LOCAL_POOL) {
                        solvable.files.extend(files.iter().cloned());
                    }
                    solvable.filelist = files;
                }
            }
            CacheBlob::Deltas(deltas) if extend => {
                self.deltas.extend(deltas);
            }
            _ => {
                return Err(Error::Cache(format!(
                    "Cache blob kind does not match load flags {:?}",
                    flags
                )));
            }
        }
        Ok(())
    }

    fn dump(&self, ext: Option<ExtensionKind>, out: &mut dyn Write) -> Result<()> {
        let blob = match ext {
            None => CacheBlobRef::Primary {
                solvables: &self.solvables,
                stubs: &self.stubs,
            },
            Some(ExtensionKind::FileLists) => CacheBlobRef::FileLists(
                self.solvables
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| !s.filelist.is_empty())
                    .map(|(i, s)| (i, s.filelist.as_slice()))
                    .collect(),
            ),
            Some(ExtensionKind::DeltaInfo) => CacheBlobRef::Deltas(&self.deltas),
        };

        let mut encoder = zstd::stream::write::Encoder::new(out, 3)?;
        serde_json::to_writer(&mut encoder, &blob)
            .map_err(|e| Error::Cache(format!("Failed to encode cache blob: {}", e)))?;
        encoder.finish()?;
        Ok(())
    }
}

/// The package universe
pub struct Pool {
    arch: ArchPolicy,
    repos: Vec<Repo>,
    installed: Option<RepoId>,
    whatprovides: BTreeMap<String, Vec<PackageId>>,
    loader: Option<Box<dyn StubLoader>>,
}

impl Pool {
    pub fn new(arch: ArchPolicy) -> Self {
        Self {
            arch,
            repos: Vec::new(),
            installed: None,
            whatprovides: BTreeMap::new(),
            loader: None,
        }
    }

    pub fn arch(&self) -> &ArchPolicy {
        &self.arch
    }

    /// True if `token` names an architecture this pool knows
    pub fn is_known_arch(&self, token: &str) -> bool {
        !token.is_empty() && self.arch.is_known(token)
    }

    /// Register the lazy-loading capability
    pub fn set_loader(&mut self, loader: Box<dyn StubLoader>) {
        self.loader = Some(loader);
    }

    pub fn add_repo(&mut self, repo: Repo) -> RepoId {
        self.repos.push(repo);
        RepoId(self.repos.len() - 1)
    }

    pub fn repo(&self, id: RepoId) -> &Repo {
        &self.repos[id.0]
    }

    pub fn repo_mut(&mut self, id: RepoId) -> &mut Repo {
        &mut self.repos[id.0]
    }

    pub fn repo_ids(&self) -> impl Iterator<Item = RepoId> + '_ {
        (0..self.repos.len()).map(RepoId)
    }

    pub fn set_installed(&mut self, id: RepoId) {
        self.installed = Some(id);
    }

    pub fn installed(&self) -> Option<RepoId> {
        self.installed
    }

    pub fn is_installed(&self, id: PackageId) -> bool {
        self.installed == Some(id.repo)
    }

    pub fn solvable(&self, id: PackageId) -> &Solvable {
        &self.repos[id.repo.0].solvables[id.index]
    }

    /// Iterate over every package of every repo
    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Solvable)> + '_ {
        self.repos.iter().enumerate().flat_map(|(r, repo)| {
            repo.solvables.iter().enumerate().map(move |(index, s)| {
                (
                    PackageId {
                        repo: RepoId(r),
                        index,
                    },
                    s,
                )
            })
        })
    }

    /// True if the package could be installed on this machine
    pub fn installable(&self, id: PackageId) -> bool {
        self.arch.is_compatible(&self.solvable(id).arch)
    }

    /// Rebuild the capability index
    ///
    /// Indexes package names, explicit provides, and primary-metadata files.
    /// Must be called after repos are added.
    pub fn create_whatprovides(&mut self) {
        let mut index: BTreeMap<String, Vec<PackageId>> = BTreeMap::new();
        for (id, s) in self.packages() {
            index.entry(s.name.clone()).or_default().push(id);
            for dep in &s.provides {
                index.entry(dep.name.clone()).or_default().push(id);
            }
            for file in &s.files {
                index.entry(file.clone()).or_default().push(id);
            }
        }
        for ids in index.values_mut() {
            ids.dedup();
        }
        debug!("Capability index holds {} tokens", index.len());
        self.whatprovides = index;
    }

    /// Packages providing a capability token
    pub fn providers(&self, token: &str) -> &[PackageId] {
        self.whatprovides
            .get(token)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// True if `token` is a package name or a provided capability
    pub fn is_known_token(&self, token: &str) -> bool {
        self.whatprovides.contains_key(token)
    }

    /// All provided capability tokens, sorted
    pub fn provided_tokens(&self) -> impl Iterator<Item = &str> + '_ {
        self.whatprovides.keys().map(|k| k.as_str())
    }

    /// Make sure extension data of `kind` is loaded for a repo
    ///
    /// Returns true if the data is available. The loader is taken out of the
    /// pool while it runs.
    pub fn ensure_loaded(&mut self, repo: RepoId, kind: ExtensionKind) -> bool {
        let pending: Vec<usize> = self.repos[repo.0]
            .stubs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == kind && s.state == StubState::Pending)
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let Some(mut loader) = self.loader.take() else {
                return false;
            };
            for i in pending {
                let target = &mut self.repos[repo.0];
                let stub = target.stubs[i].clone();
                let loaded = loader.load_stub(target, &stub);
                if !loaded {
                    warn!("{}: could not load {} extension", target.name, kind);
                }
                target.stubs[i].state = if loaded {
                    StubState::Loaded
                } else {
                    StubState::Failed
                };
            }
            self.loader = Some(loader);
        }

        self.repos[repo.0]
            .stubs
            .iter()
            .any(|s| s.kind == kind && s.state == StubState::Loaded)
    }

    /// Delta entries of a repo, loading them on first access
    pub fn deltas(&mut self, repo: RepoId) -> &[DeltaInfo] {
        self.ensure_loaded(repo, ExtensionKind::DeltaInfo);
        &self.repos[repo.0].deltas
    }

    /// Packages with a file matching `pattern`, one hit per package
    ///
    /// Loads complete file lists first. With `glob` the pattern is matched
    /// as a shell glob, otherwise exactly.
    pub fn search_files(&mut self, pattern: &str, glob: bool, installed_only: bool) -> Vec<PackageId> {
        let compiled = if glob {
            match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    debug!("Invalid file glob '{}': {}", pattern, e);
                    return Vec::new();
                }
            }
        } else {
            None
        };

        let repos: Vec<RepoId> = match (installed_only, self.installed) {
            (true, Some(installed)) => vec![installed],
            (true, None) => Vec::new(),
            (false, _) => self.repo_ids().collect(),
        };

        let mut matches = Vec::new();
        for repo in repos {
            self.ensure_loaded(repo, ExtensionKind::FileLists);
            for (index, s) in self.repos[repo.0].solvables.iter().enumerate() {
                let hit = s.all_files().iter().any(|f| match &compiled {
                    Some(p) => p.matches(f),
                    None => f == pattern,
                });
                if hit {
                    matches.push(PackageId { repo, index });
                }
            }
        }
        matches
    }

    /// Case-insensitive substring search over package names
    pub fn search_names(&self, term: &str) -> Vec<PackageId> {
        let term = term.to_lowercase();
        self.packages()
            .filter(|(_, s)| s.name.to_lowercase().contains(&term))
            .map(|(id, _)| id)
            .collect()
    }

    /// Installed packages with the given name
    pub fn installed_named(&self, name: &str) -> Vec<PackageId> {
        self.providers(name)
            .iter()
            .copied()
            .filter(|&id| self.is_installed(id) && self.solvable(id).name == name)
            .collect()
    }
}
