// src/repository/sync.rs

//! Repository metadata refresh
//!
//! Brings every configured repository into the pool, from the cache when
//! it is still valid and from the network otherwise. The flow per
//! repository:
//!
//! 1. Unless the cache has expired, try the cache without a known cookie.
//! 2. Fetch the metadata index (`repodata/repomd.xml` or `content`); its
//!    SHA-256 is the base cookie. If a cache file carries that cookie it is
//!    used and its mtime refreshed.
//! 3. Otherwise fetch and parse the primary metadata, register extension
//!    stubs and write the cache, unless something failed verification.

use super::fetch::{FetchFailure, FetchOutcome, FetchedFile};
use super::parsers::{rpmmd, susetags};
use super::{Fetcher, MetadataKind, RepoCache, RepoDescriptor, SYSTEM_ALIAS};
use crate::db;
use crate::error::{Error, Result};
use crate::hash::{cookie_from_bytes, cookie_from_stat};
use crate::pool::{ExtensionKind, ExtensionStub, Pool, Repo, StubState};
use std::fmt;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time after which cached metadata is checked again
pub const DEFAULT_METADATA_EXPIRE: Duration = Duration::from_secs(900);

/// What happened to one repository during a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// Loaded from a valid cache file
    Cached,
    /// Fetched from the repository; `cached` is false when the data was
    /// incomplete and deliberately kept out of the cache
    Fetched { cached: bool },
    /// The repository has no metadata index
    Skipped(String),
    /// Metadata could not be fetched or verified
    Unavailable(String),
    Disabled,
}

impl RefreshStatus {
    /// True if the repository was added to the pool
    pub fn is_loaded(&self) -> bool {
        matches!(self, RefreshStatus::Cached | RefreshStatus::Fetched { .. })
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStatus::Cached => write!(f, "cached"),
            RefreshStatus::Fetched { cached: true } => write!(f, "fetched"),
            RefreshStatus::Fetched { cached: false } => write!(f, "fetched (incomplete, not cached)"),
            RefreshStatus::Skipped(reason) => write!(f, "{}, skipped", reason),
            RefreshStatus::Unavailable(reason) => write!(f, "unavailable: {}", reason),
            RefreshStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Outcome of refreshing one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub alias: String,
    pub status: RefreshStatus,
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repo '{}': {}", self.alias, self.status)
    }
}

/// Loads repositories into a pool
pub struct Refresher {
    cache: RepoCache,
    fetcher: Fetcher,
    metadata_expire: Duration,
}

impl Refresher {
    pub fn new(cache: RepoCache, fetcher: Fetcher) -> Self {
        Self {
            cache,
            fetcher,
            metadata_expire: DEFAULT_METADATA_EXPIRE,
        }
    }

    pub fn with_metadata_expire(mut self, expire: Duration) -> Self {
        self.metadata_expire = expire;
        self
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Load the installed packages as the pool's system repository
    ///
    /// The cookie is derived from the database file's stat data, so the
    /// cache is reused until the database changes. A missing database means
    /// nothing is installed.
    pub fn load_system(&self, pool: &mut Pool, db_path: &Path) -> Result<RepoDescriptor> {
        let mut desc = RepoDescriptor::system();
        let mut repo = Repo::new(SYSTEM_ALIAS);
        repo.priority = desc.engine_priority();

        match fs::metadata(db_path) {
            Ok(meta) => {
                desc.cookie = Some(cookie_from_stat(&meta));
                if self.cache.load(&mut desc, &mut repo, None, false) {
                    info!("installed database: cached");
                } else {
                    info!("installed database: reading");
                    repo = Repo::new(SYSTEM_ALIAS);
                    repo.priority = desc.engine_priority();
                    let conn = db::open(&db_path.to_string_lossy())?;
                    for solvable in db::system::read_installed(&conn)? {
                        repo.add_solvable(solvable);
                    }
                    self.cache.store(&mut desc, &repo, None);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No installed database at {}", db_path.display());
            }
            Err(e) => return Err(e.into()),
        }

        let id = pool.add_repo(repo);
        pool.set_installed(id);
        desc.handle = Some(id);
        Ok(desc)
    }

    /// Refresh every repository in order
    pub fn refresh_all(&self, pool: &mut Pool, repos: &mut [RepoDescriptor]) -> Vec<RefreshReport> {
        repos.iter_mut().map(|desc| self.refresh(pool, desc)).collect()
    }

    /// Refresh one repository and add it to the pool if it is usable
    pub fn refresh(&self, pool: &mut Pool, desc: &mut RepoDescriptor) -> RefreshReport {
        desc.handle = None;
        if !desc.enabled {
            return RefreshReport {
                alias: desc.alias.clone(),
                status: RefreshStatus::Disabled,
            };
        }

        desc.cookie = None;
        desc.ext_cookie = None;
        let mut repo = self.new_repo(desc);

        let status = if !self.needs_refresh(desc) && self.cache.load(desc, &mut repo, None, false) {
            RefreshStatus::Cached
        } else {
            repo = self.new_repo(desc);
            let result = match desc.kind {
                MetadataKind::RpmMd => self.refresh_rpmmd(desc, &mut repo),
                MetadataKind::Susetags => self.refresh_susetags(desc, &mut repo),
                MetadataKind::System => Err(Error::Config(format!(
                    "{} is loaded from the installed database",
                    desc.alias
                ))),
            };
            match result {
                Ok(status) => status,
                Err(e) => {
                    warn!("repo '{}': {}", desc.alias, e);
                    RefreshStatus::Unavailable(e.to_string())
                }
            }
        };

        if status.is_loaded() {
            desc.handle = Some(pool.add_repo(repo));
        }
        let report = RefreshReport {
            alias: desc.alias.clone(),
            status,
        };
        info!("{}", report);
        report
    }

    fn new_repo(&self, desc: &RepoDescriptor) -> Repo {
        let mut repo = Repo::new(desc.alias.clone());
        repo.priority = desc.engine_priority();
        repo
    }

    /// True if cached metadata must be revalidated against the repository
    fn needs_refresh(&self, desc: &RepoDescriptor) -> bool {
        if !desc.autorefresh {
            return false;
        }
        match self.cache.age(&desc.alias) {
            Some(age) => age >= self.metadata_expire,
            None => true,
        }
    }

    /// Fetch the metadata index and adopt its checksum as the base cookie
    ///
    /// `Ok(None)` means the index does not exist.
    fn fetch_index(&self, desc: &mut RepoDescriptor, file: &str) -> Result<Option<Vec<u8>>> {
        let index = match self.fetcher.fetch(desc, file, false, None) {
            FetchOutcome::Fetched(index) => index.bytes()?,
            FetchOutcome::Absent => return Ok(None),
            FetchOutcome::Failed(failure) => return Err(unavailable(desc, &failure)),
        };
        desc.cookie = Some(cookie_from_bytes(&index));
        Ok(Some(index))
    }

    fn refresh_rpmmd(&self, desc: &mut RepoDescriptor, repo: &mut Repo) -> Result<RefreshStatus> {
        let Some(index) = self.fetch_index(desc, "repodata/repomd.xml")? else {
            return Ok(RefreshStatus::Skipped("no repomd.xml file".to_string()));
        };
        if self.cache.load(desc, repo, None, true) {
            return Ok(RefreshStatus::Cached);
        }
        info!("repo '{}': fetching", desc.alias);

        let repomd = rpmmd::parse_repomd(index.as_slice())?;
        let (location, checksum) = repomd.find("primary").ok_or_else(|| Error::RepoUnavailable {
            alias: desc.alias.clone(),
            reason: "no primary metadata listed".to_string(),
        })?;
        let primary = require(desc, self.fetcher.fetch(desc, location, true, Some(checksum)), location)?;
        for solvable in rpmmd::parse_primary(BufReader::new(primary.reader()?))? {
            repo.add_solvable(solvable);
        }

        let deltas = repomd
            .find("deltainfo")
            .or_else(|| repomd.find("prestodelta"));
        let stubs = [
            (ExtensionKind::DeltaInfo, deltas),
            (ExtensionKind::FileLists, repomd.find("filelists")),
        ];
        for (kind, entry) in stubs {
            if let Some((location, checksum)) = entry {
                repo.add_stub(ExtensionStub {
                    kind,
                    location: location.to_string(),
                    checksum: checksum.clone(),
                    state: StubState::Pending,
                });
            }
        }

        self.cache.store(desc, repo, None);
        Ok(RefreshStatus::Fetched { cached: true })
    }

    fn refresh_susetags(&self, desc: &mut RepoDescriptor, repo: &mut Repo) -> Result<RefreshStatus> {
        let Some(index) = self.fetch_index(desc, "content")? else {
            return Ok(RefreshStatus::Skipped("no content file".to_string()));
        };
        if self.cache.load(desc, repo, None, true) {
            return Ok(RefreshStatus::Cached);
        }
        info!("repo '{}': fetching", desc.alias);

        let content = susetags::parse_content(index.as_slice())?;
        let Some(packages) = self.fetch_described(desc, &content, "packages")? else {
            return Err(Error::RepoUnavailable {
                alias: desc.alias.clone(),
                reason: "no packages file listed".to_string(),
            });
        };
        let records = susetags::parse_packages(
            BufReader::new(packages.reader()?),
            content.datadir(),
            content.default_vendor.as_deref(),
        )?;
        for solvable in records {
            repo.add_solvable(solvable);
        }

        // Translations are optional, but a failed download keeps the
        // untranslated data out of the cache
        let complete = match self.fetch_described(desc, &content, "packages.en") {
            Ok(Some(file)) => {
                let translations = susetags::parse_translations(BufReader::new(file.reader()?))?;
                for t in translations {
                    if let Some(index) = repo.find(&t.name, &t.evr, &t.arch) {
                        let solvable = &mut repo.solvables[index];
                        if t.summary.is_some() {
                            solvable.summary = t.summary;
                        }
                        if t.description.is_some() {
                            solvable.description = t.description;
                        }
                    }
                }
                true
            }
            Ok(None) => true,
            Err(e) => {
                warn!("repo '{}': {}", desc.alias, e);
                false
            }
        };

        if complete {
            self.cache.store(desc, repo, None);
        }
        Ok(RefreshStatus::Fetched { cached: complete })
    }

    /// Fetch `<base>.gz`, or `<base>` if only that is listed, from the
    /// description directory
    fn fetch_described(
        &self,
        desc: &RepoDescriptor,
        content: &susetags::Content,
        base: &str,
    ) -> Result<Option<FetchedFile>> {
        let compressed = format!("{}.gz", base);
        let Some((file, checksum)) = content.find(&compressed).or_else(|| content.find(base)) else {
            return Ok(None);
        };
        let path = format!("{}/{}", content.descrdir(), file);
        require(desc, self.fetcher.fetch(desc, &path, true, checksum), &path).map(Some)
    }
}

/// A file the repository listed must be there and verify
fn require(desc: &RepoDescriptor, outcome: FetchOutcome, location: &str) -> Result<FetchedFile> {
    match outcome {
        FetchOutcome::Fetched(file) => Ok(file),
        FetchOutcome::Absent => Err(Error::RepoUnavailable {
            alias: desc.alias.clone(),
            reason: format!("{} is missing", location),
        }),
        FetchOutcome::Failed(failure) => Err(unavailable(desc, &failure)),
    }
}

fn unavailable(desc: &RepoDescriptor, failure: &FetchFailure) -> Error {
    match failure {
        FetchFailure::Checksum { url } => Error::ChecksumInvalid { path: url.clone() },
        FetchFailure::Download { .. } => Error::RepoUnavailable {
            alias: desc.alias.clone(),
            reason: failure.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ArchPolicy;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
<package type="rpm">
  <name>foo</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="1.0" rel="1"/>
  <location href="Packages/foo-1.0-1.x86_64.rpm"/>
  <format>
    <file>/usr/bin/foo</file>
  </format>
</package>
<package type="rpm">
  <name>bar</name>
  <arch>noarch</arch>
  <version epoch="0" ver="2.0" rel="1"/>
  <location href="Packages/bar-2.0-1.noarch.rpm"/>
</package>
</metadata>"#;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Write an rpm-md repository; `primary_sum` overrides the listed checksum
    fn write_rpmmd(root: &Path, primary_sum: Option<&str>) {
        fs::create_dir_all(root.join("repodata")).unwrap();
        let primary = gzip(PRIMARY.as_bytes());
        fs::write(root.join("repodata/primary.xml.gz"), &primary).unwrap();
        let sum = primary_sum.map(str::to_string).unwrap_or_else(|| sha256_hex(&primary));
        let repomd = format!(
            r#"<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1</revision>
  <data type="primary">
    <checksum type="sha256">{}</checksum>
    <location href="repodata/primary.xml.gz"/>
  </data>
  <data type="filelists">
    <checksum type="sha256">{}</checksum>
    <location href="repodata/filelists.xml.gz"/>
  </data>
</repomd>"#,
            sum,
            sha256_hex(b"unused")
        );
        fs::write(root.join("repodata/repomd.xml"), repomd).unwrap();
    }

    fn setup() -> (TempDir, Refresher, RepoDescriptor, PathBuf) {
        let dir = TempDir::new().unwrap();
        let remote = dir.path().join("remote");
        let refresher = Refresher::new(RepoCache::new(dir.path().join("cache")), Fetcher::http().unwrap());
        let desc = RepoDescriptor::new("main", format!("file://{}", remote.display()));
        (dir, refresher, desc, remote)
    }

    fn new_pool() -> Pool {
        Pool::new(ArchPolicy::new("x86_64"))
    }

    #[test]
    fn test_rpmmd_fetch_then_cache() {
        let (_dir, refresher, mut desc, remote) = setup();
        write_rpmmd(&remote, None);

        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Fetched { cached: true });
        let id = desc.handle.unwrap();
        assert_eq!(pool.repo(id).solvables.len(), 2);
        assert!(pool.repo(id).stub(ExtensionKind::FileLists).is_some());
        assert!(desc.ext_cookie.is_some());
        assert!(refresher.cache().path("main", None).exists());

        // Within the expiry window the cache is used without touching the
        // network, even when the remote is gone
        fs::remove_dir_all(&remote).unwrap();
        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Cached);
        assert_eq!(pool.repo(desc.handle.unwrap()).solvables.len(), 2);
    }

    #[test]
    fn test_expired_cache_is_revalidated_by_cookie() {
        let (_dir, refresher, mut desc, remote) = setup();
        let refresher = refresher.with_metadata_expire(Duration::ZERO);
        write_rpmmd(&remote, None);
        refresher.refresh(&mut new_pool(), &mut desc);

        // Same repomd.xml: the cache matches its cookie, primary is not needed
        fs::remove_file(remote.join("repodata/primary.xml.gz")).unwrap();
        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Cached);

        // A changed repomd.xml invalidates the cache
        write_rpmmd(&remote, None);
        let repomd = remote.join("repodata/repomd.xml");
        let mut text = fs::read_to_string(&repomd).unwrap();
        text = text.replace("<revision>1</revision>", "<revision>2</revision>");
        fs::write(&repomd, text).unwrap();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Fetched { cached: true });
    }

    #[test]
    fn test_bad_primary_checksum_is_not_cached() {
        let (_dir, refresher, mut desc, remote) = setup();
        write_rpmmd(&remote, Some(&sha256_hex(b"something else")));

        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert!(matches!(report.status, RefreshStatus::Unavailable(_)));
        assert!(desc.handle.is_none());
        assert_eq!(pool.repo_ids().count(), 0);
        assert!(!refresher.cache().path("main", None).exists());
    }

    #[test]
    fn test_missing_index_skips_repo() {
        let (_dir, refresher, mut desc, remote) = setup();
        fs::create_dir_all(&remote).unwrap();

        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Skipped("no repomd.xml file".to_string()));
        assert_eq!(report.to_string(), "repo 'main': no repomd.xml file, skipped");
        assert!(desc.handle.is_none());
    }

    #[test]
    fn test_disabled_repo_is_left_alone() {
        let (_dir, refresher, mut desc, _remote) = setup();
        desc.enabled = false;
        let mut pools = vec![desc];
        let reports = refresher.refresh_all(&mut new_pool(), &mut pools);
        assert_eq!(reports[0].status, RefreshStatus::Disabled);
    }

    fn write_susetags(root: &Path, with_translations: bool) {
        let descr = root.join("suse/setup/descr");
        fs::create_dir_all(&descr).unwrap();
        let packages = "=Ver: 2.0\n=Pkg: foo 1.0 1 x86_64\n=Loc: 1 foo-1.0-1.x86_64.rpm\n";
        let packages_gz = gzip(packages.as_bytes());
        fs::write(descr.join("packages.gz"), &packages_gz).unwrap();
        let translations = "=Ver: 2.0\n=Pkg: foo 1.0 1 x86_64\n=Sum: The foo tool\n";
        if with_translations {
            fs::write(descr.join("packages.en"), translations).unwrap();
        }
        let content = format!(
            "LABEL Test\nVENDOR Example\nMETA SHA256 {} packages.gz\nMETA SHA256 {} packages.en\n",
            sha256_hex(&packages_gz),
            sha256_hex(translations.as_bytes())
        );
        fs::write(root.join("content"), content).unwrap();
    }

    #[test]
    fn test_susetags_refresh_applies_translations() {
        let (_dir, refresher, mut desc, remote) = setup();
        desc.kind = MetadataKind::Susetags;
        write_susetags(&remote, true);

        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Fetched { cached: true });

        let foo = &pool.repo(desc.handle.unwrap()).solvables[0];
        assert_eq!(foo.summary.as_deref(), Some("The foo tool"));
        assert_eq!(foo.vendor.as_deref(), Some("Example"));
        assert_eq!(foo.location.as_deref(), Some("suse/x86_64/foo-1.0-1.x86_64.rpm"));
    }

    #[test]
    fn test_susetags_missing_translations_are_not_cached() {
        let (_dir, refresher, mut desc, remote) = setup();
        desc.kind = MetadataKind::Susetags;
        write_susetags(&remote, false);

        let mut pool = new_pool();
        let report = refresher.refresh(&mut pool, &mut desc);
        assert_eq!(report.status, RefreshStatus::Fetched { cached: false });
        assert!(desc.handle.is_some());
        assert!(!refresher.cache().path("main", None).exists());
    }

    #[test]
    fn test_load_system_reads_then_caches() {
        let (dir, refresher, _desc, _remote) = setup();
        let db_path = dir.path().join("kiln.db");
        db::init(&db_path.to_string_lossy()).unwrap();
        {
            let conn = db::open(&db_path.to_string_lossy()).unwrap();
            let mut changeset = db::models::Changeset::new("seed".to_string());
            let changeset_id = changeset.insert(&conn).unwrap();
            let foo = crate::pool::Solvable::new("foo", "1.0-1", "x86_64");
            db::system::record_install(&conn, &foo, None, changeset_id, &[]).unwrap();
            db::checkpoint(&conn).unwrap();
        }

        let mut pool = new_pool();
        let desc = refresher.load_system(&mut pool, &db_path).unwrap();
        let id = desc.handle.unwrap();
        assert_eq!(pool.installed(), Some(id));
        assert_eq!(pool.repo(id).solvables[0].name, "foo");
        assert!(refresher.cache().path(SYSTEM_ALIAS, None).exists());

        let mut pool = new_pool();
        let desc = refresher.load_system(&mut pool, &db_path).unwrap();
        assert_eq!(pool.repo(desc.handle.unwrap()).solvables.len(), 1);
    }

    #[test]
    fn test_load_system_without_database() {
        let (dir, refresher, _desc, _remote) = setup();
        let mut pool = new_pool();
        let desc = refresher.load_system(&mut pool, &dir.path().join("missing.db")).unwrap();
        assert!(pool.repo(desc.handle.unwrap()).solvables.is_empty());
    }
}
