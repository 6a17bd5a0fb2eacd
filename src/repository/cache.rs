// src/repository/cache.rs

//! Cookie-validated on-disk metadata cache
//!
//! Each repository gets one primary file plus one file per loaded
//! extension. A file is an opaque blob produced by the metadata store
//! followed by trailing cookies:
//!
//! - primary file of a regular repository: `blob | ext cookie | base cookie`
//! - primary file of the system repository: `blob | base cookie`
//! - extension file: `blob | ext cookie`
//!
//! A file whose trailing cookie does not match what the descriptor expects
//! is treated as a cache miss. Writes go to a temp file in the cache
//! directory and are renamed into place, so readers never see a partial
//! file.

use super::RepoDescriptor;
use crate::hash::{COOKIE_LEN, Cookie, cookie_from_reader};
use crate::pool::{ExtensionKind, LoadFlags, MetadataStore};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Prefix of in-flight cache files
const TEMP_PREFIX: &str = ".newsolv-";

/// The metadata cache directory
#[derive(Debug, Clone)]
pub struct RepoCache {
    dir: PathBuf,
}

impl RepoCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for an alias and optional extension
    ///
    /// A leading dot and every `/` are replaced so the alias can never
    /// escape the cache directory or produce a hidden file.
    pub fn path(&self, alias: &str, ext: Option<ExtensionKind>) -> PathBuf {
        let file = match ext {
            Some(kind) => format!("{}_{}.solvx", alias, kind.id()),
            None => format!("{}.solv", alias),
        };
        let file = match file.strip_prefix('.') {
            Some(rest) => format!("_{}", rest),
            None => file,
        };
        self.dir.join(file.replace('/', "_"))
    }

    /// Time since the primary cache file was last written or marked
    pub fn age(&self, alias: &str) -> Option<Duration> {
        let modified = fs::metadata(self.path(alias, None)).ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    /// Load a cache file into `store`
    ///
    /// Returns false, leaving the descriptor untouched, when the file is
    /// missing, truncated, or carries a cookie other than the expected one.
    /// On success the cookies read from the file are adopted into the
    /// descriptor, and with `mark` the file's mtime is set to now.
    pub fn load(
        &self,
        desc: &mut RepoDescriptor,
        store: &mut dyn MetadataStore,
        ext: Option<ExtensionKind>,
        mark: bool,
    ) -> bool {
        let path = self.path(&desc.alias, ext);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return false,
        };

        let with_ext_cookie = ext.is_none() && !desc.is_system();
        let (cookie, ext_cookie, blob_len) = match read_trailer(&mut file, with_ext_cookie) {
            Ok(Some(trailer)) => trailer,
            Ok(None) => {
                debug!("{}: cache file too short", path.display());
                return false;
            }
            Err(e) => {
                debug!("{}: failed to read cookies: {}", path.display(), e);
                return false;
            }
        };

        let expected = match ext {
            Some(_) => match desc.ext_cookie {
                Some(c) => Some(c),
                None => {
                    debug!("{}: no extension cookie to validate against", desc.alias);
                    return false;
                }
            },
            None => desc.cookie,
        };
        if let Some(expected) = expected
            && expected != cookie
        {
            debug!("{}: cache cookie mismatch", path.display());
            return false;
        }

        if let Err(e) = file.seek(SeekFrom::Start(0)) {
            debug!("{}: rewind failed: {}", path.display(), e);
            return false;
        }
        let mut flags = LoadFlags::empty();
        if let Some(kind) = ext {
            flags |= LoadFlags::EXTEND_SOLVABLES;
            if kind != ExtensionKind::DeltaInfo {
                flags |= LoadFlags::LOCAL_POOL;
            }
        }
        let mut blob = (&mut file).take(blob_len);
        if let Err(e) = store.ingest(&mut blob, flags) {
            warn!("{}: unusable cache file: {}", path.display(), e);
            return false;
        }

        if ext.is_none() {
            desc.cookie = Some(cookie);
            if with_ext_cookie {
                desc.ext_cookie = ext_cookie;
            }
        }
        if mark && let Err(e) = file.set_modified(SystemTime::now()) {
            debug!("{}: failed to mark cache file: {}", path.display(), e);
        }
        debug!("{}: loaded from cache", path.display());
        true
    }

    /// Write `source` to the cache
    ///
    /// Failures are logged and otherwise ignored; the cache is an
    /// optimisation. The first primary store of a regular repository
    /// derives the extension cookie.
    pub fn store(&self, desc: &mut RepoDescriptor, source: &dyn MetadataStore, ext: Option<ExtensionKind>) {
        if let Err(e) = self.try_store(desc, source, ext) {
            debug!("{}: not caching metadata: {}", desc.alias, e);
        }
    }

    fn try_store(
        &self,
        desc: &mut RepoDescriptor,
        source: &dyn MetadataStore,
        ext: Option<ExtensionKind>,
    ) -> io::Result<()> {
        let missing = |what: &str| io::Error::new(io::ErrorKind::InvalidInput, format!("no {}", what));
        let cookie = desc.cookie.ok_or_else(|| missing("cookie"))?;

        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        source
            .dump(ext, tmp.as_file_mut())
            .map_err(|e| io::Error::other(e.to_string()))?;

        match ext {
            None if desc.is_system() => {
                tmp.write_all(&cookie)?;
            }
            None => {
                let ext_cookie = match desc.ext_cookie {
                    Some(c) => c,
                    None => {
                        let file = tmp.as_file_mut();
                        file.seek(SeekFrom::Start(0))?;
                        let derived = derive_ext_cookie(&cookie_from_reader(file)?, &cookie);
                        file.seek(SeekFrom::End(0))?;
                        desc.ext_cookie = Some(derived);
                        derived
                    }
                };
                tmp.write_all(&ext_cookie)?;
                tmp.write_all(&cookie)?;
            }
            Some(_) => {
                let ext_cookie = desc.ext_cookie.ok_or_else(|| missing("extension cookie"))?;
                tmp.write_all(&ext_cookie)?;
            }
        }
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o444))?;
        }

        let path = self.path(&desc.alias, ext);
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!("{}: cache written", path.display());
        Ok(())
    }
}

/// Combine a content checksum with the base cookie
///
/// A leading zero byte is reserved, so it is replaced with 1.
fn derive_ext_cookie(content: &Cookie, base: &Cookie) -> Cookie {
    let mut out = [0u8; COOKIE_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = content[i] ^ base[i];
    }
    if out[0] == 0 {
        out[0] = 1;
    }
    out
}

/// Read the trailing cookie(s)
///
/// Returns the last cookie, the preceding one when requested, and the
/// length of the blob in front of them. `None` if the file is too short.
fn read_trailer(file: &mut File, with_ext_cookie: bool) -> io::Result<Option<(Cookie, Option<Cookie>, u64)>> {
    let len = file.seek(SeekFrom::End(0))?;
    let trailer = (if with_ext_cookie { 2 * COOKIE_LEN } else { COOKIE_LEN }) as u64;
    if len < trailer {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(len - trailer))?;
    let mut ext_cookie = None;
    if with_ext_cookie {
        let mut buf = [0u8; COOKIE_LEN];
        file.read_exact(&mut buf)?;
        ext_cookie = Some(buf);
    }
    let mut cookie = [0u8; COOKIE_LEN];
    file.read_exact(&mut cookie)?;

    Ok(Some((cookie, ext_cookie, len - trailer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::cookie_from_bytes;
    use crate::pool::{Repo, Solvable};
    use crate::repository::SYSTEM_ALIAS;
    use tempfile::TempDir;

    fn descriptor(alias: &str) -> RepoDescriptor {
        let mut desc = RepoDescriptor::new(alias, "file:///srv/repo");
        desc.cookie = Some(cookie_from_bytes(b"repomd"));
        desc
    }

    fn repo() -> Repo {
        let mut repo = Repo::new("main");
        repo.add_solvable(Solvable::new("foo", "1.0-1", "x86_64"));
        repo.add_solvable(Solvable::new("bar", "2.0-1", "noarch"));
        repo.solvables[0].filelist = vec!["/usr/bin/foo".to_string()];
        repo
    }

    fn dump(repo: &Repo, ext: Option<ExtensionKind>) -> Vec<u8> {
        let mut out = Vec::new();
        repo.dump(ext, &mut out).unwrap();
        out
    }

    #[test]
    fn test_path_escaping() {
        let cache = RepoCache::new("/var/cache/kiln");
        assert_eq!(cache.path("main", None), PathBuf::from("/var/cache/kiln/main.solv"));
        assert_eq!(
            cache.path(".hidden/repo", Some(ExtensionKind::FileLists)),
            PathBuf::from("/var/cache/kiln/_hidden_repo_FL.solvx")
        );
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let source = repo();
        let mut desc = descriptor("main");

        cache.store(&mut desc, &source, None);
        assert!(desc.ext_cookie.is_some());

        let mut loaded = Repo::new("main");
        let mut fresh = descriptor("main");
        assert!(cache.load(&mut fresh, &mut loaded, None, false));
        assert_eq!(fresh.ext_cookie, desc.ext_cookie);
        assert_eq!(dump(&loaded, None), dump(&source, None));
    }

    #[test]
    fn test_unknown_cookie_is_adopted() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let mut desc = descriptor("main");
        cache.store(&mut desc, &repo(), None);

        let mut fresh = RepoDescriptor::new("main", "file:///srv/repo");
        assert!(cache.load(&mut fresh, &mut Repo::new("main"), None, true));
        assert_eq!(fresh.cookie, desc.cookie);
    }

    #[test]
    fn test_flipped_cookie_byte_rejects() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let mut desc = descriptor("main");
        cache.store(&mut desc, &repo(), None);

        let path = cache.path("main", None);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        fs::remove_file(&path).unwrap();
        fs::write(&path, &bytes).unwrap();

        let mut fresh = descriptor("main");
        let mut target = Repo::new("main");
        assert!(!cache.load(&mut fresh, &mut target, None, false));
        assert!(target.solvables.is_empty());
        assert_eq!(fresh.ext_cookie, None);
    }

    #[test]
    fn test_truncated_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        fs::write(cache.path("main", None), [0u8; COOKIE_LEN + 5]).unwrap();

        let mut desc = RepoDescriptor::new("main", "file:///srv/repo");
        assert!(!cache.load(&mut desc, &mut Repo::new("main"), None, false));
        assert!(desc.cookie.is_none());
    }

    #[test]
    fn test_system_repo_has_single_cookie() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let mut desc = descriptor(SYSTEM_ALIAS);
        cache.store(&mut desc, &repo(), None);
        assert!(desc.ext_cookie.is_none());

        let stored = fs::read(cache.path(SYSTEM_ALIAS, None)).unwrap();
        assert_eq!(stored.len(), dump(&repo(), None).len() + COOKIE_LEN);
        assert_eq!(&stored[stored.len() - COOKIE_LEN..], &desc.cookie.unwrap());

        let mut fresh = descriptor(SYSTEM_ALIAS);
        assert!(cache.load(&mut fresh, &mut Repo::new(SYSTEM_ALIAS), None, false));
    }

    #[test]
    fn test_extension_requires_matching_ext_cookie() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let source = repo();
        let mut desc = descriptor("main");
        cache.store(&mut desc, &source, None);
        cache.store(&mut desc, &source, Some(ExtensionKind::FileLists));

        let mut target = repo();
        target.solvables[0].filelist.clear();
        assert!(cache.load(&mut desc, &mut target, Some(ExtensionKind::FileLists), false));
        assert_eq!(target.solvables[0].filelist, vec!["/usr/bin/foo".to_string()]);

        let mut other = descriptor("main");
        other.ext_cookie = Some([7u8; COOKIE_LEN]);
        assert!(!cache.load(&mut other, &mut repo(), Some(ExtensionKind::FileLists), false));

        let mut unset = descriptor("main");
        assert!(!cache.load(&mut unset, &mut repo(), Some(ExtensionKind::FileLists), false));
    }

    #[test]
    fn test_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let mut desc = descriptor("main");
        cache.store(&mut desc, &repo(), None);

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["main.solv".to_string()]);
    }

    #[test]
    fn test_store_without_cookie_is_skipped() {
        let dir = TempDir::new().unwrap();
        let cache = RepoCache::new(dir.path());
        let mut desc = RepoDescriptor::new("main", "file:///srv/repo");
        cache.store(&mut desc, &repo(), None);
        assert!(!cache.path("main", None).exists());
    }

    #[test]
    fn test_derived_ext_cookie_never_starts_with_zero() {
        let base = [0u8; COOKIE_LEN];
        let mut content = [5u8; COOKIE_LEN];
        content[0] = 0;
        assert_eq!(derive_ext_cookie(&content, &base)[0], 1);
    }
}
