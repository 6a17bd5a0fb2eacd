// src/repository/fetch.rs

//! Retrieval of repository files with checksum verification
//!
//! The fetcher builds an absolute URL from a repository's base URL, hands
//! it to a [`Transport`], and classifies what came back. Nothing is
//! retried; every outcome is classified once.

use super::RepoDescriptor;
use crate::compression::open_by_name;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use reqwest::blocking::Client;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can retrieve a URL
///
/// An `Err` is a non-zero transport status. A transport must write nothing
/// to `dest` for error responses.
pub trait Transport: Send + Sync {
    fn retrieve(&self, url: &str, dest: &mut dyn Write) -> Result<()>;
}

/// HTTP(S) transport backed by reqwest; also serves `file://` URLs
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn retrieve(&self, url: &str, dest: &mut dyn Write) -> Result<()> {
        if let Some(path) = url.strip_prefix("file://") {
            let mut file = File::open(path)?;
            io::copy(&mut file, dest)?;
            return Ok(());
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Http(format!("Failed to download {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("HTTP {} from {}", response.status(), url)));
        }

        response
            .copy_to(dest)
            .map_err(|e| Error::Http(format!("Failed to read response from {}: {}", url, e)))?;
        Ok(())
    }
}

/// Why a fetch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The transport reported an error status
    Download { url: String, reason: String },
    /// The content did not match the expected checksum
    Checksum { url: String },
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Download { url, reason } => write!(f, "{}: download error: {}", url, reason),
            FetchFailure::Checksum { url } => write!(f, "{}: bad checksum", url),
        }
    }
}

/// A verified file, rewound to its start
#[derive(Debug)]
pub struct FetchedFile {
    file: NamedTempFile,
    name: String,
    decompress: bool,
}

impl FetchedFile {
    /// Repository-relative path the file was fetched from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read the content, decompressed by suffix if requested
    pub fn reader(self) -> io::Result<Box<dyn Read>> {
        let file = self.file.reopen()?;
        if self.decompress {
            open_by_name(&self.name, file)
        } else {
            Ok(Box::new(file))
        }
    }

    /// Raw bytes as fetched
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.reopen()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Move the file to a permanent location
    pub fn persist(self, dest: &Path) -> io::Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match self.file.persist(dest) {
            Ok(_) => Ok(dest.to_path_buf()),
            // Cross-device renames fail; fall back to copying
            Err(e) => {
                fs::copy(e.file.path(), dest)?;
                Ok(dest.to_path_buf())
            }
        }
    }
}

/// Result of one fetch
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(FetchedFile),
    /// The resource does not exist and nothing required it to
    Absent,
    Failed(FetchFailure),
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, FetchOutcome::Failed(_))
    }

    pub fn into_file(self) -> Option<FetchedFile> {
        match self {
            FetchOutcome::Fetched(file) => Some(file),
            _ => None,
        }
    }
}

/// Fetches repository-relative files through a transport
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Fetcher over the default HTTP transport
    pub fn http() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?)))
    }

    /// Absolute URL of a repository file
    pub fn url(desc: &RepoDescriptor, file: &str) -> String {
        format!("{}/{}", desc.baseurl.trim_end_matches('/'), file)
    }

    /// Fetch `file` from a repository
    ///
    /// An empty response counts as absent when the transport succeeded or
    /// no checksum was required. A transport error or a checksum mismatch is
    /// a failure. Decompression is left to the consumer.
    pub fn fetch(
        &self,
        desc: &RepoDescriptor,
        file: &str,
        decompress: bool,
        checksum: Option<&Checksum>,
    ) -> FetchOutcome {
        let url = Self::url(desc, file);
        debug!("Fetching {}", url);

        let mut tmp = match NamedTempFile::new() {
            Ok(tmp) => tmp,
            Err(e) => {
                return FetchOutcome::Failed(FetchFailure::Download {
                    url,
                    reason: format!("Failed to create temporary file: {}", e),
                });
            }
        };

        let status = self.transport.retrieve(&url, tmp.as_file_mut());
        let len = match tmp.as_file_mut().seek(SeekFrom::End(0)) {
            Ok(len) => len,
            Err(e) => {
                return FetchOutcome::Failed(FetchFailure::Download {
                    url,
                    reason: e.to_string(),
                });
            }
        };

        if len == 0 && (status.is_ok() || checksum.is_none()) {
            debug!("{}: not present", url);
            return FetchOutcome::Absent;
        }
        if let Err(e) = status {
            warn!("{}: download error: {}", file, e);
            return FetchOutcome::Failed(FetchFailure::Download {
                url,
                reason: e.to_string(),
            });
        }

        if let Some(expected) = checksum {
            let verified = tmp
                .as_file_mut()
                .seek(SeekFrom::Start(0))
                .and_then(|_| expected.matches_reader(tmp.as_file_mut()));
            match verified {
                Ok(true) => {}
                Ok(false) => {
                    warn!("{}: bad checksum", file);
                    return FetchOutcome::Failed(FetchFailure::Checksum { url });
                }
                Err(e) => {
                    return FetchOutcome::Failed(FetchFailure::Download {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Fetched {} ({} bytes)", url, len);
        FetchOutcome::Fetched(FetchedFile {
            file: tmp,
            name: file.to_string(),
            decompress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ChecksumKind;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves a fixed set of URLs; anything else is a 404
    #[derive(Default)]
    struct MapTransport {
        files: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    impl Transport for MapTransport {
        fn retrieve(&self, url: &str, dest: &mut dyn Write) -> Result<()> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.files.get(url) {
                Some(data) => Ok(dest.write_all(data)?),
                None => Err(Error::Http(format!("HTTP 404 Not Found from {}", url))),
            }
        }
    }

    fn fetcher(files: &[(&str, &[u8])]) -> (Fetcher, Arc<MapTransport>) {
        let transport = Arc::new(MapTransport {
            files: files
                .iter()
                .map(|(url, data)| (url.to_string(), data.to_vec()))
                .collect(),
            ..Default::default()
        });
        (Fetcher::new(transport.clone()), transport)
    }

    fn sha256(data: &[u8]) -> Checksum {
        Checksum {
            kind: ChecksumKind::Sha256,
            digest: Sha256::digest(data).to_vec(),
        }
    }

    fn desc() -> RepoDescriptor {
        RepoDescriptor::new("main", "https://example.com/repo/")
    }

    #[test]
    fn test_url_collapses_trailing_slash() {
        let (fetcher, transport) = fetcher(&[]);
        fetcher.fetch(&desc(), "repodata/repomd.xml", false, None);
        assert_eq!(
            transport.requested.lock().unwrap().as_slice(),
            &["https://example.com/repo/repodata/repomd.xml".to_string()]
        );
    }

    #[test]
    fn test_not_found_without_checksum_is_absent() {
        let (fetcher, _) = fetcher(&[]);
        let outcome = fetcher.fetch(&desc(), "repodata/repomd.xml", false, None);
        assert!(matches!(outcome, FetchOutcome::Absent));
    }

    #[test]
    fn test_not_found_with_checksum_is_download_error() {
        let (fetcher, _) = fetcher(&[]);
        let sum = sha256(b"expected");
        let outcome = fetcher.fetch(&desc(), "repodata/primary.xml.gz", true, Some(&sum));
        assert!(outcome.is_failure());
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FetchFailure::Download { .. })
        ));
    }

    #[test]
    fn test_empty_success_is_absent_even_with_checksum() {
        let (fetcher, _) = fetcher(&[("https://example.com/repo/empty", &b""[..])]);
        let sum = sha256(b"expected");
        let outcome = fetcher.fetch(&desc(), "empty", false, Some(&sum));
        assert!(matches!(outcome, FetchOutcome::Absent));
    }

    #[test]
    fn test_checksum_mismatch_fails() {
        let (fetcher, _) = fetcher(&[("https://example.com/repo/data", &b"tampered"[..])]);
        let sum = sha256(b"original");
        let outcome = fetcher.fetch(&desc(), "data", false, Some(&sum));
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FetchFailure::Checksum { .. })
        ));
    }

    #[test]
    fn test_verified_file_is_rewound_and_decompressed() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<metadata/>").unwrap();
        let gz = encoder.finish().unwrap();
        let (fetcher, _) = fetcher(&[("https://example.com/repo/primary.xml.gz", gz.as_slice())]);

        let sum = sha256(&gz);
        let file = fetcher
            .fetch(&desc(), "primary.xml.gz", true, Some(&sum))
            .into_file()
            .unwrap();
        assert_eq!(file.bytes().unwrap(), gz);

        let mut text = String::new();
        file.reader().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "<metadata/>");
    }

    #[test]
    fn test_http_transport_serves_file_urls() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("repomd.xml"), b"<repomd/>").unwrap();
        let fetcher = Fetcher::http().unwrap();
        let desc = RepoDescriptor::new("local", format!("file://{}", dir.path().display()));

        let file = fetcher.fetch(&desc, "repomd.xml", false, None).into_file().unwrap();
        assert_eq!(file.bytes().unwrap(), b"<repomd/>");

        assert!(matches!(
            fetcher.fetch(&desc, "missing.xml", false, None),
            FetchOutcome::Absent
        ));
    }

    #[test]
    fn test_persist_moves_file() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _) = fetcher(&[("https://example.com/repo/foo.rpm", &b"rpm"[..])]);
        let file = fetcher.fetch(&desc(), "foo.rpm", false, None).into_file().unwrap();
        let dest = dir.path().join("packages/foo.rpm");
        file.persist(&dest).unwrap();
        assert_eq!(fs::read(dest).unwrap(), b"rpm");
    }
}
