// src/hash.rs

//! Checksums for repository metadata and cache cookies
//!
//! Repository indexes name the algorithm next to each digest, so checksums
//! carry their kind. Cookies are always raw SHA-256 digests.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::Metadata;
use std::io::{self, Read};
use std::str::FromStr;

/// Length of a cache cookie in bytes
pub const COOKIE_LEN: usize = 32;

/// A cache cookie: SHA-256 of the canonical metadata a blob was built from
pub type Cookie = [u8; COOKIE_LEN];

/// Checksum algorithms found in repository metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumKind {
    /// Digest length in bytes
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Start a streaming hasher for this algorithm
    pub fn hasher(&self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl FromStr for ChecksumKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "sha" is the historical yum spelling of sha1
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha" | "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(format!("unknown checksum type: {}", s)),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Streaming hasher over any supported algorithm
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A typed digest as published in repository metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub digest: Vec<u8>,
}

impl Checksum {
    /// Build a checksum from a hex string, validating its length
    pub fn from_hex(kind: ChecksumKind, hex_digest: &str) -> Option<Self> {
        let digest = hex::decode(hex_digest.trim()).ok()?;
        if digest.len() != kind.output_len() {
            return None;
        }
        Some(Self { kind, digest })
    }

    /// Hash a reader with this checksum's algorithm and compare
    pub fn matches_reader<R: Read>(&self, reader: &mut R) -> io::Result<bool> {
        let mut hasher = self.kind.hasher();
        io::copy(reader, &mut hasher)?;
        Ok(hasher.finalize() == self.digest)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.to_hex())
    }
}

/// SHA-256 cookie over a whole reader
pub fn cookie_from_reader<R: Read>(reader: &mut R) -> io::Result<Cookie> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// SHA-256 cookie over a byte slice
pub fn cookie_from_bytes(data: &[u8]) -> Cookie {
    Sha256::digest(data).into()
}

/// Cookie identifying a file by its stat data rather than its content
///
/// Used for the installed-package database, which is too large to hash on
/// every run.
#[cfg(unix)]
pub fn cookie_from_stat(meta: &Metadata) -> Cookie {
    use std::os::unix::fs::MetadataExt;

    let mut hasher = Sha256::new();
    hasher.update(b"1.1");
    hasher.update(meta.dev().to_string().as_bytes());
    hasher.update(meta.ino().to_string().as_bytes());
    hasher.update(meta.size().to_string().as_bytes());
    hasher.update(meta.mtime().to_string().as_bytes());
    hasher.finalize().into()
}

#[cfg(not(unix))]
pub fn cookie_from_stat(meta: &Metadata) -> Cookie {
    let mut hasher = Sha256::new();
    hasher.update(b"1.1");
    hasher.update(meta.len().to_string().as_bytes());
    if let Ok(modified) = meta.modified() {
        hasher.update(format!("{:?}", modified).as_bytes());
    }
    hasher.finalize().into()
}
