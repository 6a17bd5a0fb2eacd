// src/repository/mod.rs

//! Repository management
//!
//! This module provides functionality for:
//! - Describing configured repositories and their cache cookies
//! - Caching parsed metadata on disk, validated by cookies
//! - Fetching repository files with checksum verification
//! - Refreshing metadata and loading extension data on demand

pub mod cache;
pub mod extension;
pub mod fetch;
pub mod parsers;
pub mod sync;

pub use cache::RepoCache;
pub use extension::RepoExtensionLoader;
pub use fetch::{FetchFailure, FetchOutcome, FetchedFile, Fetcher, HttpTransport, Transport};
pub use sync::{DEFAULT_METADATA_EXPIRE, RefreshReport, RefreshStatus, Refresher};

use crate::hash::Cookie;
use crate::pool::RepoId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alias of the repository holding installed packages
pub const SYSTEM_ALIAS: &str = "@System";

/// Default configured priority; lower numbers are preferred
pub const DEFAULT_PRIORITY: i32 = 99;

/// Metadata layout served by a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetadataKind {
    /// `repodata/repomd.xml` and friends
    #[default]
    #[serde(rename = "rpm-md")]
    RpmMd,
    /// SUSE tag files described by a `content` file
    #[serde(rename = "yast2")]
    Susetags,
    /// The installed-package database
    #[serde(skip)]
    System,
}

impl FromStr for MetadataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpm-md" | "rpmmd" => Ok(Self::RpmMd),
            "yast2" | "susetags" => Ok(Self::Susetags),
            _ => Err(format!("Unknown repository type: {}", s)),
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RpmMd => "rpm-md",
            Self::Susetags => "yast2",
            Self::System => "system",
        };
        write!(f, "{}", name)
    }
}

/// A configured repository and its runtime cache state
#[derive(Debug, Clone)]
pub struct RepoDescriptor {
    /// Short unique name; also the cache key
    pub alias: String,
    /// Human readable name
    pub name: String,
    pub baseurl: String,
    pub kind: MetadataKind,
    /// Configured priority; lower is preferred
    pub priority: i32,
    pub enabled: bool,
    pub autorefresh: bool,
    pub keeppackages: bool,
    /// Checksum of the metadata index the cache was built from
    pub cookie: Option<Cookie>,
    /// Validates extension cache files against this primary cache
    pub ext_cookie: Option<Cookie>,
    /// Handle into the pool once the repository is loaded
    pub handle: Option<RepoId>,
}

impl RepoDescriptor {
    pub fn new(alias: impl Into<String>, baseurl: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            name: alias.clone(),
            alias,
            baseurl: baseurl.into(),
            kind: MetadataKind::RpmMd,
            priority: DEFAULT_PRIORITY,
            enabled: true,
            autorefresh: true,
            keeppackages: false,
            cookie: None,
            ext_cookie: None,
            handle: None,
        }
    }

    /// Descriptor for the installed-package repository
    pub fn system() -> Self {
        let mut desc = Self::new(SYSTEM_ALIAS, "");
        desc.kind = MetadataKind::System;
        desc.autorefresh = false;
        desc
    }

    pub fn is_system(&self) -> bool {
        self.kind == MetadataKind::System || self.alias == SYSTEM_ALIAS
    }

    /// Priority as seen by the resolution engine; higher wins
    pub fn engine_priority(&self) -> i32 {
        DEFAULT_PRIORITY - self.priority
    }
}

impl fmt::Display for RepoDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.kind)
    }
}
