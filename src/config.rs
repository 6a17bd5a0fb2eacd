// src/config.rs

//! Configuration file parsing
//!
//! The main configuration file is TOML with top-level keys:
//! - `repos_dir` - directory holding `*.repo` files
//! - `cache_dir` - metadata cache and kept packages
//! - `db_path` - installed-package database
//! - `arch` - machine architecture override
//! - `metadata_expire` - seconds before repository metadata is rechecked
//!
//! Each `*.repo` file holds one table per repository alias.

use crate::error::{Error, Result};
use crate::repository::{DEFAULT_PRIORITY, MetadataKind, RepoDescriptor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default location of the main configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kiln/kiln.toml";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repos_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    /// Architecture override; the running machine's otherwise
    pub arch: Option<String>,
    /// Seconds
    pub metadata_expire: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repos_dir: PathBuf::from("/etc/kiln/repos.d"),
            cache_dir: PathBuf::from("/var/cache/kiln"),
            db_path: PathBuf::from("/var/lib/kiln/kiln.db"),
            arch: None,
            metadata_expire: 900,
        }
    }
}

impl Config {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
    }

    /// Load a configuration file, using defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn metadata_expire(&self) -> Duration {
        Duration::from_secs(self.metadata_expire)
    }

    /// Repositories configured in `repos_dir`
    pub fn repositories(&self) -> Result<Vec<RepoDescriptor>> {
        load_repos(&self.repos_dir)
    }
}

/// One table of a `.repo` file
#[derive(Debug, Deserialize)]
struct RepoSection {
    name: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_true")]
    autorefresh: bool,
    baseurl: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default)]
    keeppackages: bool,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Read every `*.repo` file of `dir`, in file-name order
///
/// A missing directory yields no repositories. Repositories without a base
/// URL or with an unknown type are skipped with a warning.
pub fn load_repos(dir: &Path) -> Result<Vec<RepoDescriptor>> {
    if !dir.is_dir() {
        debug!("No repository directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "repo"))
        .collect();
    files.sort();

    let mut repos = Vec::new();
    for file in files {
        let content = fs::read_to_string(&file)?;
        let sections: BTreeMap<String, RepoSection> = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", file.display(), e)))?;

        for (alias, section) in sections {
            if let Some(desc) = descriptor(alias, section) {
                repos.push(desc);
            }
        }
    }

    debug!("Configured {} repositories", repos.len());
    Ok(repos)
}

fn descriptor(alias: String, section: RepoSection) -> Option<RepoDescriptor> {
    let Some(baseurl) = section.baseurl else {
        warn!("repo '{}' has no baseurl, skipped", alias);
        return None;
    };
    let kind = match section.kind.as_deref().map(str::parse::<MetadataKind>) {
        None => MetadataKind::RpmMd,
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            warn!("repo '{}': {}, skipped", alias, e);
            return None;
        }
    };

    let baseurl = if kind == MetadataKind::Susetags {
        format!("{}/suse", baseurl.trim_end_matches('/'))
    } else {
        baseurl
    };

    let mut desc = RepoDescriptor::new(alias, baseurl);
    if let Some(name) = section.name {
        desc.name = name;
    }
    desc.kind = kind;
    desc.enabled = section.enabled;
    desc.autorefresh = section.autorefresh;
    desc.priority = section.priority;
    desc.keeppackages = section.keeppackages;
    Some(desc)
}
