// src/packages/rpm.rs

//! RPM header reader
//!
//! Reads the metadata a commit needs from a downloaded package file:
//! identity, dependencies, and the owned file list.

use crate::error::{Error, Result};
use crate::pool::{Dependency, RelFlags, Solvable};
use rpm::{DependencyFlags, Package};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// A file owned by a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFile {
    pub path: String,
    pub is_dir: bool,
}

/// Metadata of an RPM package file
#[derive(Debug, Clone)]
pub struct RpmHeader {
    /// Package record built from the header
    pub package: Solvable,
    pub files: Vec<HeaderFile>,
}

impl RpmHeader {
    /// Parse the header of the package at `path`
    pub fn read(path: &Path) -> Result<Self> {
        debug!("Reading RPM header: {}", path.display());

        let file = File::open(path)
            .map_err(|e| Error::InitError(format!("Failed to open RPM file {}: {}", path.display(), e)))?;
        let mut buf_reader = BufReader::new(file);

        let pkg = Package::parse(&mut buf_reader)
            .map_err(|e| Error::ParseError(format!("Failed to parse RPM {}: {}", path.display(), e)))?;
        let md = &pkg.metadata;

        let name = md
            .get_name()
            .map_err(|e| Error::ParseError(format!("Failed to get package name: {}", e)))?;
        let version = md
            .get_version()
            .map_err(|e| Error::ParseError(format!("Failed to get package version: {}", e)))?;
        let epoch = md.get_epoch().unwrap_or(0);
        let release = md.get_release().ok();
        let arch = md.get_arch().unwrap_or("noarch");

        let mut evr = String::new();
        if epoch > 0 {
            evr.push_str(&format!("{}:", epoch));
        }
        evr.push_str(version);
        if let Some(release) = release.filter(|r| !r.is_empty()) {
            evr.push('-');
            evr.push_str(release);
        }

        let mut package = Solvable::new(name, evr, arch);
        package.vendor = md.get_vendor().ok().map(str::to_string);
        package.summary = md.get_summary().ok().map(str::to_string);
        package.description = md.get_description().ok().map(str::to_string);
        package.url = md.get_url().ok().map(str::to_string);
        package.license = md.get_license().ok().map(str::to_string);
        package.install_size = md.get_installed_size().unwrap_or(0);

        package.provides = convert(md.get_provides().unwrap_or_default());
        package.requires = convert(md.get_requires().unwrap_or_default());
        package.conflicts = convert(md.get_conflicts().unwrap_or_default());
        package.obsoletes = convert(md.get_obsoletes().unwrap_or_default());

        let files: Vec<HeaderFile> = md
            .get_file_entries()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| HeaderFile {
                path: entry.path.to_string_lossy().to_string(),
                is_dir: entry.mode.raw_mode() as u32 & S_IFMT == S_IFDIR,
            })
            .collect();
        package.files = files.iter().map(|f| f.path.clone()).collect();

        debug!(
            "Parsed RPM: {} ({} files, {} requires)",
            package,
            files.len(),
            package.requires.len()
        );

        Ok(Self { package, files })
    }

    /// Paths of regular (non-directory) files
    pub fn regular_files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().filter(|f| !f.is_dir).map(|f| f.path.as_str())
    }
}

fn convert(deps: Vec<rpm::Dependency>) -> Vec<Dependency> {
    deps.into_iter()
        .map(|dep| {
            let mut flags = RelFlags::empty();
            if dep.flags.contains(DependencyFlags::LESS) {
                flags |= RelFlags::LT;
            }
            if dep.flags.contains(DependencyFlags::EQUAL) {
                flags |= RelFlags::EQ;
            }
            if dep.flags.contains(DependencyFlags::GREATER) {
                flags |= RelFlags::GT;
            }
            if flags.is_empty() || dep.version.is_empty() {
                Dependency::new(dep.name)
            } else {
                Dependency::versioned(dep.name, flags, dep.version)
            }
        })
        .collect()
}
