// src/db/models.rs

//! Data models for installed-package database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

const PACKAGE_COLUMNS: &str = "id, name, evr, arch, vendor, summary, description, url, license, \
     install_size, from_repo, checksum, installed_at, installed_by_changeset_id";

/// An installed package
#[derive(Debug, Clone, Default)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub name: String,
    pub evr: String,
    pub arch: String,
    pub vendor: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    pub install_size: i64,
    /// Alias of the repository the package was installed from
    pub from_repo: Option<String>,
    /// `kind:hex` checksum of the package file
    pub checksum: Option<String>,
    pub installed_at: Option<String>,
    pub installed_by_changeset_id: Option<i64>,
}

impl InstalledPackage {
    pub fn new(name: String, evr: String, arch: String) -> Self {
        Self {
            name,
            evr,
            arch,
            ..Default::default()
        }
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, evr, arch, vendor, summary, description, url, license,
                                   install_size, from_repo, checksum, installed_by_changeset_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &self.name,
                &self.evr,
                &self.arch,
                &self.vendor,
                &self.summary,
                &self.description,
                &self.url,
                &self.license,
                &self.install_size,
                &self.from_repo,
                &self.checksum,
                &self.installed_by_changeset_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all installed versions of a package by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1 ORDER BY evr",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Find the package with an exact name, evr and arch
    pub fn find_exact(conn: &Connection, name: &str, evr: &str, arch: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1 AND evr = ?2 AND arch = ?3",
            PACKAGE_COLUMNS
        ))?;
        let package = stmt.query_row([name, evr, arch], Self::from_row).optional()?;
        Ok(package)
    }

    /// List all installed packages, in insertion order
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM packages ORDER BY id", PACKAGE_COLUMNS))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete a package; its files and dependencies cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Convert a database row to an InstalledPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            evr: row.get(2)?,
            arch: row.get(3)?,
            vendor: row.get(4)?,
            summary: row.get(5)?,
            description: row.get(6)?,
            url: row.get(7)?,
            license: row.get(8)?,
            install_size: row.get(9)?,
            from_repo: row.get(10)?,
            checksum: row.get(11)?,
            installed_at: row.get(12)?,
            installed_by_changeset_id: row.get(13)?,
        })
    }
}

/// Changeset status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetStatus {
    Pending,
    Applied,
    Failed,
}

impl ChangesetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangesetStatus::Pending => "pending",
            ChangesetStatus::Applied => "applied",
            ChangesetStatus::Failed => "failed",
        }
    }
}

/// A Changeset records one committed transaction
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: Option<i64>,
    pub description: String,
    pub status: ChangesetStatus,
}

impl Changeset {
    pub fn new(description: String) -> Self {
        Self {
            id: None,
            description,
            status: ChangesetStatus::Pending,
        }
    }

    /// Insert this changeset into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changesets (description, status) VALUES (?1, ?2)",
            params![&self.description, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Update changeset status
    pub fn update_status(&mut self, conn: &Connection, new_status: ChangesetStatus) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError("Cannot update changeset without ID".to_string()))?;

        if new_status == ChangesetStatus::Applied {
            conn.execute(
                "UPDATE changesets SET status = ?1, applied_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        } else {
            conn.execute(
                "UPDATE changesets SET status = ?1 WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        }

        self.status = new_status;
        Ok(())
    }
}

/// A path owned by an installed package
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub path: String,
    pub package_id: i64,
}

impl FileEntry {
    pub fn new(path: String, package_id: i64) -> Self {
        Self {
            id: None,
            path,
            package_id,
        }
    }

    /// Insert this file into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO files (path, package_id) VALUES (?1, ?2)",
            params![&self.path, &self.package_id],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find every owner of a path
    pub fn find_by_path(conn: &Connection, path: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT id, path, package_id FROM files WHERE path = ?1")?;

        let files = stmt
            .query_map([path], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Find all files belonging to a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt =
            conn.prepare("SELECT id, path, package_id FROM files WHERE package_id = ?1 ORDER BY id")?;

        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            path: row.get(1)?,
            package_id: row.get(2)?,
        })
    }
}

/// Which dependency list an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
}

impl DependencyKind {
    pub fn as_str(&self) -> &str {
        match self {
            DependencyKind::Provides => "provides",
            DependencyKind::Requires => "requires",
            DependencyKind::Conflicts => "conflicts",
            DependencyKind::Obsoletes => "obsoletes",
        }
    }
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "provides" => Ok(DependencyKind::Provides),
            "requires" => Ok(DependencyKind::Requires),
            "conflicts" => Ok(DependencyKind::Conflicts),
            "obsoletes" => Ok(DependencyKind::Obsoletes),
            _ => Err(format!("Invalid dependency kind: {}", s)),
        }
    }
}

/// Dependency entry of an installed package
#[derive(Debug, Clone)]
pub struct DependencyEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub kind: DependencyKind,
    pub name: String,
    /// Relation bits, see [`crate::pool::RelFlags`]
    pub flags: u8,
    pub evr: Option<String>,
}

impl DependencyEntry {
    pub fn new(package_id: i64, kind: DependencyKind, name: String, flags: u8, evr: Option<String>) -> Self {
        Self {
            id: None,
            package_id,
            kind,
            name,
            flags,
            evr,
        }
    }

    /// Insert this dependency into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO dependencies (package_id, kind, name, flags, evr)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.package_id,
                self.kind.as_str(),
                &self.name,
                &self.flags,
                &self.evr,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all dependencies of a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, kind, name, flags, evr
             FROM dependencies WHERE package_id = ?1 ORDER BY id",
        )?;

        let deps = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(deps)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(2)?;
        let kind = kind_str.parse::<DependencyKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            kind,
            name: row.get(3)?,
            flags: row.get(4)?,
            evr: row.get(5)?,
        })
    }
}
