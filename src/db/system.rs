// src/db/system.rs

//! Conversion between installed-package rows and pool records

use super::models::{DependencyEntry, DependencyKind, FileEntry, InstalledPackage};
use crate::error::Result;
use crate::pool::{Dependency, RelFlags, Solvable};
use rusqlite::Connection;
use tracing::debug;

/// Read every installed package as a pool record
///
/// Installed packages carry their complete file list in `files`, so file
/// provides of the system are indexed without an extension.
pub fn read_installed(conn: &Connection) -> Result<Vec<Solvable>> {
    let mut solvables = Vec::new();

    for pkg in InstalledPackage::list_all(conn)? {
        let Some(id) = pkg.id else { continue };
        let mut s = Solvable::new(pkg.name, pkg.evr, pkg.arch);
        s.vendor = pkg.vendor;
        s.summary = pkg.summary;
        s.description = pkg.description;
        s.url = pkg.url;
        s.license = pkg.license;
        s.install_size = u64::try_from(pkg.install_size).unwrap_or(0);
        s.installed_id = Some(id);

        for entry in DependencyEntry::find_by_package(conn, id)? {
            let dep = Dependency {
                name: entry.name,
                flags: RelFlags::from_bits_truncate(entry.flags),
                evr: entry.evr,
            };
            match entry.kind {
                DependencyKind::Provides => s.provides.push(dep),
                DependencyKind::Requires => s.requires.push(dep),
                DependencyKind::Conflicts => s.conflicts.push(dep),
                DependencyKind::Obsoletes => s.obsoletes.push(dep),
            }
        }
        s.files = FileEntry::find_by_package(conn, id)?
            .into_iter()
            .map(|f| f.path)
            .collect();

        solvables.push(s);
    }

    debug!("Read {} installed packages", solvables.len());
    Ok(solvables)
}

/// Record an installed package with its dependencies and files
pub fn record_install(
    conn: &Connection,
    solvable: &Solvable,
    from_repo: Option<&str>,
    changeset_id: i64,
    files: &[String],
) -> Result<i64> {
    let mut pkg = InstalledPackage::new(solvable.name.clone(), solvable.evr.clone(), solvable.arch.clone());
    pkg.vendor = solvable.vendor.clone();
    pkg.summary = solvable.summary.clone();
    pkg.description = solvable.description.clone();
    pkg.url = solvable.url.clone();
    pkg.license = solvable.license.clone();
    pkg.install_size = i64::try_from(solvable.install_size).unwrap_or(i64::MAX);
    pkg.from_repo = from_repo.map(str::to_string);
    pkg.checksum = solvable.checksum.as_ref().map(|c| c.to_string());
    pkg.installed_by_changeset_id = Some(changeset_id);
    let id = pkg.insert(conn)?;

    let lists = [
        (DependencyKind::Provides, &solvable.provides),
        (DependencyKind::Requires, &solvable.requires),
        (DependencyKind::Conflicts, &solvable.conflicts),
        (DependencyKind::Obsoletes, &solvable.obsoletes),
    ];
    for (kind, deps) in lists {
        for dep in deps {
            DependencyEntry::new(id, kind, dep.name.clone(), dep.flags.bits(), dep.evr.clone()).insert(conn)?;
        }
    }
    for path in files {
        FileEntry::new(path.clone(), id).insert(conn)?;
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    #[test]
    fn test_install_then_read_back() {
        let temp = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp.path()).unwrap();
        schema::migrate(&conn).unwrap();

        let mut changeset = crate::db::models::Changeset::new("test".to_string());
        let changeset_id = changeset.insert(&conn).unwrap();

        let mut foo = Solvable::new("foo", "1:1.0-1", "x86_64");
        foo.vendor = Some("Example".to_string());
        foo.provides.push(Dependency::versioned("foo", RelFlags::EQ, "1:1.0-1"));
        foo.requires.push(Dependency::versioned("bar", RelFlags::GT | RelFlags::EQ, "2"));
        foo.install_size = 4096;

        let files = vec!["/usr/bin/foo".to_string(), "/etc/foo.conf".to_string()];
        let id = record_install(&conn, &foo, Some("main"), changeset_id, &files).unwrap();

        let installed = read_installed(&conn).unwrap();
        assert_eq!(installed.len(), 1);
        let s = &installed[0];
        assert_eq!(s.installed_id, Some(id));
        assert_eq!(s.evr, "1:1.0-1");
        assert_eq!(s.install_size, 4096);
        assert_eq!(s.requires[0].flags, RelFlags::GT | RelFlags::EQ);
        assert_eq!(s.files, files);
    }
}
