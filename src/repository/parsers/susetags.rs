// src/repository/parsers/susetags.rs

//! susetags repository metadata parser
//!
//! A susetags repository is described by a `content` file listing the
//! metadata files with their checksums. Package records live in tag files:
//! single-line tags look like `=Tag: value`, multi-line tags are wrapped in
//! `+Tag:` / `-Tag:` lines.

use super::parse_dependency;
use crate::error::{Error, Result};
use crate::hash::{Checksum, ChecksumKind};
use crate::pool::Solvable;
use std::io::BufRead;
use tracing::debug;

/// Default directory holding the package descriptions
pub const DEFAULT_DESCRDIR: &str = "suse/setup/descr";

/// Default directory holding the packages
pub const DEFAULT_DATADIR: &str = "suse";

/// Parsed `content` file
#[derive(Debug, Clone, Default)]
pub struct Content {
    pub label: Option<String>,
    pub descrdir: Option<String>,
    pub datadir: Option<String>,
    pub default_vendor: Option<String>,
    /// Metadata files listed by META lines
    pub files: Vec<(String, Option<Checksum>)>,
}

impl Content {
    pub fn descrdir(&self) -> &str {
        self.descrdir.as_deref().unwrap_or(DEFAULT_DESCRDIR)
    }

    pub fn datadir(&self) -> &str {
        self.datadir.as_deref().unwrap_or(DEFAULT_DATADIR)
    }

    /// A listed metadata file and its checksum, if any
    pub fn find(&self, name: &str) -> Option<(&str, Option<&Checksum>)> {
        self.files
            .iter()
            .find(|(file, _)| file == name)
            .map(|(file, sum)| (file.as_str(), sum.as_ref()))
    }
}

/// Parse a `content` file
pub fn parse_content<R: BufRead>(input: R) -> Result<Content> {
    let mut content = Content::default();

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();

        match key {
            "LABEL" => content.label = Some(value.to_string()),
            "DESCRDIR" => content.descrdir = Some(value.to_string()),
            "DATADIR" => content.datadir = Some(value.to_string()),
            "VENDOR" | "DEFAULTVENDOR" => content.default_vendor = Some(value.to_string()),
            "META" => {
                let fields: Vec<&str> = value.split_whitespace().collect();
                let [kind, digest, file] = fields[..] else {
                    return Err(Error::ParseError(format!("Malformed META line: {}", line)));
                };
                let checksum = kind
                    .parse::<ChecksumKind>()
                    .ok()
                    .and_then(|kind| Checksum::from_hex(kind, digest));
                content.files.push((file.to_string(), checksum));
            }
            _ => {}
        }
    }

    Ok(content)
}

/// Split a `name version release arch` package header
fn parse_pkg_header(value: &str) -> Result<(String, String, String)> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    match fields[..] {
        [name, version, release, arch] => Ok((
            name.to_string(),
            format!("{}-{}", version, release),
            arch.to_string(),
        )),
        _ => Err(Error::ParseError(format!("Malformed =Pkg: line: {}", value))),
    }
}

/// Iterate over tag records
///
/// Calls `on_tag` for every single-line tag and once per multi-line block
/// with the block's lines joined by newlines.
fn for_each_tag<R, F>(input: R, mut on_tag: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(&str, String) -> Result<()>,
{
    let mut block: Option<(String, Vec<String>)> = None;

    for line in input.lines() {
        let line = line?;

        if let Some((tag, lines)) = &mut block {
            if line.strip_prefix('-').and_then(|l| l.strip_suffix(':')) == Some(tag.as_str()) {
                let (tag, lines) = block.take().unwrap_or_default();
                on_tag(&tag, lines.join("\n"))?;
            } else {
                lines.push(line);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('=') {
            if let Some((tag, value)) = rest.split_once(':') {
                on_tag(tag, value.trim().to_string())?;
            }
        } else if let Some(tag) = line.strip_prefix('+').and_then(|l| l.strip_suffix(':')) {
            block = Some((tag.to_string(), Vec::new()));
        }
    }

    Ok(())
}

/// Parse a `packages` file into package records
///
/// Packages without their own vendor get `default_vendor`. Locations are
/// relative to the repository root: `<datadir>/<arch>/<file>`, or
/// `<datadir>/<dir>/<file>` when the record names a directory.
pub fn parse_packages<R: BufRead>(
    input: R,
    datadir: &str,
    default_vendor: Option<&str>,
) -> Result<Vec<Solvable>> {
    let mut packages: Vec<Solvable> = Vec::new();

    for_each_tag(input, |tag, value| {
        if tag == "Pkg" {
            let (name, evr, arch) = parse_pkg_header(&value)?;
            let mut solvable = Solvable::new(name, evr, arch);
            solvable.vendor = default_vendor.map(str::to_string);
            packages.push(solvable);
            return Ok(());
        }
        let Some(pkg) = packages.last_mut() else {
            return Ok(());
        };

        match tag {
            "Cks" => {
                let mut fields = value.split_whitespace();
                if let (Some(kind), Some(digest)) = (fields.next(), fields.next()) {
                    pkg.checksum = kind
                        .parse::<ChecksumKind>()
                        .ok()
                        .and_then(|kind| Checksum::from_hex(kind, digest));
                }
            }
            "Loc" => {
                let fields: Vec<&str> = value.split_whitespace().collect();
                pkg.location = match fields[..] {
                    [_, file] => Some(format!("{}/{}/{}", datadir, pkg.arch, file)),
                    [_, file, dir, ..] => Some(format!("{}/{}/{}", datadir, dir, file)),
                    _ => None,
                };
            }
            "Siz" => {
                let mut fields = value.split_whitespace().map(|f| f.parse::<u64>().unwrap_or(0));
                pkg.download_size = fields.next().unwrap_or(0);
                pkg.install_size = fields.next().unwrap_or(0);
            }
            "Vnd" => pkg.vendor = Some(value),
            "Lic" => pkg.license = Some(value),
            "Url" => pkg.url = Some(value),
            "Prv" => {
                for dep in value.lines().filter_map(parse_dependency) {
                    if dep.name.starts_with('/') {
                        pkg.files.push(dep.name.clone());
                    }
                    pkg.provides.push(dep);
                }
            }
            "Req" | "Prq" => pkg.requires.extend(value.lines().filter_map(parse_dependency)),
            "Con" => pkg.conflicts.extend(value.lines().filter_map(parse_dependency)),
            "Obs" => pkg.obsoletes.extend(value.lines().filter_map(parse_dependency)),
            _ => {}
        }
        Ok(())
    })?;

    debug!("Parsed {} packages from susetags data", packages.len());
    Ok(packages)
}

/// Localized text for one package from `packages.<lang>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    pub name: String,
    pub evr: String,
    pub arch: String,
    pub summary: Option<String>,
    pub description: Option<String>,
}

/// Parse a `packages.en` file
pub fn parse_translations<R: BufRead>(input: R) -> Result<Vec<Translation>> {
    let mut translations: Vec<Translation> = Vec::new();

    for_each_tag(input, |tag, value| {
        match tag {
            "Pkg" => {
                let (name, evr, arch) = parse_pkg_header(&value)?;
                translations.push(Translation {
                    name,
                    evr,
                    arch,
                    ..Default::default()
                });
            }
            "Sum" => {
                if let Some(t) = translations.last_mut() {
                    t.summary = Some(value);
                }
            }
            "Des" => {
                if let Some(t) = translations.last_mut() {
                    t.description = Some(value);
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(translations)
}
