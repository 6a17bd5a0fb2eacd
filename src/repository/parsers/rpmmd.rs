// src/repository/parsers/rpmmd.rs

//! rpm-md repository metadata parser
//!
//! Parses `repomd.xml` (the index), `primary.xml` (package records),
//! `filelists.xml` (complete file lists) and `deltainfo.xml` /
//! `prestodelta.xml` (delta rpms).

use super::{attributes, evr_string, local_name};
use crate::error::{Error, Result};
use crate::hash::{Checksum, ChecksumKind};
use crate::pool::{DeltaInfo, Dependency, RelFlags, Solvable};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::BufRead;
use tracing::{debug, warn};

/// One `<data>` entry of repomd.xml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepomdEntry {
    pub data_type: String,
    pub location: String,
    pub checksum: Option<Checksum>,
}

/// Parsed repomd.xml
#[derive(Debug, Clone, Default)]
pub struct Repomd {
    pub revision: Option<String>,
    pub entries: Vec<RepomdEntry>,
}

impl Repomd {
    /// Location and checksum of a data type
    ///
    /// Entries without a usable checksum are ignored.
    pub fn find(&self, data_type: &str) -> Option<(&str, &Checksum)> {
        for entry in self.entries.iter().filter(|e| e.data_type == data_type) {
            match &entry.checksum {
                Some(sum) => return Some((entry.location.as_str(), sum)),
                None => warn!("no {} file checksum!", entry.location),
            }
        }
        None
    }
}

fn xml_error(what: &str, e: quick_xml::Error) -> Error {
    Error::ParseError(format!("Failed to parse {}: {}", what, e))
}

fn checksum_from(kind: Option<&str>, hex: &str) -> Option<Checksum> {
    let kind: ChecksumKind = kind?.parse().ok()?;
    Checksum::from_hex(kind, hex)
}

/// Parse repomd.xml
pub fn parse_repomd<R: BufRead>(input: R) -> Result<Repomd> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut repomd = Repomd::default();
    let mut buf = Vec::new();
    let mut text = String::new();

    let mut current: Option<RepomdEntry> = None;
    let mut checksum_type: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                text.clear();
                match local_name(&e).as_str() {
                    "data" => {
                        let attrs = attributes(&e);
                        current = Some(RepomdEntry {
                            data_type: attrs.get("type").cloned().unwrap_or_default(),
                            location: String::new(),
                            checksum: None,
                        });
                    }
                    "checksum" => checksum_type = attributes(&e).remove("type"),
                    "location" => {
                        if let Some(ref mut entry) = current {
                            entry.location = attributes(&e).remove("href").unwrap_or_default();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) if local_name(&e) == "location" => {
                if let Some(ref mut entry) = current {
                    entry.location = attributes(&e).remove("href").unwrap_or_default();
                }
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "revision" if current.is_none() => repomd.revision = Some(text.clone()),
                    "checksum" => {
                        if let Some(ref mut entry) = current {
                            entry.checksum = checksum_from(checksum_type.as_deref(), &text);
                        }
                    }
                    "data" => {
                        if let Some(entry) = current.take() {
                            repomd.entries.push(entry);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("repomd.xml", e)),
            _ => {}
        }
        buf.clear();
    }

    debug!("repomd.xml lists {} data files", repomd.entries.len());
    Ok(repomd)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepSection {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
}

impl DepSection {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "provides" => Some(Self::Provides),
            "requires" => Some(Self::Requires),
            "conflicts" => Some(Self::Conflicts),
            "obsoletes" => Some(Self::Obsoletes),
            _ => None,
        }
    }
}

/// Map rpm-md relation names to flags
fn rel_flags(flags: &str) -> RelFlags {
    match flags {
        "EQ" => RelFlags::EQ,
        "LT" => RelFlags::LT,
        "GT" => RelFlags::GT,
        "LE" => RelFlags::LT | RelFlags::EQ,
        "GE" => RelFlags::GT | RelFlags::EQ,
        _ => RelFlags::empty(),
    }
}

fn dependency_from(attrs: &HashMap<String, String>) -> Option<Dependency> {
    let name = attrs.get("name")?;
    let flags = attrs.get("flags").map(|f| rel_flags(f)).unwrap_or_else(RelFlags::empty);
    match attrs.get("ver") {
        Some(ver) if !flags.is_empty() => Some(Dependency::versioned(
            name.as_str(),
            flags,
            evr_string(
                attrs.get("epoch").map(String::as_str),
                ver,
                attrs.get("rel").map(String::as_str),
            ),
        )),
        _ => Some(Dependency::new(name.as_str())),
    }
}

/// Builder for constructing a Solvable from primary.xml events
#[derive(Default)]
struct PackageBuilder {
    name: Option<String>,
    epoch: Option<String>,
    ver: Option<String>,
    rel: Option<String>,
    arch: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    url: Option<String>,
    license: Option<String>,
    vendor: Option<String>,
    checksum: Option<String>,
    checksum_type: Option<String>,
    size_package: Option<String>,
    size_installed: Option<String>,
    location: Option<String>,
    provides: Vec<Dependency>,
    requires: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    obsoletes: Vec<Dependency>,
    files: Vec<String>,
}

impl PackageBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn add_dependency(&mut self, section: DepSection, dep: Dependency) {
        match section {
            // rpmlib() requirements are satisfied by rpm itself
            DepSection::Requires if dep.name.starts_with("rpmlib(") => {}
            DepSection::Provides => self.provides.push(dep),
            DepSection::Requires => self.requires.push(dep),
            DepSection::Conflicts => self.conflicts.push(dep),
            DepSection::Obsoletes => self.obsoletes.push(dep),
        }
    }

    fn build(self) -> Result<Solvable> {
        let name = self
            .name
            .ok_or_else(|| Error::ParseError("Missing package name".to_string()))?;
        let ver = self
            .ver
            .ok_or_else(|| Error::ParseError(format!("Missing version for {}", name)))?;
        let arch = self
            .arch
            .ok_or_else(|| Error::ParseError(format!("Missing architecture for {}", name)))?;

        let evr = evr_string(self.epoch.as_deref(), &ver, self.rel.as_deref());
        let mut solvable = Solvable::new(name, evr, arch);

        solvable.checksum = self
            .checksum
            .as_deref()
            .and_then(|hex| checksum_from(self.checksum_type.as_deref(), hex));
        solvable.download_size = self.size_package.and_then(|s| s.parse().ok()).unwrap_or(0);
        solvable.install_size = self.size_installed.and_then(|s| s.parse().ok()).unwrap_or(0);
        solvable.summary = self.summary;
        solvable.description = self.description;
        solvable.url = self.url;
        solvable.license = self.license;
        solvable.vendor = self.vendor;
        solvable.location = self.location;
        solvable.provides = self.provides;
        solvable.requires = self.requires;
        solvable.conflicts = self.conflicts;
        solvable.obsoletes = self.obsoletes;
        solvable.files = self.files;
        Ok(solvable)
    }
}

/// Parse primary.xml into package records
pub fn parse_primary<R: BufRead>(input: R) -> Result<Vec<Solvable>> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut packages = Vec::new();
    let mut buf = Vec::new();
    let mut text = String::new();

    let mut current_package: Option<PackageBuilder> = None;
    let mut section: Option<DepSection> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                text.clear();
                let tag = local_name(&e);
                match tag.as_str() {
                    "package" => current_package = Some(PackageBuilder::new()),
                    "checksum" => {
                        if let Some(ref mut pkg) = current_package {
                            pkg.checksum_type = attributes(&e).remove("type");
                        }
                    }
                    _ => section = DepSection::from_tag(&tag).or(section),
                }
            }
            Ok(Event::Empty(e)) => {
                let Some(ref mut pkg) = current_package else {
                    buf.clear();
                    continue;
                };
                let attrs = attributes(&e);
                match local_name(&e).as_str() {
                    "version" => {
                        pkg.epoch = attrs.get("epoch").cloned();
                        pkg.ver = attrs.get("ver").cloned();
                        pkg.rel = attrs.get("rel").cloned();
                    }
                    "size" => {
                        pkg.size_package = attrs.get("package").cloned();
                        pkg.size_installed = attrs.get("installed").cloned();
                    }
                    "location" => pkg.location = attrs.get("href").cloned(),
                    "entry" => {
                        if let (Some(section), Some(dep)) = (section, dependency_from(&attrs)) {
                            pkg.add_dependency(section, dep);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if tag == "package" {
                    if let Some(builder) = current_package.take() {
                        match builder.build() {
                            Ok(pkg) => packages.push(pkg),
                            Err(e) => debug!("Skipping package record: {}", e),
                        }
                    }
                } else if DepSection::from_tag(&tag).is_some() {
                    section = None;
                } else if let Some(ref mut pkg) = current_package {
                    let value = std::mem::take(&mut text);
                    match tag.as_str() {
                        "name" => pkg.name = Some(value),
                        "arch" => pkg.arch = Some(value),
                        "summary" => pkg.summary = Some(value),
                        "description" => pkg.description = Some(value),
                        "url" if !value.is_empty() => pkg.url = Some(value),
                        "checksum" => pkg.checksum = Some(value),
                        "license" => pkg.license = Some(value),
                        "vendor" if !value.is_empty() => pkg.vendor = Some(value),
                        "file" => pkg.files.push(value),
                        _ => {}
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("primary.xml", e)),
            _ => {}
        }
        buf.clear();
    }

    debug!("Parsed {} packages from primary.xml", packages.len());
    Ok(packages)
}

/// Complete file list of one package from filelists.xml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFiles {
    pub name: String,
    pub evr: String,
    pub arch: String,
    pub files: Vec<String>,
}

/// Parse filelists.xml
pub fn parse_filelists<R: BufRead>(input: R) -> Result<Vec<PackageFiles>> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut lists = Vec::new();
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut current: Option<PackageFiles> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                text.clear();
                if local_name(&e) == "package" {
                    let attrs = attributes(&e);
                    current = Some(PackageFiles {
                        name: attrs.get("name").cloned().unwrap_or_default(),
                        evr: String::new(),
                        arch: attrs.get("arch").cloned().unwrap_or_default(),
                        files: Vec::new(),
                    });
                }
            }
            Ok(Event::Empty(e)) if local_name(&e) == "version" => {
                if let Some(ref mut pkg) = current {
                    let attrs = attributes(&e);
                    pkg.evr = evr_string(
                        attrs.get("epoch").map(String::as_str),
                        attrs.get("ver").map(String::as_str).unwrap_or_default(),
                        attrs.get("rel").map(String::as_str),
                    );
                }
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"file" => {
                        if let Some(ref mut pkg) = current {
                            pkg.files.push(std::mem::take(&mut text));
                        }
                    }
                    b"package" => {
                        if let Some(pkg) = current.take() {
                            lists.push(pkg);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("filelists.xml", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(lists)
}

/// Parse deltainfo.xml or prestodelta.xml
pub fn parse_deltainfo<R: BufRead>(input: R) -> Result<Vec<DeltaInfo>> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut deltas = Vec::new();
    let mut buf = Vec::new();
    let mut text = String::new();

    // (name, evr, arch) of the enclosing <newpackage>
    let mut target: Option<(String, String, String)> = None;
    let mut delta: Option<DeltaInfo> = None;
    let mut checksum_type: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                text.clear();
                let attrs = attributes(&e);
                match local_name(&e).as_str() {
                    "newpackage" => {
                        target = Some((
                            attrs.get("name").cloned().unwrap_or_default(),
                            evr_string(
                                attrs.get("epoch").map(String::as_str),
                                attrs.get("version").map(String::as_str).unwrap_or_default(),
                                attrs.get("release").map(String::as_str),
                            ),
                            attrs.get("arch").cloned().unwrap_or_default(),
                        ));
                    }
                    "delta" => {
                        if let Some((name, evr, arch)) = &target {
                            delta = Some(DeltaInfo {
                                name: name.clone(),
                                evr: evr.clone(),
                                arch: arch.clone(),
                                base_evr: evr_string(
                                    attrs.get("oldepoch").map(String::as_str),
                                    attrs.get("oldversion").map(String::as_str).unwrap_or_default(),
                                    attrs.get("oldrelease").map(String::as_str),
                                ),
                                location: String::new(),
                                checksum: None,
                            });
                        }
                    }
                    "checksum" => checksum_type = attrs.get("type").cloned(),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"filename" => {
                        if let Some(ref mut d) = delta {
                            d.location = text.clone();
                        }
                    }
                    b"checksum" => {
                        if let Some(ref mut d) = delta {
                            d.checksum = checksum_from(checksum_type.as_deref(), &text);
                        }
                    }
                    b"delta" => {
                        if let Some(d) = delta.take() {
                            deltas.push(d);
                        }
                    }
                    b"newpackage" => target = None,
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("deltainfo.xml", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1700000000</revision>
  <data type="primary">
    <checksum type="sha256">e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855</checksum>
    <open-checksum type="sha256">0000000000000000000000000000000000000000000000000000000000000000</open-checksum>
    <location href="repodata/primary.xml.gz"/>
    <size>20</size>
  </data>
  <data type="filelists">
    <checksum type="md5">bogus</checksum>
    <location href="repodata/filelists.xml.gz"/>
  </data>
</repomd>"#;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
<package type="rpm">
  <name>foo</name>
  <arch>x86_64</arch>
  <version epoch="1" ver="2.3.4" rel="5.fc43"/>
  <checksum type="sha256" pkgid="YES">e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855</checksum>
  <summary>The foo tool</summary>
  <description>Does foo &amp; bar.</description>
  <url>https://example.com/foo</url>
  <size package="1024" installed="4096" archive="4200"/>
  <location href="Packages/f/foo-2.3.4-5.fc43.x86_64.rpm"/>
  <format>
    <rpm:license>MIT</rpm:license>
    <rpm:vendor>Example</rpm:vendor>
    <rpm:provides>
      <rpm:entry name="foo" flags="EQ" epoch="1" ver="2.3.4" rel="5.fc43"/>
      <rpm:entry name="webserver"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="rpmlib(CompressedFileNames)" flags="LE" epoch="0" ver="3.0.4" rel="1"/>
      <rpm:entry name="libbar" flags="GE" epoch="0" ver="1.0"/>
    </rpm:requires>
    <file>/usr/bin/foo</file>
  </format>
</package>
<package type="rpm">
  <name>bar</name>
  <arch>noarch</arch>
  <version epoch="0" ver="1.0" rel="1"/>
  <location href="Packages/b/bar-1.0-1.noarch.rpm"/>
</package>
</metadata>"#;

    #[test]
    fn test_parse_repomd() {
        let repomd = parse_repomd(REPOMD.as_bytes()).unwrap();
        assert_eq!(repomd.revision.as_deref(), Some("1700000000"));
        assert_eq!(repomd.entries.len(), 2);

        let (location, sum) = repomd.find("primary").unwrap();
        assert_eq!(location, "repodata/primary.xml.gz");
        assert_eq!(sum.kind, ChecksumKind::Sha256);

        // A malformed checksum makes the entry unusable
        assert!(repomd.find("filelists").is_none());
        assert!(repomd.find("deltainfo").is_none());
    }

    #[test]
    fn test_parse_repomd_sha384() {
        let digest = "a".repeat(96);
        let xml = format!(
            r#"<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <checksum type="sha384">{}</checksum>
    <location href="repodata/primary.xml.zst"/>
  </data>
</repomd>"#,
            digest
        );
        let repomd = parse_repomd(xml.as_bytes()).unwrap();
        let (location, sum) = repomd.find("primary").unwrap();
        assert_eq!(location, "repodata/primary.xml.zst");
        assert_eq!(sum.kind, ChecksumKind::Sha384);
        assert_eq!(sum.to_hex(), digest);
    }

    #[test]
    fn test_parse_primary() {
        let packages = parse_primary(PRIMARY.as_bytes()).unwrap();
        assert_eq!(packages.len(), 2);

        let foo = &packages[0];
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.evr, "1:2.3.4-5.fc43");
        assert_eq!(foo.arch, "x86_64");
        assert_eq!(foo.description.as_deref(), Some("Does foo & bar."));
        assert_eq!(foo.license.as_deref(), Some("MIT"));
        assert_eq!(foo.vendor.as_deref(), Some("Example"));
        assert_eq!(foo.download_size, 1024);
        assert_eq!(foo.install_size, 4096);
        assert_eq!(foo.provides.len(), 2);
        assert_eq!(foo.requires.len(), 1);
        assert_eq!(foo.requires[0].flags, RelFlags::GT | RelFlags::EQ);
        assert_eq!(foo.requires[0].evr.as_deref(), Some("1.0"));
        assert_eq!(foo.files, vec!["/usr/bin/foo".to_string()]);
        assert!(foo.checksum.is_some());

        let bar = &packages[1];
        assert_eq!(bar.evr, "1.0-1");
        assert_eq!(bar.location.as_deref(), Some("Packages/b/bar-1.0-1.noarch.rpm"));
        assert!(bar.checksum.is_none());
    }

    #[test]
    fn test_parse_filelists() {
        let xml = r#"<filelists packages="1">
<package pkgid="abc" name="foo" arch="x86_64">
  <version epoch="1" ver="2.3.4" rel="5.fc43"/>
  <file>/usr/bin/foo</file>
  <file type="dir">/usr/share/foo</file>
  <file>/usr/share/foo/data</file>
</package>
</filelists>"#;
        let lists = parse_filelists(xml.as_bytes()).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].evr, "1:2.3.4-5.fc43");
        assert_eq!(lists[0].files.len(), 3);
    }

    #[test]
    fn test_parse_deltainfo() {
        let xml = r#"<deltainfo>
<newpackage name="foo" epoch="0" version="2.0" release="1" arch="x86_64">
  <delta oldepoch="0" oldversion="1.0" oldrelease="1">
    <filename>drpms/foo-1.0-1_2.0-1.x86_64.drpm</filename>
    <sequence>foo-1.0-1-abcdef</sequence>
    <size>123</size>
    <checksum type="sha256">e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855</checksum>
  </delta>
  <delta oldepoch="0" oldversion="1.5" oldrelease="2">
    <filename>drpms/foo-1.5-2_2.0-1.x86_64.drpm</filename>
  </delta>
</newpackage>
</deltainfo>"#;
        let deltas = parse_deltainfo(xml.as_bytes()).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].evr, "2.0-1");
        assert_eq!(deltas[0].base_evr, "1.0-1");
        assert_eq!(deltas[0].location, "drpms/foo-1.0-1_2.0-1.x86_64.drpm");
        assert!(deltas[0].checksum.is_some());
        assert_eq!(deltas[1].base_evr, "1.5-2");
        assert!(deltas[1].checksum.is_none());
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse_primary("<metadata><package></metadata>".as_bytes()).is_err());
    }
}
