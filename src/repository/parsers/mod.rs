// src/repository/parsers/mod.rs

//! Repository metadata parsers for the supported layouts
//!
//! This module provides parsers for:
//! - rpm-md: repomd.xml, primary.xml, filelists.xml and deltainfo.xml
//! - susetags: the `content` index and `packages` / `packages.en` tag files
//!
//! Parsers are pure: they turn a reader into records and leave fetching,
//! caching and attaching the records to a repo to the caller.

pub mod rpmmd;
pub mod susetags;

use crate::pool::{Dependency, RelFlags};
use quick_xml::events::BytesStart;
use std::collections::HashMap;

/// Build an `[epoch:]version[-release]` string; epoch 0 is omitted
pub fn evr_string(epoch: Option<&str>, version: &str, release: Option<&str>) -> String {
    let mut evr = String::new();
    if let Some(epoch) = epoch.filter(|e| !e.is_empty() && *e != "0") {
        evr.push_str(epoch);
        evr.push(':');
    }
    evr.push_str(version);
    if let Some(release) = release.filter(|r| !r.is_empty()) {
        evr.push('-');
        evr.push_str(release);
    }
    evr
}

/// Parse a textual dependency such as `libfoo.so.1` or `bar >= 1.0-2`
pub fn parse_dependency(text: &str) -> Option<Dependency> {
    let mut parts = text.split_whitespace();
    let name = parts.next()?;
    match (parts.next(), parts.next()) {
        (Some(op), Some(evr)) => match RelFlags::from_operator(op) {
            Some(flags) => Some(Dependency::versioned(name, flags, evr)),
            None => Some(Dependency::new(name)),
        },
        _ => Some(Dependency::new(name)),
    }
}

/// Attributes of an XML element keyed by local name
pub(crate) fn attributes(e: &BytesStart<'_>) -> HashMap<String, String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
            let value = match attr.unescape_value() {
                Ok(v) => v.to_string(),
                Err(_) => String::from_utf8_lossy(&attr.value).to_string(),
            };
            (key, value)
        })
        .collect()
}

/// Local name of an XML element as an owned string
pub(crate) fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}
