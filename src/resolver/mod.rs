// src/resolver/mod.rs

//! Atom resolution
//!
//! Turns a user-supplied atom into jobs for the resolution engine. An atom
//! is tried, in order, as:
//!
//! 1. a file path (`/usr/bin/foo`, `/etc/*.conf`)
//! 2. a relational expression (`foo >= 2.0`, `foo.i586<3`)
//! 3. a bare token: name or capability, `name.arch`, `name-version`,
//!    `name-version-release`
//!
//! Name and capability lookups fall back to glob expansion when the token
//! contains `*`, `?` or `[`.

pub mod job;

pub use job::{Constraint, Job, JobModifiers, Selector, narrow};

use crate::command::Command;
use crate::pool::{Pool, RelFlags};
use job::narrow_evr_with_arch;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Diagnostics about how an atom was matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchNote {
    /// The atom matched through package file lists
    FileList(String),
    /// The atom matched provided capabilities rather than package names
    Capability(String),
}

impl fmt::Display for MatchNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchNote::FileList(atom) => write!(f, "[using file list match for '{}']", atom),
            MatchNote::Capability(atom) => write!(f, "[using capability match for '{}']", atom),
        }
    }
}

/// Translates atoms into jobs against a package universe
pub struct AtomResolver<'a> {
    pool: &'a mut Pool,
    notes: Vec<MatchNote>,
}

impl<'a> AtomResolver<'a> {
    /// The pool's capability index must be current
    pub fn new(pool: &'a mut Pool) -> Self {
        Self {
            pool,
            notes: Vec::new(),
        }
    }

    /// Diagnostics collected so far
    pub fn notes(&self) -> &[MatchNote] {
        &self.notes
    }

    pub fn take_notes(&mut self) -> Vec<MatchNote> {
        std::mem::take(&mut self.notes)
    }

    /// Resolve several atoms, keeping the order they were given in
    pub fn resolve_all<S: AsRef<str>>(&mut self, atoms: &[S], command: Command) -> Vec<(String, Vec<Job>)> {
        atoms
            .iter()
            .map(|atom| {
                let atom = atom.as_ref();
                (atom.to_string(), self.resolve(atom, command))
            })
            .collect()
    }

    /// Resolve one atom; an empty result means nothing matched
    pub fn resolve(&mut self, atom: &str, command: Command) -> Vec<Job> {
        debug!("Resolving atom '{}' for {}", atom, command);

        if atom.starts_with('/') {
            let jobs = self.match_path(atom, command.is_removal());
            if !jobs.is_empty() {
                return jobs;
            }
        }

        if let Some((name, flags, evr)) = split_relation(atom) {
            return self.resolve_relation(name, flags, evr);
        }

        let jobs = self.depglob(atom, true, true);
        if !jobs.is_empty() {
            return jobs;
        }

        if let Some((name, arch)) = atom.rsplit_once('.')
            && !name.is_empty()
            && self.pool.is_known_arch(arch)
        {
            let jobs = self.depglob(name, true, true);
            if !jobs.is_empty() {
                return narrow(jobs, Constraint::Arch(arch.to_string()));
            }
        }

        // name-version
        if let Some((name, evr)) = atom.rsplit_once('-')
            && !name.is_empty()
            && !evr.is_empty()
        {
            let jobs = self.depglob(name, true, false);
            if !jobs.is_empty() {
                return narrow_evr_with_arch(self.pool, jobs, RelFlags::EQ, evr);
            }
        }

        // name-version-release
        if let Some((name, evr)) = split_version_release(atom) {
            let jobs = self.depglob(name, true, false);
            if !jobs.is_empty() {
                return narrow_evr_with_arch(self.pool, jobs, RelFlags::EQ, evr);
            }
        }

        Vec::new()
    }

    fn resolve_relation(&mut self, name: &str, flags: RelFlags, evr: &str) -> Vec<Job> {
        let version = Constraint::Version {
            flags,
            evr: evr.to_string(),
        };

        let jobs = self.depglob(name, true, true);
        if !jobs.is_empty() {
            return narrow(jobs, version);
        }

        if let Some((base, arch)) = name.rsplit_once('.')
            && !base.is_empty()
            && self.pool.is_known_arch(arch)
        {
            let jobs = self.depglob(base, true, true);
            if !jobs.is_empty() {
                let jobs = narrow(jobs, Constraint::Arch(arch.to_string()));
                return narrow(jobs, version);
            }
        }

        Vec::new()
    }

    /// Match an absolute path against package file lists
    fn match_path(&mut self, atom: &str, installed_only: bool) -> Vec<Job> {
        let matches: Vec<_> = self
            .pool
            .search_files(atom, has_glob_chars(atom), installed_only)
            .into_iter()
            .filter(|&id| self.pool.installable(id))
            .collect();

        match matches.as_slice() {
            [] => Vec::new(),
            [single] => {
                self.note(MatchNote::FileList(atom.to_string()));
                vec![Job::new(Selector::Package(*single))]
            }
            _ => {
                self.note(MatchNote::FileList(atom.to_string()));
                vec![Job::new(Selector::OneOf(matches))]
            }
        }
    }

    /// Name and capability resolution
    fn depglob(&mut self, token: &str, match_name: bool, match_capability: bool) -> Vec<Job> {
        if self.pool.is_known_token(token) {
            let providers = self.pool.providers(token);
            if match_name
                && providers
                    .iter()
                    .any(|&id| self.pool.solvable(id).name == token)
            {
                return vec![Job::name(token)];
            }
            if !providers.is_empty() {
                if match_name && match_capability {
                    self.note(MatchNote::Capability(token.to_string()));
                }
                return vec![Job::provides(token)];
            }
        }

        if !has_glob_chars(token) {
            return Vec::new();
        }
        let Ok(pattern) = glob::Pattern::new(token) else {
            debug!("Invalid glob '{}'", token);
            return Vec::new();
        };

        if match_name {
            let names: BTreeSet<&str> = self
                .pool
                .packages()
                .filter(|(id, s)| self.pool.installable(*id) && pattern.matches(&s.name))
                .map(|(_, s)| s.name.as_str())
                .collect();
            if !names.is_empty() {
                return names.into_iter().map(Job::name).collect();
            }
        }

        if match_capability {
            let tokens: BTreeSet<&str> = self
                .pool
                .provided_tokens()
                .filter(|t| pattern.matches(t))
                .collect();
            if !tokens.is_empty() {
                let jobs: Vec<Job> = tokens.into_iter().map(Job::provides).collect();
                self.note(MatchNote::Capability(token.to_string()));
                return jobs;
            }
        }

        Vec::new()
    }

    fn note(&mut self, note: MatchNote) {
        info!("{}", note);
        self.notes.push(note);
    }
}

/// True if the token contains shell glob metacharacters
pub fn has_glob_chars(token: &str) -> bool {
    token.contains(['*', '?', '['])
}

/// Split `name <op> evr`; whitespace around the operator is allowed
fn split_relation(atom: &str) -> Option<(&str, RelFlags, &str)> {
    let start = atom.find(['<', '=', '>'])?;
    let name = atom[..start].trim_end();
    let rest = &atom[start..];
    let op_len = rest
        .find(|c: char| !matches!(c, '<' | '=' | '>'))
        .unwrap_or(rest.len());
    let flags = RelFlags::from_operator(&rest[..op_len])?;
    let evr = rest[op_len..].trim();

    if name.is_empty() || evr.is_empty() {
        return None;
    }
    Some((name, flags, evr))
}

/// Split `name-version-release` on the last two dashes
fn split_version_release(atom: &str) -> Option<(&str, &str)> {
    let (head, release) = atom.rsplit_once('-')?;
    let (name, version) = head.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() || release.is_empty() {
        return None;
    }
    Some((name, &atom[name.len() + 1..]))
}
