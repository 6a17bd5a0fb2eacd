// src/resolver/job.rs

//! Structured requests against the resolution engine

use crate::pool::{PackageId, Pool, RelFlags};
use crate::version::Evr;
use bitflags::bitflags;
use std::fmt;

/// What a job selects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Packages literally named this
    Name(String),
    /// Packages providing this capability
    Provides(String),
    /// Exactly this package
    Package(PackageId),
    /// Exactly one of these packages; the engine picks
    OneOf(Vec<PackageId>),
    /// Every installed package (update-all)
    All,
}

/// A constraint layered on a name or capability selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Restrict to one architecture
    Arch(String),
    /// Relational version constraint
    Version { flags: RelFlags, evr: String },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Arch(arch) => write!(f, ".{}", arch),
            Constraint::Version { flags, evr } => write!(f, " {} {}", flags.as_operator(), evr),
        }
    }
}

bitflags! {
    /// Modifiers telling the engine how strictly to honour a constraint
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct JobModifiers: u8 {
        /// Keep the architecture of the selected package
        const SET_ARCH = 0b001;
        /// Match epoch and version exactly
        const SET_EV = 0b010;
        /// Match epoch, version and release exactly
        const SET_EVR = 0b100;
    }
}

/// A job: selector, stacked constraints and modifiers
///
/// Jobs are immutable; narrowing builds new jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    selector: Selector,
    constraints: Vec<Constraint>,
    modifiers: JobModifiers,
}

impl Job {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            constraints: Vec::new(),
            modifiers: JobModifiers::empty(),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::new(Selector::Name(name.into()))
    }

    pub fn provides(token: impl Into<String>) -> Self {
        Self::new(Selector::Provides(token.into()))
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn modifiers(&self) -> JobModifiers {
        self.modifiers
    }

    /// The relational constraint, if any (the last one wins)
    pub fn version_constraint(&self) -> Option<(RelFlags, &str)> {
        self.constraints.iter().rev().find_map(|c| match c {
            Constraint::Version { flags, evr } => Some((*flags, evr.as_str())),
            Constraint::Arch(_) => None,
        })
    }

    pub fn arch_constraint(&self) -> Option<&str> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Arch(arch) => Some(arch.as_str()),
            Constraint::Version { .. } => None,
        })
    }

    /// Intersect with an additional constraint
    ///
    /// Returns `None` when the selector cannot carry constraints.
    fn narrowed(&self, constraint: Constraint) -> Option<Job> {
        if !matches!(self.selector, Selector::Name(_) | Selector::Provides(_)) {
            return None;
        }

        let mut modifiers = self.modifiers;
        match &constraint {
            Constraint::Arch(_) => modifiers |= JobModifiers::SET_ARCH,
            Constraint::Version { flags, evr }
                if *flags == RelFlags::EQ && matches!(self.selector, Selector::Name(_)) =>
            {
                if evr.contains('-') {
                    modifiers |= JobModifiers::SET_EVR;
                } else {
                    modifiers |= JobModifiers::SET_EV;
                }
            }
            Constraint::Version { .. } => {}
        }

        let mut constraints = self.constraints.clone();
        constraints.push(constraint);
        Some(Job {
            selector: self.selector.clone(),
            constraints,
            modifiers,
        })
    }

    /// Packages this job selects
    pub fn packages(&self, pool: &Pool) -> Vec<PackageId> {
        let candidates: Vec<PackageId> = match &self.selector {
            Selector::Name(name) => pool
                .providers(name)
                .iter()
                .copied()
                .filter(|&id| pool.solvable(id).name == *name)
                .collect(),
            Selector::Provides(token) => pool.providers(token).to_vec(),
            Selector::Package(id) => vec![*id],
            Selector::OneOf(ids) => ids.clone(),
            Selector::All => pool
                .installed()
                .map(|repo| {
                    (0..pool.repo(repo).solvables.len())
                        .map(|index| PackageId { repo, index })
                        .collect()
                })
                .unwrap_or_default(),
        };

        candidates
            .into_iter()
            .filter(|&id| self.accepts(pool, id))
            .collect()
    }

    fn accepts(&self, pool: &Pool, id: PackageId) -> bool {
        let s = pool.solvable(id);
        self.constraints.iter().all(|c| match c {
            Constraint::Arch(arch) => s.arch == *arch,
            Constraint::Version { flags, evr } => {
                let wanted = Evr::parse(evr);
                match &self.selector {
                    Selector::Provides(token) => s
                        .provides
                        .iter()
                        .filter(|p| p.name == *token)
                        .any(|p| p.provides_match(*flags, &wanted))
                        || (s.name == *token && flags.accepts(s.parsed_evr().compare_match(&wanted))),
                    _ => flags.accepts(s.parsed_evr().compare_match(&wanted)),
                }
            }
        })
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Selector::Name(name) => write!(f, "name {}", name)?,
            Selector::Provides(token) => write!(f, "provides {}", token)?,
            Selector::Package(id) => write!(f, "package {}:{}", id.repo.0, id.index)?,
            Selector::OneOf(ids) => write!(f, "one of {} packages", ids.len())?,
            Selector::All => write!(f, "all packages")?,
        }
        for c in &self.constraints {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Narrow every job in a list
///
/// Jobs whose selector cannot carry the constraint are passed through
/// unchanged.
pub fn narrow(jobs: Vec<Job>, constraint: Constraint) -> Vec<Job> {
    jobs.into_iter()
        .map(|job| job.narrowed(constraint.clone()).unwrap_or(job))
        .collect()
}

/// Narrow by an exact evr that may carry a trailing `.arch`
///
/// `1.0-1.x86_64` becomes an architecture pin plus `= 1.0-1` when the
/// suffix is a known architecture.
pub fn narrow_evr_with_arch(pool: &Pool, jobs: Vec<Job>, flags: RelFlags, evr: &str) -> Vec<Job> {
    if let Some((version, arch)) = evr.rsplit_once('.')
        && !version.is_empty()
        && pool.is_known_arch(arch)
    {
        let jobs = narrow(jobs, Constraint::Arch(arch.to_string()));
        return narrow(
            jobs,
            Constraint::Version {
                flags,
                evr: version.to_string(),
            },
        );
    }
    narrow(
        jobs,
        Constraint::Version {
            flags,
            evr: evr.to_string(),
        },
    )
}
