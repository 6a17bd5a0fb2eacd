// src/solver/mod.rs

//! Resolution engine seam
//!
//! Jobs produced by the atom resolver are wrapped into requests (install,
//! erase, update) and handed to a `ResolutionEngine`, which answers with
//! either a transaction or a list of problems. Problems are reported and
//! halt the command; they are never resolved automatically.

pub mod direct;

pub use direct::DirectEngine;

use crate::command::Command;
use crate::pool::Pool;
use crate::resolver::{Job, Selector};
use crate::transaction::Transaction;
use std::fmt;

/// What a request asks the engine to do with a job's packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Install,
    Erase,
    Update,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Install => write!(f, "install"),
            Action::Erase => write!(f, "erase"),
            Action::Update => write!(f, "update"),
        }
    }
}

/// A job with the action to apply to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub action: Action,
    pub job: Job,
}

impl Request {
    pub fn new(action: Action, job: Job) -> Self {
        Self { action, job }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.job)
    }
}

/// Build engine requests for a command
///
/// `update` without jobs updates everything installed. An update job none of
/// whose packages is installed becomes an install.
pub fn requests_for(pool: &Pool, command: Command, jobs: Vec<Job>) -> Vec<Request> {
    match command {
        Command::Install => jobs.into_iter().map(|j| Request::new(Action::Install, j)).collect(),
        Command::Remove => jobs.into_iter().map(|j| Request::new(Action::Erase, j)).collect(),
        Command::Update if jobs.is_empty() => vec![Request::new(Action::Update, Job::new(Selector::All))],
        Command::Update => jobs
            .into_iter()
            .map(|job| {
                let installed = matches!(job.selector(), Selector::All)
                    || job.packages(pool).into_iter().any(|id| pool.is_installed(id));
                let action = if installed { Action::Update } else { Action::Install };
                Request::new(action, job)
            })
            .collect(),
        Command::Search | Command::List | Command::Info => Vec::new(),
    }
}

/// The rule a problem was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// A request matches nothing
    JobNothingProvides,
    /// The package cannot be installed on this architecture
    NotInstallable,
    /// A requirement of a package nobody provides
    NothingProvidesDep,
    /// Two packages of the result conflict
    PackageConflict,
    /// Requests contradict each other
    ConflictingRequests,
}

/// One element of a proposed solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolutionElement {
    /// Drop the request with this index
    DropRequest { request: usize, description: String },
    DoNotInstall(String),
    AllowErase(String),
}

impl fmt::Display for SolutionElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionElement::DropRequest { description, .. } => write!(f, "do not ask to {}", description),
            SolutionElement::DoNotInstall(p) => write!(f, "do not install {}", p),
            SolutionElement::AllowErase(p) => write!(f, "allow deinstallation of {}", p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub elements: Vec<SolutionElement>,
}

/// A reason the requests cannot be satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub rule: RuleKind,
    /// Package the rule belongs to
    pub source: Option<String>,
    /// Package the rule points at
    pub target: Option<String>,
    pub dep: Option<String>,
    /// Index of the originating request
    pub request: Option<usize>,
    pub solutions: Vec<Solution>,
}

impl Problem {
    pub fn new(rule: RuleKind) -> Self {
        Self {
            rule,
            source: None,
            target: None,
            dep: None,
            request: None,
            solutions: Vec::new(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.source.as_deref().unwrap_or("?");
        let target = self.target.as_deref().unwrap_or("?");
        let dep = self.dep.as_deref().unwrap_or("?");
        match self.rule {
            RuleKind::JobNothingProvides => write!(f, "nothing provides requested {}", dep),
            RuleKind::NotInstallable => write!(f, "package {} is not installable", target),
            RuleKind::NothingProvidesDep => write!(f, "nothing provides {} needed by {}", dep, source),
            RuleKind::PackageConflict => {
                write!(f, "package {} conflicts with {} provided by {}", source, dep, target)
            }
            RuleKind::ConflictingRequests => write!(f, "conflicting requests"),
        }
    }
}

/// Engine answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Problems(Vec<Problem>),
    Transaction(Transaction),
}

/// External resolution engine contract
pub trait ResolutionEngine {
    fn solve(&mut self, pool: &Pool, requests: &[Request]) -> Resolution;
}
