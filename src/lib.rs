// src/lib.rs

//! Kiln Package Manager
//!
//! Front end of an RPM package manager: reads repository metadata through a
//! cookie-validated cache, turns command-line atoms into jobs, and drives
//! the resulting transaction through download and commit.
//!
//! # Architecture
//!
//! - Cache-first: parsed metadata is stored per repository with a trailing
//!   cookie and reused until the source changes
//! - Lazy extensions: file lists and delta info load on first access
//! - Atoms: paths, relations, globs and name-version strings become jobs
//! - Pluggable seams: resolution engine and commit backend are traits

pub mod command;
pub mod compression;
pub mod config;
pub mod db;
mod error;
pub mod hash;
pub mod packages;
pub mod pool;
pub mod repository;
pub mod resolver;
pub mod solver;
pub mod transaction;
pub mod version;

pub use error::{Error, Result};
