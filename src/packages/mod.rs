// src/packages/mod.rs

//! Package file support
//!
//! Downloaded packages are RPM files; their headers are read at commit time.

pub mod rpm;

pub use rpm::{HeaderFile, RpmHeader};
