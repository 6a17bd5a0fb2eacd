// src/error.rs

use thiserror::Error;

/// Core error types for Kiln
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Configuration file could not be read or is malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata or package header could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// HTTP client setup or transport plumbing failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Cache blob could not be serialized or ingested
    #[error("Cache error: {0}")]
    Cache(String),

    /// Repository metadata could not be fetched at all
    #[error("Repository '{alias}' unavailable: {reason}")]
    RepoUnavailable { alias: String, reason: String },

    /// Content verification failed
    #[error("Checksum mismatch for {path}")]
    ChecksumInvalid { path: String },

    /// A package required by the transaction could not be retrieved
    #[error("{alias}: {location} not found in repository")]
    DownloadMissing { alias: String, location: String },

    /// The commit collaborator rejected the batch before applying it
    #[error("Transaction check failed:\n{}", .0.join("\n"))]
    CommitConflict(Vec<String>),

    /// The commit collaborator reported problems while applying the batch
    #[error("Transaction failed:\n{}", .0.join("\n"))]
    CommitFailure(Vec<String>),
}

/// Result type alias using Kiln's Error type
pub type Result<T> = std::result::Result<T, Error>;
