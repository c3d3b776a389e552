//! Custom error types for sgrep
//!
//! Uses thiserror for ergonomic error definitions with automatic
//! Display and Error trait implementations. Only failures that affect a
//! whole operation surface here; per-file and per-message problems are
//! absorbed where they happen.

use thiserror::Error;

/// Application-specific errors for sgrep
#[derive(Error, Debug)]
pub enum SgrepError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The search pattern did not compile
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Embedding service unreachable or returned something unusable
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index operations failed
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No index exists at the expected location
    #[error("No index found. Run `sgrep --index` first.")]
    NoIndex,

    /// Invalid file or directory path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Another indexing pass holds the index lock
    #[error("Index is locked: {0}")]
    Locked(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SgrepError>;
