//! Storage layer: SQLite persistence for traces and their satellites.

pub mod migrations;
mod sqlite;

pub use sqlite::{EdgeRow, PatternSpec, Store, TemperatureRow};

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),
    /// A `(user, trace)` pair already voted
    #[error("duplicate vote")]
    DuplicateVote,
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StoreError>;
