//! Error types for raidlog-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the raidlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File watcher could not be created or attached
    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Called outside a tokio runtime
    #[error("runtime error: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// JSON error (network snapshot column)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Game log folder missing or unusable
    #[error("log folder not found: {}", .0.display())]
    LogFolderNotFound(PathBuf),

    /// No game log folder configured and no platform default exists
    #[error("no game log folder configured for this platform")]
    NoLogFolder,
}

/// Result type alias for raidlog-core
pub type Result<T> = std::result::Result<T, Error>;
