//! CLI error types.

use modlog_core::CoreError;
use modlog_sync_engine::ReplicationError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No instance state in the directory.
    #[error("no modlog instance at {0} (run `modlog init` first)")]
    NotInitialized(PathBuf),

    /// The directory already holds an instance.
    #[error("{0} already holds a modlog instance")]
    AlreadyInitialized(PathBuf),

    /// A command-line argument could not be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading or writing the state file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The state file is not valid JSON.
    #[error("state file error: {0}")]
    Json(#[from] serde_json::Error),

    /// The core rejected an operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Replication failed.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
