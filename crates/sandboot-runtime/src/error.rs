//! Error types for sandbox runtime operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during sandbox runtime operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Sandbox is not running
    #[error("sandbox is not running")]
    NotRunning,

    /// Sandbox is already running
    #[error("sandbox is already running")]
    AlreadyRunning,

    /// Failed to mount project files
    #[error("failed to mount '{path}': {message}")]
    MountFailed { path: PathBuf, message: String },

    /// Failed to spawn a process
    #[error("failed to spawn '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// Command execution failed
    #[error("command execution failed: {0}")]
    ExecFailed(String),

    /// Command timed out
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// File not found in sandbox
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read file
    #[error("failed to read file '{path}': {message}")]
    ReadFailed { path: PathBuf, message: String },

    /// Failed to write file
    #[error("failed to write file '{path}': {message}")]
    WriteFailed { path: PathBuf, message: String },

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Create a mount failed error
    pub fn mount_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MountFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a spawn failed error
    pub fn spawn_failed(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a read failed error
    pub fn read_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a write failed error
    pub fn write_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error indicates the sandbox is not running
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning)
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for sandbox runtime operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
