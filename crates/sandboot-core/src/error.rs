//! Error types for the core crate.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed project tree supplied by the UI/persistence layer.
    #[error("invalid project tree: {0}")]
    Transform(String),

    /// Sandbox runtime error (mount, spawn, filesystem).
    #[error("sandbox error: {0}")]
    Sandbox(#[from] sandboot_runtime::SandboxError),

    /// A bootstrap run is already in progress.
    #[error("setup is already in progress")]
    SetupInProgress,

    /// Terminal session limit reached.
    #[error("terminal session limit reached ({0} max)")]
    SessionLimit(usize),

    /// The default terminal session cannot be closed.
    #[error("the default terminal session cannot be closed")]
    DefaultSessionClose,

    /// Terminal session not found.
    #[error("terminal session {0} not found")]
    SessionNotFound(u32),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a transform error.
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }

    /// Check if this error is an install/command timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Sandbox(e) if e.is_timeout())
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
