//! Sandbox runtime binding for sandboot.
//!
//! This crate defines the contract between the bootstrap core and the
//! sandboxed execution environment that actually runs project code. The
//! production environment is browser-hosted and external to this workspace;
//! the core only consumes the contract defined here:
//!
//! - a filesystem (mount a path→content map, read/write/remove files)
//! - a process-spawn primitive with streamed output, stdin, kill, and resize
//! - a "server became reachable on port P at URL U" notification
//!
//! A [`HostRuntime`] implementation satisfies the same contract on the local
//! machine so the core can run and be tested end-to-end outside the browser
//! product.
//!
//! # Example
//!
//! ```rust,no_run
//! use sandboot_runtime::{HostRuntime, RuntimeConfig, SandboxRuntime, SpawnOptions};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = HostRuntime::with_root("/tmp/project".into());
//!
//!     let mut files = BTreeMap::new();
//!     files.insert("index.html".to_string(), "<h1>hi</h1>".to_string());
//!     runtime.mount(&files).await?;
//!
//!     let mut process = runtime
//!         .spawn("echo", &["hello".to_string()], SpawnOptions::default())
//!         .await?;
//!     while let Some(chunk) = process.output.recv().await {
//!         print!("{chunk}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod process;

pub use config::RuntimeConfig;
pub use error::{SandboxError, SandboxResult};
pub use host::HostRuntime;
pub use process::{
    process_channel, ProcessControl, ProcessController, ProcessHandle, SpawnedProcess,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Status of the sandbox runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// Runtime is not initialized
    NotInitialized,
    /// Runtime is starting
    Starting,
    /// Runtime is running and ready
    Running,
    /// Runtime is stopping
    Stopping,
    /// Runtime is stopped
    Stopped,
    /// Runtime encountered an error
    Error,
}

impl RuntimeStatus {
    /// Check if the runtime is ready to mount files and spawn processes.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the runtime can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::NotInitialized | Self::Stopped | Self::Error)
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not initialized"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Directory entry from the sandbox filesystem.
#[derive(Debug, Clone)]
pub struct SandboxDirEntry {
    /// Entry name (not full path)
    pub name: String,
    /// Full path in sandbox
    pub path: PathBuf,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Notification that a server became reachable inside the sandbox.
///
/// This is the runtime's own, authoritative signal. It can arrive at any
/// point relative to the bootstrap sequence's internal step tracking and
/// always wins over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    /// Port the server is listening on.
    pub port: u16,
    /// Externally reachable URL.
    pub url: String,
}

/// Options for spawning a process in the sandbox.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Extra environment variables for the process.
    pub env: HashMap<String, String>,
    /// Working directory (sandbox path). Defaults to the workspace root.
    pub cwd: Option<PathBuf>,
    /// Request an interactive terminal (PTY allocation hint).
    pub interactive: bool,
}

impl SpawnOptions {
    /// Spawn options with a working directory.
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Request an interactive terminal.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

/// Trait for sandbox runtime implementations.
///
/// This is the contract the bootstrap core consumes. The production
/// browser-hosted runtime, the local [`HostRuntime`], and the test mock all
/// implement it.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Get the unique identifier for this runtime instance.
    fn id(&self) -> &str;

    /// Get the current status of the runtime.
    async fn status(&self) -> RuntimeStatus;

    /// Get the workspace path inside the sandbox.
    fn workspace_path(&self) -> &Path;

    /// Mount a flat path→content map into the sandbox filesystem.
    ///
    /// Paths are relative to the workspace root. Parent directories are
    /// created as needed. Fatal on failure.
    async fn mount(&self, files: &BTreeMap<String, String>) -> SandboxResult<()> {
        for (path, content) in files {
            let full = self.workspace_path().join(path);
            self.write_file(&full, content.as_bytes()).await?;
        }
        Ok(())
    }

    /// Spawn a process in the sandbox.
    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> SandboxResult<SpawnedProcess>;

    /// Read a file from the sandbox.
    async fn read_file(&self, path: &Path) -> SandboxResult<Vec<u8>>;

    /// Write a file to the sandbox, creating parent directories as needed.
    async fn write_file(&self, path: &Path, content: &[u8]) -> SandboxResult<()>;

    /// Remove a file in the sandbox.
    async fn remove_file(&self, path: &Path) -> SandboxResult<()>;

    /// List directory contents in the sandbox.
    async fn read_dir(&self, path: &Path) -> SandboxResult<Vec<SandboxDirEntry>>;

    /// Create directories in the sandbox, including parents.
    async fn create_dir_all(&self, path: &Path) -> SandboxResult<()>;

    /// Rename a file or directory in the sandbox.
    async fn rename(&self, from: &Path, to: &Path) -> SandboxResult<()>;

    /// Subscribe to server-ready notifications.
    fn ready_events(&self) -> broadcast::Receiver<ServerReady>;

    /// Hint that a port was discovered in process output.
    ///
    /// Runtimes that probe for reachability (rather than observing it
    /// natively) can start probing the port here. Default is a no-op.
    async fn watch_port(&self, _port: u16) {}
}

/// Type alias for a boxed sandbox runtime.
pub type BoxedSandboxRuntime = Box<dyn SandboxRuntime>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_status() {
        assert!(RuntimeStatus::Running.is_ready());
        assert!(!RuntimeStatus::Stopped.is_ready());
        assert!(RuntimeStatus::Stopped.can_start());
        assert!(!RuntimeStatus::Running.can_start());
        assert_eq!(RuntimeStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_spawn_options_builder() {
        let options = SpawnOptions::in_dir("/workspace")
            .env("CI", "true")
            .interactive();
        assert_eq!(options.cwd.as_deref(), Some(Path::new("/workspace")));
        assert_eq!(options.env.get("CI").map(String::as_str), Some("true"));
        assert!(options.interactive);
    }
}
