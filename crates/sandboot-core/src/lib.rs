//! Core bootstrap orchestration for sandboot.
//!
//! This crate drives an untrusted sandboxed execution environment through
//! project detection, dependency installation, dev-server startup, and
//! process tracking shared across UI surfaces:
//!
//! - [`tree`]: the project-tree wire format and the mount transform
//! - [`analyzer`]: project classification and install/start planning
//! - [`registry`]: session-wide process tracking and termination
//! - [`bootstrap`]: the transform → mount → analyze → install → start →
//!   ready state machine
//! - [`shell`]: interactive terminal sessions with server-liveness tracking
//!
//! # Example
//!
//! ```rust,no_run
//! use sandboot_core::{Bootstrapper, BootstrapConfig, ProcessRegistry, ProjectNode};
//! use sandboot_runtime::HostRuntime;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Arc::new(HostRuntime::with_root("/tmp/project".into()));
//!     let registry = ProcessRegistry::new();
//!     let bootstrapper =
//!         Bootstrapper::new(runtime, registry.clone(), BootstrapConfig::default());
//!
//!     let tree: ProjectNode = serde_json::from_str(r#"{
//!         "folderName": "app",
//!         "items": [{"filename": "index", "fileExtension": "html", "content": "<p>hi</p>"}]
//!     }"#)?;
//!
//!     bootstrapper.run(&tree).await?;
//!     registry.kill_all();
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod bootstrap;
pub mod error;
pub mod registry;
pub mod shell;
pub mod tree;

pub use analyzer::{
    analyze, classify, detect_package_manager, pick_start_script, CommandSpec, PackageManager,
    ProjectAnalysis, ProjectType, KNOWN_LOCKFILES,
};
pub use bootstrap::{
    install_env, scan_port, BootstrapConfig, BootstrapEvent, BootstrapState, BootstrapStep,
    Bootstrapper,
};
pub use error::{CoreError, CoreResult};
pub use registry::{ProcessRegistry, ProcessSnapshot};
pub use shell::{
    looks_like_server_output, ShellManager, ShellSession, DEFAULT_SESSION_ID, MAX_EXTRA_SESSIONS,
};
pub use tree::ProjectNode;
