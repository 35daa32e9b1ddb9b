//! Host runtime - the sandbox contract on the local machine.
//!
//! Executes processes directly on the host with piped stdio and mounts
//! project files under a root directory on the local filesystem. Used when
//! the core runs outside the browser product (CLI, tests, CI).
//!
//! Server readiness is not observable natively on the host, so the runtime
//! probes watched ports with TCP connects and broadcasts [`ServerReady`]
//! once a connect succeeds.

use crate::{
    error::{SandboxError, SandboxResult},
    process::{process_channel, ProcessControl, SpawnedProcess},
    RuntimeConfig, RuntimeStatus, SandboxDirEntry, SandboxRuntime, ServerReady, SpawnOptions,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Capacity for the server-ready broadcast channel.
const READY_CHANNEL_CAPACITY: usize = 16;

/// Read buffer size for process output.
const OUTPUT_BUF_SIZE: usize = 8192;

/// Sandbox runtime that executes directly on the host.
pub struct HostRuntime {
    /// Unique identifier
    id: String,
    /// Workspace root on the host
    workspace: PathBuf,
    /// Runtime configuration
    config: RuntimeConfig,
    /// Server-ready broadcaster
    ready_tx: broadcast::Sender<ServerReady>,
    /// Ports already being probed
    watched_ports: Mutex<HashSet<u16>>,
}

impl HostRuntime {
    /// Create a new host runtime with the given configuration.
    ///
    /// `config.workspace` is interpreted as a host directory.
    pub fn new(config: RuntimeConfig) -> Self {
        let id = format!("host-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let (ready_tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);

        debug!(id = %id, workspace = %config.workspace.display(), "Host runtime created");

        Self {
            id,
            workspace: config.workspace.clone(),
            config,
            ready_tx,
            watched_ports: Mutex::new(HashSet::new()),
        }
    }

    /// Create a host runtime rooted at a directory, with default settings.
    pub fn with_root(root: PathBuf) -> Self {
        Self::new(RuntimeConfig {
            workspace: root,
            ..Default::default()
        })
    }

    fn resolve_cwd(&self, options: &SpawnOptions) -> PathBuf {
        options
            .cwd
            .clone()
            .unwrap_or_else(|| self.workspace.clone())
    }
}

#[async_trait]
impl SandboxRuntime for HostRuntime {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> RuntimeStatus {
        // The host is always available
        RuntimeStatus::Running
    }

    fn workspace_path(&self) -> &Path {
        &self.workspace
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> SandboxResult<SpawnedProcess> {
        let cwd = self.resolve_cwd(&options);

        debug!(
            program = %program,
            args = ?args,
            cwd = %cwd.display(),
            "Spawning process (host)"
        );

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&cwd)
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(&options.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| SandboxError::spawn_failed(program, e.to_string()))?;

        let (process, controller) = process_channel();
        let crate::process::ProcessController {
            mut control,
            output,
            exit,
        } = controller;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, output));
        } else {
            drop(output);
        }

        let mut stdin = child.stdin.take();

        // Driver: applies control messages and publishes the exit code.
        tokio::spawn(async move {
            let mut control_open = true;
            let code = loop {
                tokio::select! {
                    status = child.wait() => {
                        break status.ok().and_then(|s| s.code()).unwrap_or(-1);
                    }
                    msg = control.recv(), if control_open => {
                        match msg {
                            Some(ProcessControl::Input(bytes)) => {
                                if let Some(stdin) = stdin.as_mut() {
                                    let _ = stdin.write_all(&bytes).await;
                                    let _ = stdin.flush().await;
                                }
                            }
                            Some(ProcessControl::Kill) => {
                                let _ = child.start_kill();
                            }
                            Some(ProcessControl::Resize { .. }) => {
                                // Plain pipes on the host, no PTY to resize
                            }
                            None => control_open = false,
                        }
                    }
                }
            };
            let _ = exit.send(Some(code));
        });

        Ok(process)
    }

    async fn read_file(&self, path: &Path) -> SandboxResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| SandboxError::read_failed(path, e.to_string()))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> SandboxResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::write_failed(path, e.to_string()))?;
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SandboxError::write_failed(path, e.to_string()))
    }

    async fn remove_file(&self, path: &Path) -> SandboxResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|_| SandboxError::FileNotFound(path.to_path_buf()))
    }

    async fn read_dir(&self, path: &Path) -> SandboxResult<Vec<SandboxDirEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| SandboxError::read_failed(path, e.to_string()))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| SandboxError::read_failed(path, e.to_string()))?
        {
            let file_type = entry.file_type().await.ok();

            entries.push(SandboxDirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
                is_dir: file_type.map(|t| t.is_dir()).unwrap_or(false),
            });
        }

        Ok(entries)
    }

    async fn create_dir_all(&self, path: &Path) -> SandboxResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| SandboxError::write_failed(path, e.to_string()))
    }

    async fn rename(&self, from: &Path, to: &Path) -> SandboxResult<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| SandboxError::write_failed(to, e.to_string()))
    }

    fn ready_events(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }

    async fn watch_port(&self, port: u16) {
        {
            let mut watched = self.watched_ports.lock().expect("watched_ports poisoned");
            if !watched.insert(port) {
                return;
            }
        }

        let tx = self.ready_tx.clone();
        let interval = self.config.ready_probe_interval();
        let attempts = self.config.ready_probe_attempts;

        debug!(port = port, "Probing port for reachability");

        tokio::spawn(async move {
            for _ in 0..attempts {
                if tokio::net::TcpStream::connect(("127.0.0.1", port))
                    .await
                    .is_ok()
                {
                    let _ = tx.send(ServerReady {
                        port,
                        url: format!("http://localhost:{port}"),
                    });
                    return;
                }
                tokio::time::sleep(interval).await;
            }
            warn!(port = port, "Port never became reachable, giving up");
        });
    }
}

/// Forward a process output stream as lossy-UTF-8 chunks.
async fn forward_output(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    tx: mpsc::UnboundedSender<String>,
) {
    let mut buf = [0u8; OUTPUT_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(String::from_utf8_lossy(&buf[..n]).to_string()).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spawn_collects_output_and_exit() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = HostRuntime::with_root(temp_dir.path().to_path_buf());

        let mut process = runtime
            .spawn("echo", &["hello".to_string()], SpawnOptions::default())
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(chunk) = process.output.recv().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected.trim(), "hello");
        assert_eq!(process.handle.wait().await, 0);
    }

    #[tokio::test]
    async fn test_spawn_nonzero_exit() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = HostRuntime::with_root(temp_dir.path().to_path_buf());

        let process = runtime
            .spawn(
                "sh",
                &["-c".to_string(), "exit 3".to_string()],
                SpawnOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(process.handle.wait().await, 3);
    }

    #[tokio::test]
    async fn test_kill_terminates_process() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = HostRuntime::with_root(temp_dir.path().to_path_buf());

        let process = runtime
            .spawn("sleep", &["30".to_string()], SpawnOptions::default())
            .await
            .unwrap();

        process.handle.kill();
        let code = process.handle.wait().await;
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = HostRuntime::with_root(temp_dir.path().to_path_buf());

        let result = runtime
            .spawn(
                "definitely-not-a-real-program",
                &[],
                SpawnOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_mount_writes_files() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = HostRuntime::with_root(temp_dir.path().to_path_buf());

        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), "<h1>hi</h1>".to_string());
        files.insert("src/main.js".to_string(), "console.log(1)".to_string());

        runtime.mount(&files).await.unwrap();

        let content = runtime
            .read_file(&temp_dir.path().join("src/main.js"))
            .await
            .unwrap();
        assert_eq!(content, b"console.log(1)");

        let entries = runtime.read_dir(temp_dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = HostRuntime::with_root(temp_dir.path().to_path_buf());

        let result = runtime.remove_file(&temp_dir.path().join("nope.lock")).await;
        assert!(matches!(result, Err(SandboxError::FileNotFound(_))));
    }
}
