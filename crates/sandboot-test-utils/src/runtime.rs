//! Mock sandbox runtime.
//!
//! An in-memory implementation of [`SandboxRuntime`] that records mounts
//! and spawns without executing anything. Spawn outcomes are scripted per
//! program: each spawn of a program pops the next [`ScriptedProcess`] from
//! its queue (falling back to a default), emits its output chunks, and
//! exits with its code after an optional delay - or never, for timeout
//! tests, until a kill arrives.
//!
//! Server-ready notifications are emitted manually via
//! [`MockRuntime::emit_ready`], which lets tests race the notification
//! against the bootstrap sequence at any point.
//!
//! # Example
//!
//! ```rust,ignore
//! let runtime = MockRuntime::new()
//!     .with_file("package.json", r#"{"scripts":{"dev":"vite"}}"#)
//!     .script("npm", ScriptedProcess::exit_with(1).with_output("boom\n"))
//!     .script("npm", ScriptedProcess::succeed());
//!
//! // ... run the orchestrator against it ...
//! assert_eq!(runtime.spawn_count("npm"), 2);
//! ```

use async_trait::async_trait;
use sandboot_runtime::{
    process_channel, ProcessControl, RuntimeStatus, SandboxDirEntry, SandboxError, SandboxResult,
    SandboxRuntime, ServerReady, SpawnOptions, SpawnedProcess,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// A scripted outcome for one spawn.
#[derive(Debug, Clone)]
pub struct ScriptedProcess {
    /// Output chunks emitted immediately after spawn.
    pub output: Vec<String>,
    /// Exit code; `None` means the process never exits on its own.
    pub exit_code: Option<i32>,
    /// Delay between spawn and exit.
    pub exit_delay: Duration,
}

impl ScriptedProcess {
    /// A process that exits 0 immediately.
    pub fn succeed() -> Self {
        Self::exit_with(0)
    }

    /// A process that exits with the given code immediately.
    pub fn exit_with(code: i32) -> Self {
        Self {
            output: Vec::new(),
            exit_code: Some(code),
            exit_delay: Duration::ZERO,
        }
    }

    /// A process that never exits until killed (exit code 137 on kill).
    pub fn never_exits() -> Self {
        Self {
            output: Vec::new(),
            exit_code: None,
            exit_delay: Duration::ZERO,
        }
    }

    /// Add an output chunk.
    pub fn with_output(mut self, chunk: impl Into<String>) -> Self {
        self.output.push(chunk.into());
        self
    }

    /// Delay the exit.
    pub fn after(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }
}

/// A recorded spawn.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    /// The program that was spawned.
    pub program: String,
    /// The arguments.
    pub args: Vec<String>,
    /// The environment that was requested.
    pub env: HashMap<String, String>,
    /// Whether an interactive terminal was requested.
    pub interactive: bool,
    /// Control messages the process received, in order.
    pub controls: Arc<Mutex<Vec<ProcessControl>>>,
}

/// A mock sandbox runtime for testing.
pub struct MockRuntime {
    id: String,
    workspace: PathBuf,
    files: Mutex<BTreeMap<PathBuf, String>>,
    dirs: Mutex<HashSet<PathBuf>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedProcess>>>,
    default_script: Mutex<ScriptedProcess>,
    spawned: Mutex<Vec<SpawnRecord>>,
    ready_tx: broadcast::Sender<ServerReady>,
    watched_ports: Mutex<Vec<u16>>,
}

impl MockRuntime {
    /// Create a mock runtime with workspace `/workspace`.
    pub fn new() -> Self {
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            id: "mock-sandbox".to_string(),
            workspace: PathBuf::from("/workspace"),
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(HashSet::new()),
            scripts: Mutex::new(HashMap::new()),
            default_script: Mutex::new(ScriptedProcess::succeed()),
            spawned: Mutex::new(Vec::new()),
            ready_tx,
            watched_ports: Mutex::new(Vec::new()),
        }
    }

    /// Pre-populate a file, path relative to the workspace.
    pub fn with_file(self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        let full = self.workspace.join(path.as_ref());
        self.files.lock().unwrap().insert(full, content.into());
        self
    }

    /// Queue a scripted outcome for the next spawn of `program`.
    pub fn script(self, program: impl Into<String>, process: ScriptedProcess) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(program.into())
            .or_default()
            .push_back(process);
        self
    }

    /// Set the outcome used when a program has no queued script.
    pub fn with_default_script(self, process: ScriptedProcess) -> Self {
        *self.default_script.lock().unwrap() = process;
        self
    }

    /// Manually emit a server-ready notification.
    pub fn emit_ready(&self, port: u16, url: impl Into<String>) {
        let _ = self.ready_tx.send(ServerReady {
            port,
            url: url.into(),
        });
    }

    /// All recorded spawns, in order.
    pub fn spawn_records(&self) -> Vec<SpawnRecord> {
        self.spawned.lock().unwrap().clone()
    }

    /// How many times a program was spawned.
    pub fn spawn_count(&self, program: &str) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.program == program)
            .count()
    }

    /// The current file table, keyed by path relative to the workspace.
    pub fn mounted_files(&self) -> BTreeMap<String, String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, content)| {
                let rel = path
                    .strip_prefix(&self.workspace)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .to_string();
                (rel, content.clone())
            })
            .collect()
    }

    /// Ports the core asked the runtime to watch.
    pub fn watched_ports(&self) -> Vec<u16> {
        self.watched_ports.lock().unwrap().clone()
    }

    fn next_script(&self, program: &str) -> ScriptedProcess {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(program)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> RuntimeStatus {
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
        let script = self.next_script(program);
        let controls = Arc::new(Mutex::new(Vec::new()));

        self.spawned.lock().unwrap().push(SpawnRecord {
            program: program.to_string(),
            args: args.to_vec(),
            env: options.env.clone(),
            interactive: options.interactive,
            controls: controls.clone(),
        });

        let (process, controller) = process_channel();
        let sandboot_runtime::ProcessController {
            mut control,
            output,
            exit,
        } = controller;

        tokio::spawn(async move {
            for chunk in script.output {
                let _ = output.send(chunk);
            }
            match script.exit_code {
                Some(code) => {
                    tokio::select! {
                        _ = tokio::time::sleep(script.exit_delay) => {
                            let _ = exit.send(Some(code));
                        }
                        _ = wait_for_kill(&mut control, &controls) => {
                            let _ = exit.send(Some(137));
                        }
                    }
                }
                None => {
                    wait_for_kill(&mut control, &controls).await;
                    let _ = exit.send(Some(137));
                }
            }
            // Dropping `output` here closes the caller's stream.
        });

        Ok(process)
    }

    async fn read_file(&self, path: &Path) -> SandboxResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|content| content.as_bytes().to_vec())
            .ok_or_else(|| SandboxError::FileNotFound(path.to_path_buf()))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> SandboxResult<()> {
        self.files.lock().unwrap().insert(
            path.to_path_buf(),
            String::from_utf8_lossy(content).to_string(),
        );
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> SandboxResult<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SandboxError::FileNotFound(path.to_path_buf()))
    }

    async fn read_dir(&self, path: &Path) -> SandboxResult<Vec<SandboxDirEntry>> {
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        let children = files
            .keys()
            .cloned()
            .chain(dirs.iter().cloned())
            .filter_map(|p| {
                p.strip_prefix(path)
                    .ok()
                    .and_then(|rel| rel.components().next().map(|c| (c.as_os_str().to_owned(), rel.components().count() > 1 || dirs.contains(&p))))
            });

        for (name, is_dir) in children {
            let name = name.to_string_lossy().to_string();
            if seen.insert(name.clone()) {
                entries.push(SandboxDirEntry {
                    path: path.join(&name),
                    name,
                    is_dir,
                });
            }
        }

        Ok(entries)
    }

    async fn create_dir_all(&self, path: &Path) -> SandboxResult<()> {
        self.dirs.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> SandboxResult<()> {
        let mut files = self.files.lock().unwrap();
        match files.remove(from) {
            Some(content) => {
                files.insert(to.to_path_buf(), content);
                Ok(())
            }
            None => Err(SandboxError::FileNotFound(from.to_path_buf())),
        }
    }

    fn ready_events(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }

    async fn watch_port(&self, port: u16) {
        self.watched_ports.lock().unwrap().push(port);
    }
}

/// Wait for a kill control message, recording everything received.
///
/// Pends forever if all handles are dropped without a kill, so a
/// `select!` against a scripted exit is not short-circuited.
async fn wait_for_kill(
    control: &mut mpsc::UnboundedReceiver<ProcessControl>,
    log: &Arc<Mutex<Vec<ProcessControl>>>,
) {
    loop {
        match control.recv().await {
            Some(ProcessControl::Kill) => {
                log.lock().unwrap().push(ProcessControl::Kill);
                return;
            }
            Some(msg) => log.lock().unwrap().push(msg),
            None => std::future::pending::<()>().await,
        }
    }
}
