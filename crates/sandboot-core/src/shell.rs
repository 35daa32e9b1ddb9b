//! Interactive shell sessions multiplexed onto one sandbox.
//!
//! Each open terminal tab owns one spawned interactive shell. Session 0 is
//! the privileged default that can never be closed by the user; up to
//! [`MAX_EXTRA_SESSIONS`] more can be opened alongside it.
//!
//! Whether a session currently hosts a long-running server is inferred by
//! matching its output against a fixed pattern table. The inference is
//! heuristic and sticky: the first match flips the flag true, and only an
//! interrupt or process exit clears it.

use crate::error::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use sandboot_runtime::{ProcessHandle, SandboxRuntime, SpawnOptions};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// Maximum number of concurrently open sessions besides the default.
pub const MAX_EXTRA_SESSIONS: usize = 3;

/// Id of the privileged default session.
pub const DEFAULT_SESSION_ID: u32 = 0;

/// Output signatures indicating a long-running server has started.
///
/// Best-effort: ambiguous process output can produce false positives or
/// negatives, which the product accepts.
static SERVER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)listening on",
        r"(?i)ready in",
        r"(?i)compiled successfully",
        r"(?i)watching for file changes",
        r"(?i)server (running|started)",
        r"(?i)local:\s",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid server pattern"))
    .collect()
});

/// Check whether an output chunk looks like a server startup message.
pub fn looks_like_server_output(chunk: &str) -> bool {
    SERVER_PATTERNS.iter().any(|p| p.is_match(chunk))
}

/// A session handed to a terminal UI surface.
///
/// The UI reads raw output from `output`, writes raw input and interrupts
/// through the methods, and polls `is_process_running` for tab state.
#[derive(Debug)]
pub struct ShellSession {
    /// Session id; 0 is the default session.
    pub id: u32,
    /// Shell output, chunk by chunk.
    pub output: mpsc::UnboundedReceiver<String>,
    handle: ProcessHandle,
    running: Arc<AtomicBool>,
}

impl ShellSession {
    /// Write raw input bytes to the shell.
    pub fn write_input(&self, bytes: impl Into<Vec<u8>>) {
        self.handle.write_input(bytes);
    }

    /// Send an interrupt (^C) to the shell.
    ///
    /// Optimistically marks the hosted process as stopped whether or not
    /// anything actually exits.
    pub fn interrupt(&self) {
        self.handle.interrupt();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Resize the shell's terminal.
    pub fn resize(&self, cols: u16, rows: u16) {
        self.handle.resize(cols, rows);
    }

    /// Whether this session currently hosts a long-running server process.
    pub fn is_process_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct SessionEntry {
    handle: ProcessHandle,
    running: Arc<AtomicBool>,
}

struct ShellTable {
    next_id: u32,
    entries: BTreeMap<u32, SessionEntry>,
}

/// Manager for the terminal sessions of one sandbox.
#[derive(Clone)]
pub struct ShellManager {
    inner: Arc<ShellManagerInner>,
}

struct ShellManagerInner {
    runtime: Arc<dyn SandboxRuntime>,
    table: Mutex<ShellTable>,
}

impl ShellManager {
    /// Create a manager bound to a sandbox runtime.
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            inner: Arc::new(ShellManagerInner {
                runtime,
                table: Mutex::new(ShellTable {
                    next_id: DEFAULT_SESSION_ID,
                    entries: BTreeMap::new(),
                }),
            }),
        }
    }

    /// Open a new shell session.
    ///
    /// The first session opened gets id 0 and becomes the privileged
    /// default. Fails once the default plus [`MAX_EXTRA_SESSIONS`] sessions
    /// are open.
    pub async fn open(&self) -> CoreResult<ShellSession> {
        {
            let table = self.lock();
            if table.entries.len() > MAX_EXTRA_SESSIONS {
                return Err(CoreError::SessionLimit(MAX_EXTRA_SESSIONS));
            }
        }

        let options =
            SpawnOptions::in_dir(self.inner.runtime.workspace_path()).interactive();
        let mut process = self
            .inner
            .runtime
            .spawn("sh", &["-i".to_string()], options)
            .await?;

        let handle = process.handle.clone();
        let running = Arc::new(AtomicBool::new(false));

        let id = {
            let mut table = self.lock();
            if table.entries.len() > MAX_EXTRA_SESSIONS {
                handle.kill();
                return Err(CoreError::SessionLimit(MAX_EXTRA_SESSIONS));
            }
            let id = table.next_id;
            table.next_id += 1;
            table.entries.insert(
                id,
                SessionEntry {
                    handle: handle.clone(),
                    running: running.clone(),
                },
            );
            id
        };
        debug!(id = id, "Shell session opened");

        // Forward output to the UI, scanning each chunk for server
        // signatures on the way through.
        let (tx, rx) = mpsc::unbounded_channel();
        let scan_running = running.clone();
        tokio::spawn(async move {
            while let Some(chunk) = process.output.recv().await {
                if !scan_running.load(Ordering::SeqCst) && looks_like_server_output(&chunk) {
                    debug!("Server signature matched in shell output");
                    scan_running.store(true, Ordering::SeqCst);
                }
                if tx.send(chunk).is_err() {
                    break;
                }
            }
            // Shell exited; nothing is running here anymore.
            scan_running.store(false, Ordering::SeqCst);
        });

        Ok(ShellSession {
            id,
            output: rx,
            handle,
            running,
        })
    }

    /// Close a session: interrupt anything it still marks running, then
    /// kill the shell and release its slot.
    ///
    /// The default session (id 0) can never be closed.
    pub fn close(&self, id: u32) -> CoreResult<()> {
        if id == DEFAULT_SESSION_ID {
            return Err(CoreError::DefaultSessionClose);
        }
        let entry = self
            .lock()
            .entries
            .remove(&id)
            .ok_or(CoreError::SessionNotFound(id))?;

        if entry.running.load(Ordering::SeqCst) {
            entry.handle.interrupt();
            entry.running.store(false, Ordering::SeqCst);
        }
        entry.handle.kill();
        debug!(id = id, "Shell session closed");
        Ok(())
    }

    /// Close every non-default session.
    pub fn close_all(&self) {
        let ids: Vec<u32> = self
            .lock()
            .entries
            .keys()
            .copied()
            .filter(|id| *id != DEFAULT_SESSION_ID)
            .collect();
        for id in ids {
            let _ = self.close(id);
        }
    }

    /// Global teardown: kill every session including the default.
    pub fn shutdown(&self) {
        let entries: Vec<SessionEntry> = {
            let mut table = self.lock();
            std::mem::take(&mut table.entries).into_values().collect()
        };
        for entry in entries {
            if entry.running.load(Ordering::SeqCst) {
                entry.handle.interrupt();
            }
            entry.handle.kill();
        }
        debug!("All shell sessions shut down");
    }

    /// Send an interrupt to a session by id.
    pub fn interrupt(&self, id: u32) -> CoreResult<()> {
        let table = self.lock();
        let entry = table.entries.get(&id).ok_or(CoreError::SessionNotFound(id))?;
        entry.handle.interrupt();
        entry.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Resize a session's terminal by id.
    pub fn resize(&self, id: u32, cols: u16, rows: u16) -> CoreResult<()> {
        let table = self.lock();
        let entry = table.entries.get(&id).ok_or(CoreError::SessionNotFound(id))?;
        entry.handle.resize(cols, rows);
        Ok(())
    }

    /// Whether a session currently hosts a long-running server process.
    pub fn is_process_running(&self, id: u32) -> CoreResult<bool> {
        let table = self.lock();
        let entry = table.entries.get(&id).ok_or(CoreError::SessionNotFound(id))?;
        Ok(entry.running.load(Ordering::SeqCst))
    }

    /// Ids of all open sessions.
    pub fn session_ids(&self) -> Vec<u32> {
        self.lock().entries.keys().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, ShellTable> {
        self.inner.table.lock().expect("shell table poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_patterns_match() {
        assert!(looks_like_server_output("Listening on port 3000"));
        assert!(looks_like_server_output("VITE v5.0  ready in 300 ms"));
        assert!(looks_like_server_output("webpack: Compiled successfully."));
        assert!(looks_like_server_output("watching for file changes..."));
        assert!(looks_like_server_output("Server running at http://x"));
        assert!(looks_like_server_output("  Local: http://localhost:5173/"));
    }

    #[test]
    fn test_server_patterns_case_insensitive() {
        assert!(looks_like_server_output("LISTENING ON :8080"));
        assert!(looks_like_server_output("READY IN 120ms"));
    }

    #[test]
    fn test_ordinary_output_not_matched() {
        assert!(!looks_like_server_output("$ ls -la"));
        assert!(!looks_like_server_output("npm WARN deprecated package"));
        assert!(!looks_like_server_output("installed 240 packages"));
    }
}
