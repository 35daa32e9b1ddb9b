//! Bootstrap orchestrator - from project tree to running dev server.
//!
//! Drives the sandbox through transform → mount → analyze → install →
//! start → ready, emitting progress and terminal output at each step and
//! tolerating partial failure:
//!
//! - pre-install failures are logged and skipped
//! - install gets a fixed retry budget and, if exhausted, the sequence
//!   *proceeds* to the start step anyway (partially-installed projects
//!   sometimes still run)
//! - transform and mount failures are fatal and require an explicit retry
//!
//! The runtime's own server-ready notification is an independent, racing
//! source of truth: whenever it arrives it sets the externally visible URL
//! and marks the bootstrap ready, regardless of internal step tracking.

use crate::analyzer::{self, CommandSpec, ProjectAnalysis, KNOWN_LOCKFILES};
use crate::error::{CoreError, CoreResult};
use crate::registry::ProcessRegistry;
use crate::tree::ProjectNode;
use once_cell::sync::Lazy;
use regex::Regex;
use sandboot_runtime::{SandboxError, SandboxRuntime, SpawnOptions};
use sandboot_util::truncate_output;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity for the bootstrap event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Byte cap for a single output chunk forwarded to UI surfaces.
const MAX_OUTPUT_CHUNK: usize = 8_192;

/// Steps of the bootstrap sequence, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapStep {
    #[default]
    Idle,
    Transforming,
    Mounting,
    Analyzing,
    Installing,
    Starting,
    Ready,
}

impl BootstrapStep {
    /// Step index (0..=6) for UI progress bars.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Transforming => "transforming",
            Self::Mounting => "mounting",
            Self::Analyzing => "analyzing",
            Self::Installing => "installing",
            Self::Starting => "starting",
            Self::Ready => "ready",
        };
        write!(f, "{s}")
    }
}

/// Bootstrap state, one per sandbox instance.
///
/// Invariant: at most one of not-started / in-progress / complete holds at
/// any time. A restart always begins at the first step; there is no partial
/// resume.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapState {
    /// Current step.
    pub step: BootstrapStep,
    /// Whether a bootstrap run is currently executing.
    pub in_progress: bool,
    /// Whether setup finished.
    pub complete: bool,
    /// Last fatal error, cleared on retry.
    pub error: Option<String>,
    /// Externally visible URL once the server is reachable.
    pub url: Option<String>,
}

/// Events emitted during a bootstrap run.
#[derive(Debug, Clone)]
pub enum BootstrapEvent {
    /// The sequence advanced to a step.
    Step(BootstrapStep),
    /// A progress log line for the UI.
    Log(String),
    /// Raw process output (truncated).
    Output(String),
    /// The server is reachable.
    Ready { url: Option<String> },
    /// The sequence failed.
    Failed { message: String },
}

/// Timeout and retry budget for the bootstrap sequence.
///
/// The budget applies to the install step only; every other step is
/// single-attempt and fatal on error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Timeout for the install command, in seconds.
    pub install_timeout_secs: u64,
    /// Timeout for each pre-install command, in seconds.
    pub pre_install_timeout_secs: u64,
    /// Total install attempts (including the first).
    pub install_attempts: u32,
    /// Pause between install attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            install_timeout_secs: 120,
            pre_install_timeout_secs: 30,
            install_attempts: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl BootstrapConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn pre_install_timeout(&self) -> Duration {
        Duration::from_secs(self.pre_install_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Environment forced onto the install command to suppress interactive
/// prompts, progress noise, and network side quests.
pub fn install_env() -> HashMap<String, String> {
    HashMap::from([
        ("CI".to_string(), "true".to_string()),
        ("NO_COLOR".to_string(), "1".to_string()),
        ("FORCE_COLOR".to_string(), "0".to_string()),
        ("NO_UPDATE_NOTIFIER".to_string(), "1".to_string()),
        (
            "NPM_CONFIG_UPDATE_NOTIFIER".to_string(),
            "false".to_string(),
        ),
        (
            "BROWSERSLIST_IGNORE_OLD_DATA".to_string(),
            "1".to_string(),
        ),
    ])
}

/// Patterns for discovering a listening port in process output.
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)port[:\s]+(\d{2,5})",
        r"localhost:(\d{2,5})",
        r"127\.0\.0\.1:(\d{2,5})",
        r"0\.0\.0\.0:(\d{2,5})",
        r"\[::\]:(\d{2,5})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid port pattern"))
    .collect()
});

/// Scan an output chunk for a port-like number.
pub fn scan_port(chunk: &str) -> Option<u16> {
    for pattern in PORT_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(chunk) {
            if let Ok(port) = captures[1].parse::<u16>() {
                return Some(port);
            }
        }
    }
    None
}

/// The bootstrap orchestrator for one sandbox instance.
#[derive(Clone)]
pub struct Bootstrapper {
    inner: Arc<BootstrapperInner>,
}

struct BootstrapperInner {
    runtime: Arc<dyn SandboxRuntime>,
    registry: ProcessRegistry,
    config: BootstrapConfig,
    state: Mutex<BootstrapState>,
    events: broadcast::Sender<BootstrapEvent>,
}

impl Bootstrapper {
    /// Create an orchestrator bound to a runtime and a process registry.
    ///
    /// Spawns a background task that reconciles the runtime's server-ready
    /// notifications with the step state: whichever arrives first wins
    /// Ready, and the notification always supplies the URL.
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        registry: ProcessRegistry,
        config: BootstrapConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let bootstrapper = Self {
            inner: Arc::new(BootstrapperInner {
                runtime,
                registry,
                config,
                state: Mutex::new(BootstrapState::default()),
                events,
            }),
        };

        let this = bootstrapper.clone();
        let mut ready_rx = this.inner.runtime.ready_events();
        tokio::spawn(async move {
            loop {
                match ready_rx.recv().await {
                    Ok(ready) => {
                        info!(port = ready.port, url = %ready.url, "Server reachable");
                        this.mark_ready(Some(ready.url));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        bootstrapper
    }

    /// Subscribe to bootstrap events.
    pub fn subscribe(&self) -> broadcast::Receiver<BootstrapEvent> {
        self.inner.events.subscribe()
    }

    /// Get a copy of the current state.
    pub fn state(&self) -> BootstrapState {
        self.lock_state().clone()
    }

    /// Reset the bootstrap state wholesale, allowing a fresh run.
    ///
    /// Does not touch tracked processes; callers that want a clean slate
    /// kill through the registry first.
    pub fn force_reset(&self) {
        *self.lock_state() = BootstrapState::default();
        self.log("Bootstrap state reset");
    }

    /// Run the full bootstrap sequence for a project tree.
    ///
    /// Refused with an error while a run is in progress; a no-op once setup
    /// completed (use [`force_reset`](Self::force_reset) to run again). Any
    /// fatal error clears the in-progress flag and is recorded; a retry
    /// starts over from the first step.
    pub async fn run(&self, tree: &ProjectNode) -> CoreResult<()> {
        {
            let mut state = self.lock_state();
            if state.complete {
                debug!("Setup already complete, ignoring bootstrap request");
                return Ok(());
            }
            if state.in_progress {
                return Err(CoreError::SetupInProgress);
            }
            state.in_progress = true;
            state.error = None;
        }

        match self.run_inner(tree).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                {
                    let mut state = self.lock_state();
                    state.in_progress = false;
                    state.complete = false;
                    state.error = Some(message.clone());
                }
                warn!(error = %message, "Bootstrap failed");
                self.emit(BootstrapEvent::Failed { message });
                Err(e)
            }
        }
    }

    async fn run_inner(&self, tree: &ProjectNode) -> CoreResult<()> {
        self.set_step(BootstrapStep::Transforming);
        let files = tree.flatten()?;
        self.log(format!("Prepared {} project files", files.len()));

        self.set_step(BootstrapStep::Mounting);
        self.inner.runtime.mount(&files).await?;

        self.set_step(BootstrapStep::Analyzing);
        let analysis =
            analyzer::analyze(self.inner.runtime.as_ref(), self.inner.runtime.workspace_path())
                .await;
        self.log(format!(
            "Detected {} project: {}",
            analysis.project_type, analysis.reason
        ));

        if let Some(install) = analysis.install_command.clone() {
            self.set_step(BootstrapStep::Installing);
            self.install(&analysis, &install).await;
        }

        if let Some(start) = analysis.start_command.clone() {
            self.set_step(BootstrapStep::Starting);
            self.start(&start).await?;
            let mut state = self.lock_state();
            state.in_progress = false;
            state.complete = true;
        } else {
            self.log("No start command; marking ready");
            self.mark_ready(None);
        }

        Ok(())
    }

    /// Install step. Absorbs every failure: lockfile removal and pre-install
    /// steps are best-effort, and an exhausted retry budget degrades to a
    /// warning so the start step still gets its chance.
    async fn install(&self, analysis: &ProjectAnalysis, install: &CommandSpec) {
        if analysis.should_remove_lockfile {
            for name in KNOWN_LOCKFILES {
                let path = self.inner.runtime.workspace_path().join(name);
                if self.inner.runtime.remove_file(&path).await.is_ok() {
                    self.log(format!("Removed {name}"));
                }
            }
        }

        for pre in &analysis.pre_install_commands {
            match self
                .run_command(pre, self.inner.config.pre_install_timeout(), HashMap::new())
                .await
            {
                Ok(0) => {}
                Ok(code) => {
                    self.log(format!("Pre-install '{pre}' exited with status {code}, continuing"))
                }
                Err(e) if e.is_timeout() => {
                    self.log(format!("Pre-install '{pre}' timed out, continuing"))
                }
                Err(e) => self.log(format!("Pre-install '{pre}' failed: {e}, continuing")),
            }
        }

        let attempts = self.inner.config.install_attempts.max(1);
        for attempt in 1..=attempts {
            self.log(format!(
                "Installing dependencies (attempt {attempt}/{attempts}): {install}"
            ));
            match self
                .run_command(install, self.inner.config.install_timeout(), install_env())
                .await
            {
                Ok(0) => {
                    self.log("Dependencies installed");
                    return;
                }
                Ok(code) => self.log(format!("Install exited with status {code}")),
                Err(e) if e.is_timeout() => self.log(format!(
                    "Install timed out after {}s",
                    self.inner.config.install_timeout_secs
                )),
                Err(e) => self.log(format!("Install failed: {e}")),
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.config.retry_delay()).await;
            }
        }

        warn!(command = %install, "Install failed after all attempts, starting anyway");
        self.log("Install failed after all attempts; attempting to start anyway");
    }

    /// Start step: spawn the dev server, register it, and track its output
    /// for port discovery until it exits.
    async fn start(&self, start: &CommandSpec) -> CoreResult<()> {
        let options = SpawnOptions::in_dir(self.inner.runtime.workspace_path());
        let mut process = self
            .inner
            .runtime
            .spawn(&start.program, &start.args, options)
            .await?;
        let handle = process.handle.clone();
        let id = self
            .inner
            .registry
            .register(handle.clone(), start.to_string(), None);
        self.log(format!("Started: {start}"));

        let registry = self.inner.registry.clone();
        let runtime = self.inner.runtime.clone();
        let events = self.inner.events.clone();
        tokio::spawn(async move {
            let mut port_found = false;
            while let Some(chunk) = process.output.recv().await {
                let (text, _) = truncate_output(&chunk, MAX_OUTPUT_CHUNK);
                let _ = events.send(BootstrapEvent::Output(text));
                if !port_found {
                    if let Some(port) = scan_port(&chunk) {
                        port_found = true;
                        registry.set_port(id, port);
                        runtime.watch_port(port).await;
                    }
                }
            }
            let code = handle.wait().await;
            debug!(id = id, code = code, "Dev server process exited");
            registry.unregister(id);
        });

        Ok(())
    }

    /// Run a command to completion under a wall-clock timeout, forwarding
    /// its output to subscribers.
    ///
    /// A timeout best-effort kills the process and is reported distinctly
    /// from a non-zero exit.
    async fn run_command(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        env: HashMap<String, String>,
    ) -> CoreResult<i32> {
        let options = SpawnOptions {
            env,
            cwd: Some(self.inner.runtime.workspace_path().to_path_buf()),
            interactive: false,
        };
        let mut process = self
            .inner
            .runtime
            .spawn(&spec.program, &spec.args, options)
            .await?;
        let handle = process.handle.clone();

        let events = self.inner.events.clone();
        let pump = tokio::spawn(async move {
            while let Some(chunk) = process.output.recv().await {
                let (text, _) = truncate_output(&chunk, MAX_OUTPUT_CHUNK);
                let _ = events.send(BootstrapEvent::Output(text));
            }
        });

        match tokio::time::timeout(timeout, handle.wait()).await {
            Ok(code) => {
                let _ = pump.await;
                Ok(code)
            }
            Err(_) => {
                handle.kill();
                let _ = pump.await;
                Err(SandboxError::Timeout(timeout).into())
            }
        }
    }

    /// Mark the bootstrap ready, merging in a URL when the runtime supplied
    /// one. Safe to call from any point in the sequence.
    fn mark_ready(&self, url: Option<String>) {
        let url = {
            let mut state = self.lock_state();
            state.step = BootstrapStep::Ready;
            state.in_progress = false;
            state.complete = true;
            state.error = None;
            if url.is_some() {
                state.url = url;
            }
            state.url.clone()
        };
        self.emit(BootstrapEvent::Ready { url });
    }

    fn set_step(&self, step: BootstrapStep) {
        {
            let mut state = self.lock_state();
            // The ready notification may have already won the race; don't
            // walk the state backwards if so.
            if state.step == BootstrapStep::Ready {
                return;
            }
            state.step = step;
        }
        debug!(step = %step, "Bootstrap step");
        self.emit(BootstrapEvent::Step(step));
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        self.emit(BootstrapEvent::Log(line));
    }

    fn emit(&self, event: BootstrapEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.inner.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, BootstrapState> {
        self.inner.state.lock().expect("bootstrap state poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_port_prefixes() {
        assert_eq!(scan_port("Server listening on port 3000"), Some(3000));
        assert_eq!(scan_port("Local: http://localhost:5173/"), Some(5173));
        assert_eq!(scan_port("listening on 127.0.0.1:8080"), Some(8080));
        assert_eq!(scan_port("bound to 0.0.0.0:4000"), Some(4000));
        assert_eq!(scan_port("http server on [::]:9000"), Some(9000));
        assert_eq!(scan_port("PORT: 3001"), Some(3001));
        assert_eq!(scan_port("no ports here"), None);
    }

    #[test]
    fn test_scan_port_rejects_out_of_range() {
        assert_eq!(scan_port("localhost:99999"), None);
    }

    #[test]
    fn test_install_env_non_interactive() {
        let env = install_env();
        assert_eq!(env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(env.get("NO_UPDATE_NOTIFIER").map(String::as_str), Some("1"));
        assert!(env.contains_key("BROWSERSLIST_IGNORE_OLD_DATA"));
    }

    #[test]
    fn test_step_ordering() {
        assert_eq!(BootstrapStep::Idle.index(), 0);
        assert_eq!(BootstrapStep::Ready.index(), 6);
        assert!(BootstrapStep::Installing < BootstrapStep::Starting);
        assert_eq!(BootstrapStep::default(), BootstrapStep::Idle);
    }

    #[test]
    fn test_config_defaults() {
        let config = BootstrapConfig::default();
        assert_eq!(config.install_timeout(), Duration::from_secs(120));
        assert_eq!(config.pre_install_timeout(), Duration::from_secs(30));
        assert_eq!(config.install_attempts, 2);
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_default_state_invariant() {
        let state = BootstrapState::default();
        assert_eq!(state.step, BootstrapStep::Idle);
        assert!(!state.in_progress);
        assert!(!state.complete);
        assert!(state.error.is_none());
    }
}
