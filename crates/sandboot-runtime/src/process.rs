//! Spawned-process plumbing.
//!
//! A spawned process is represented as two halves connected by channels:
//!
//! - [`SpawnedProcess`] is what a runtime's `spawn` returns to the caller:
//!   a merged stdout/stderr chunk stream plus a cloneable [`ProcessHandle`]
//!   for kill, stdin writes, resize, and exit waiting.
//! - [`ProcessController`] is the backend half a runtime implementation
//!   drives: it forwards real process output, applies control messages, and
//!   publishes the exit code.
//!
//! The handle is deliberately fire-and-forget on the control side: a kill
//! sent to an already-exited process is silently dropped, which is exactly
//! the behavior the process registry needs when a kill races a natural exit.

use tokio::sync::{mpsc, watch};

/// Control messages sent from a [`ProcessHandle`] to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessControl {
    /// Write bytes to the process's stdin.
    Input(Vec<u8>),
    /// Resize the process's terminal (PTY-backed runtimes only).
    Resize { cols: u16, rows: u16 },
    /// Terminate the process.
    Kill,
}

/// The caller-facing side of a spawned process.
pub struct SpawnedProcess {
    /// Merged stdout/stderr output, delivered as lossy-UTF-8 chunks.
    pub output: mpsc::UnboundedReceiver<String>,
    /// Handle for controlling the process.
    pub handle: ProcessHandle,
}

/// A cheaply cloneable handle to a spawned process.
///
/// All control operations are best-effort: if the backend has already gone
/// away the message is dropped silently.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    control: mpsc::UnboundedSender<ProcessControl>,
    exit: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
    /// Request termination of the process.
    pub fn kill(&self) {
        let _ = self.control.send(ProcessControl::Kill);
    }

    /// Write bytes to the process's stdin.
    pub fn write_input(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.control.send(ProcessControl::Input(bytes.into()));
    }

    /// Send the interrupt control byte (^C) to the process's stdin.
    pub fn interrupt(&self) {
        self.write_input([0x03]);
    }

    /// Resize the process's terminal.
    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.control.send(ProcessControl::Resize { cols, rows });
    }

    /// Get the exit code, if the process has exited.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Check whether the process is still running.
    pub fn is_running(&self) -> bool {
        self.exit_code().is_none()
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// Returns -1 if the backend disappeared without reporting an exit code.
    pub async fn wait(&self) -> i32 {
        let mut rx = self.exit.clone();
        loop {
            if let Some(code) = *rx.borrow_and_update() {
                return code;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().unwrap_or(-1);
            }
        }
    }
}

/// The backend-facing side of a spawned process.
pub struct ProcessController {
    /// Control messages from all handles.
    pub control: mpsc::UnboundedReceiver<ProcessControl>,
    /// Output chunk sender.
    pub output: mpsc::UnboundedSender<String>,
    /// Exit code publisher.
    pub exit: watch::Sender<Option<i32>>,
}

impl ProcessController {
    /// Forward an output chunk to the caller.
    pub fn emit(&self, chunk: impl Into<String>) {
        let _ = self.output.send(chunk.into());
    }

    /// Publish the process's exit code.
    pub fn finish(&self, code: i32) {
        let _ = self.exit.send(Some(code));
    }
}

/// Create a connected [`SpawnedProcess`] / [`ProcessController`] pair.
pub fn process_channel() -> (SpawnedProcess, ProcessController) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(None);

    (
        SpawnedProcess {
            output: output_rx,
            handle: ProcessHandle {
                control: control_tx,
                exit: exit_rx,
            },
        },
        ProcessController {
            control: control_rx,
            output: output_tx,
            exit: exit_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_and_exit() {
        let (mut process, controller) = process_channel();

        controller.emit("hello\n");
        controller.finish(0);
        drop(controller);

        assert_eq!(process.output.recv().await.as_deref(), Some("hello\n"));
        assert_eq!(process.output.recv().await, None);
        assert_eq!(process.handle.wait().await, 0);
        assert!(!process.handle.is_running());
    }

    #[tokio::test]
    async fn test_kill_control_message() {
        let (process, mut controller) = process_channel();

        process.handle.kill();
        assert_eq!(controller.control.recv().await, Some(ProcessControl::Kill));
    }

    #[tokio::test]
    async fn test_interrupt_writes_control_byte() {
        let (process, mut controller) = process_channel();

        process.handle.interrupt();
        assert_eq!(
            controller.control.recv().await,
            Some(ProcessControl::Input(vec![0x03]))
        );
    }

    #[tokio::test]
    async fn test_kill_after_backend_gone_is_silent() {
        let (process, controller) = process_channel();
        controller.finish(1);
        drop(controller);

        // No panic, no error - the message is just dropped.
        process.handle.kill();
        assert_eq!(process.handle.wait().await, 1);
    }

    #[tokio::test]
    async fn test_wait_when_backend_vanishes_without_exit() {
        let (process, controller) = process_channel();
        drop(controller);

        assert_eq!(process.handle.wait().await, -1);
    }
}
