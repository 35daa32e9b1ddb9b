//! Process registry - session-wide tracking of spawned processes.
//!
//! One registry is constructed per sandbox session and cloned into every
//! component that needs to track or kill processes (orchestrator, shell
//! sessions, UI surfaces). Any surface can terminate any tracked process
//! irrespective of which component started it.
//!
//! Table mutations are atomic single-step edits under one short-held lock;
//! subscribers are notified with a read-only snapshot only after the table
//! is fully updated. Kill errors on already-dead processes are swallowed -
//! a kill racing a natural exit resolves to a benign no-op.

use chrono::{DateTime, Utc};
use sandboot_runtime::ProcessHandle;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity for the snapshot broadcast channel.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

/// A read-only view of one tracked process, safe to hand to UI surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    /// Registry-assigned id, unique for the registry's lifetime.
    pub id: u64,
    /// Display string for the command that was started.
    pub command: String,
    /// Port discovered from process output, if any.
    pub port: Option<u16>,
    /// When the process was registered.
    pub started_at: DateTime<Utc>,
}

struct ProcessRecord {
    handle: ProcessHandle,
    command: String,
    port: Option<u16>,
    started_at: DateTime<Utc>,
}

impl ProcessRecord {
    fn snapshot(&self, id: u64) -> ProcessSnapshot {
        ProcessSnapshot {
            id,
            command: self.command.clone(),
            port: self.port,
            started_at: self.started_at,
        }
    }
}

struct RegistryTable {
    next_id: u64,
    entries: BTreeMap<u64, ProcessRecord>,
}

/// Session-scoped registry of spawned processes.
#[derive(Clone)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    table: Mutex<RegistryTable>,
    notify: broadcast::Sender<Vec<ProcessSnapshot>>,
}

impl ProcessRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                table: Mutex::new(RegistryTable {
                    next_id: 1,
                    entries: BTreeMap::new(),
                }),
                notify,
            }),
        }
    }

    /// Register a process, returning its registry id.
    ///
    /// Ids are monotonically increasing and never reused within the
    /// registry's lifetime.
    pub fn register(
        &self,
        handle: ProcessHandle,
        command: impl Into<String>,
        port: Option<u16>,
    ) -> u64 {
        let command = command.into();
        let id = {
            let mut table = self.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.insert(
                id,
                ProcessRecord {
                    handle,
                    command: command.clone(),
                    port,
                    started_at: Utc::now(),
                },
            );
            id
        };
        debug!(id = id, command = %command, "Process registered");
        self.publish();
        id
    }

    /// Set the port for a tracked process once discovered from its output.
    pub fn set_port(&self, id: u64, port: u16) {
        let updated = {
            let mut table = self.lock();
            match table.entries.get_mut(&id) {
                Some(record) => {
                    record.port = Some(port);
                    true
                }
                None => false,
            }
        };
        if updated {
            debug!(id = id, port = port, "Process port discovered");
            self.publish();
        }
    }

    /// Terminate and remove a process.
    ///
    /// Returns false if the id is unknown (already exited and unregistered,
    /// or never registered). Termination is best-effort.
    pub fn kill(&self, id: u64) -> bool {
        let record = { self.lock().entries.remove(&id) };
        match record {
            Some(record) => {
                record.handle.kill();
                debug!(id = id, command = %record.command, "Process killed");
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Terminate and remove every process whose discovered port matches.
    ///
    /// Returns whether any entry matched.
    pub fn kill_by_port(&self, port: u16) -> bool {
        let removed: Vec<(u64, ProcessRecord)> = {
            let mut table = self.lock();
            let ids: Vec<u64> = table
                .entries
                .iter()
                .filter(|(_, r)| r.port == Some(port))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.entries.remove(&id).map(|r| (id, r)))
                .collect()
        };

        if removed.is_empty() {
            return false;
        }
        for (id, record) in &removed {
            record.handle.kill();
            debug!(id = id, port = port, "Process killed by port");
        }
        self.publish();
        true
    }

    /// Terminate every tracked process and clear the table unconditionally.
    pub fn kill_all(&self) {
        let removed: Vec<ProcessRecord> = {
            let mut table = self.lock();
            std::mem::take(&mut table.entries).into_values().collect()
        };
        for record in &removed {
            record.handle.kill();
        }
        debug!(count = removed.len(), "All processes killed");
        self.publish();
    }

    /// Remove an entry without attempting termination.
    ///
    /// Used when a process exited on its own, to avoid a double-kill race.
    pub fn unregister(&self, id: u64) {
        let removed = { self.lock().entries.remove(&id).is_some() };
        if removed {
            debug!(id = id, "Process unregistered after exit");
            self.publish();
        }
    }

    /// Get a snapshot of one tracked process.
    pub fn get(&self, id: u64) -> Option<ProcessSnapshot> {
        self.lock().entries.get(&id).map(|r| r.snapshot(id))
    }

    /// Get a snapshot of the whole table.
    pub fn get_all(&self) -> Vec<ProcessSnapshot> {
        self.lock()
            .entries
            .iter()
            .map(|(id, r)| r.snapshot(*id))
            .collect()
    }

    /// Subscribe to table-change notifications.
    ///
    /// Each mutating operation delivers a full read-only snapshot taken
    /// after the mutation completed.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ProcessSnapshot>> {
        self.inner.notify.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryTable> {
        self.inner.table.lock().expect("registry table poisoned")
    }

    fn publish(&self) {
        // Ignore send errors (no subscribers)
        let _ = self.inner.notify.send(self.get_all());
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboot_runtime::process_channel;

    fn dead_handle() -> ProcessHandle {
        // Backend dropped immediately: kills become silent no-ops, which is
        // exactly the already-dead-process case the registry must tolerate.
        let (process, controller) = process_channel();
        drop(controller);
        process.handle
    }

    #[test]
    fn test_register_and_kill() {
        let registry = ProcessRegistry::new();
        let id = registry.register(dead_handle(), "npm run dev", None);

        assert_eq!(registry.get_all().len(), 1);
        assert!(registry.kill(id));
        assert!(registry.get_all().is_empty());

        // Second kill with the same id is a no-op returning false.
        assert!(!registry.kill(id));
    }

    #[test]
    fn test_ids_monotonic_never_reused() {
        let registry = ProcessRegistry::new();
        let a = registry.register(dead_handle(), "a", None);
        registry.kill(a);
        let b = registry.register(dead_handle(), "b", None);
        assert!(b > a);
    }

    #[test]
    fn test_kill_by_port() {
        let registry = ProcessRegistry::new();
        let a = registry.register(dead_handle(), "a", Some(3000));
        let _b = registry.register(dead_handle(), "b", Some(8080));
        let c = registry.register(dead_handle(), "c", None);
        registry.set_port(c, 3000);

        assert!(registry.kill_by_port(3000));
        let remaining = registry.get_all();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].port, Some(8080));
        assert!(registry.get(a).is_none());

        assert!(!registry.kill_by_port(3000));
    }

    #[test]
    fn test_kill_all_empties_table_with_dead_handles() {
        let registry = ProcessRegistry::new();
        registry.register(dead_handle(), "a", None);
        registry.register(dead_handle(), "b", None);

        registry.kill_all();
        assert!(registry.get_all().is_empty());
    }

    #[test]
    fn test_unregister_does_not_kill() {
        let (process, mut controller) = process_channel();
        let registry = ProcessRegistry::new();
        let id = registry.register(process.handle.clone(), "a", None);

        registry.unregister(id);
        assert!(registry.get_all().is_empty());

        // No kill control message was sent.
        assert!(controller.control.try_recv().is_err());
        controller.finish(0);
    }

    #[tokio::test]
    async fn test_subscribers_get_snapshot_after_mutation() {
        let registry = ProcessRegistry::new();
        let mut rx = registry.subscribe();

        let id = registry.register(dead_handle(), "npm run dev", Some(5173));
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].port, Some(5173));

        registry.kill(id);
        let snapshot = rx.recv().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_set_port_unknown_id_is_noop() {
        let registry = ProcessRegistry::new();
        registry.set_port(42, 3000);
        assert!(registry.get_all().is_empty());
    }
}
