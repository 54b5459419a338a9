//! Process Registry
//!
//! Tracks every child process the engine is currently running, enforces the
//! global concurrency ceiling and provides the bulk-kill used on shutdown.
//!
//! # Architecture
//!
//! - Admission reserves a slot under the same lock that counts live entries,
//!   so two callers can never both take the last slot.
//! - The OS child handle stays with the execution that awaits it. The
//!   registry keeps the pid (for group signals) and a one-shot channel that
//!   tells the owning execution to start its terminate/kill sequence.
//! - Both the admission token and the registration are guards: dropping
//!   either one returns the slot, whatever path the execution took.
//!
//! The state lock is a `std::sync::Mutex` and is never held across an await,
//! so [`ProcessRegistry::kill_all`] can be called from synchronous contexts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

use super::error::ExecutionError;
use super::process;
use crate::metrics;

/// A running child owned by the registry
#[derive(Debug)]
struct ManagedProcess {
    pid: u32,
    program: String,
    started: Instant,
    started_at: DateTime<Utc>,
    terminate: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    processes: HashMap<String, ManagedProcess>,
    reserved: usize,
}

impl RegistryState {
    fn occupied(&self) -> usize {
        self.processes.len() + self.reserved
    }
}

/// Snapshot of one active execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExecution {
    pub id: String,
    pub pid: u32,
    pub program: String,
    pub runtime_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// Registry of running child processes
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    state: Mutex<RegistryState>,
    shutting_down: AtomicBool,
    idle: Notify,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave the map half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot for a new execution
    ///
    /// `limit == 0` means unlimited.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::ShuttingDown`] once [`shutdown`](Self::shutdown) was called
    /// - [`ExecutionError::Capacity`] when `limit` slots are already taken
    pub fn try_admit(self: &Arc<Self>, limit: usize) -> Result<AdmissionToken, ExecutionError> {
        if self.is_shutting_down() {
            return Err(ExecutionError::ShuttingDown);
        }

        let mut state = self.lock();
        // Re-check under the lock so shutdown cannot race an admission
        if self.is_shutting_down() {
            return Err(ExecutionError::ShuttingDown);
        }

        let active = state.occupied();
        if limit > 0 && active >= limit {
            return Err(ExecutionError::Capacity { active, limit });
        }

        state.reserved += 1;
        Ok(AdmissionToken {
            registry: Arc::clone(self),
            consumed: false,
        })
    }

    /// Remove an entry; later calls for the same id are no-ops
    pub fn release(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let removed = state.processes.remove(id);
            if state.occupied() == 0 {
                self.idle.notify_waiters();
            }
            removed
        };

        match removed {
            Some(entry) => {
                metrics::ACTIVE_PROCESSES.dec();
                debug!(
                    execution_id = %id,
                    pid = entry.pid,
                    runtime_ms = entry.started.elapsed().as_millis() as u64,
                    "Released managed process"
                );
                true
            }
            None => false,
        }
    }

    /// Send SIGTERM to every live process group and notify the owners
    ///
    /// The owning executions escalate to SIGKILL after their grace window.
    /// Returns the number of processes signalled.
    pub fn kill_all(&self) -> usize {
        let targets: Vec<(String, u32, Option<oneshot::Sender<()>>)> = {
            let mut state = self.lock();
            state
                .processes
                .iter_mut()
                .map(|(id, entry)| (id.clone(), entry.pid, entry.terminate.take()))
                .collect()
        };

        let count = targets.len();
        for (id, pid, terminate) in targets {
            info!(execution_id = %id, pid, "Terminating managed process");
            process::terminate_group(pid);
            if let Some(tx) = terminate {
                let _ = tx.send(());
            }
        }
        count
    }

    /// SIGKILL every remaining process group
    pub fn force_kill_all(&self) -> usize {
        let pids: Vec<u32> = self.lock().processes.values().map(|p| p.pid).collect();
        for pid in &pids {
            warn!(pid, "Force killing managed process");
            process::kill_group(*pid);
        }
        pids.len()
    }

    /// Close admission and terminate everything that is running
    ///
    /// Idempotent: only the first call signals processes.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Process registry shutdown already requested");
            return;
        }
        let count = self.kill_all();
        info!(terminated = count, "Process registry shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait until no process is registered or reserved
    ///
    /// Returns `false` if `timeout` expired first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().occupied() == 0 {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.lock().occupied() == 0;
            }
        }
    }

    /// Snapshot of the running executions, oldest first
    pub fn list_active(&self) -> Vec<ActiveExecution> {
        let mut active: Vec<ActiveExecution> = self
            .lock()
            .processes
            .iter()
            .map(|(id, entry)| ActiveExecution {
                id: id.clone(),
                pid: entry.pid,
                program: entry.program.clone(),
                runtime_ms: entry.started.elapsed().as_millis() as u64,
                started_at: entry.started_at,
            })
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Signal a single entry; used when registration races shutdown
    fn terminate_entry(&self, id: &str) {
        let target = {
            let mut state = self.lock();
            state
                .processes
                .get_mut(id)
                .map(|entry| (entry.pid, entry.terminate.take()))
        };
        if let Some((pid, terminate)) = target {
            process::terminate_group(pid);
            if let Some(tx) = terminate {
                let _ = tx.send(());
            }
        }
    }

    /// Registered processes plus outstanding reservations
    pub fn active_count(&self) -> usize {
        self.lock().occupied()
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A reserved slot that has not been bound to a process yet
///
/// Dropping an unused token gives the slot back.
#[derive(Debug)]
pub struct AdmissionToken {
    registry: Arc<ProcessRegistry>,
    consumed: bool,
}

impl AdmissionToken {
    /// Bind the reserved slot to a spawned process
    ///
    /// Returns the registration guard and the receiver that fires when the
    /// registry wants the process gone.
    pub fn register(
        mut self,
        id: impl Into<String>,
        pid: u32,
        program: impl Into<String>,
    ) -> (RegisteredProcess, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let id = id.into();

        {
            let mut state = self.registry.lock();
            state.reserved = state.reserved.saturating_sub(1);
            state.processes.insert(
                id.clone(),
                ManagedProcess {
                    pid,
                    program: program.into(),
                    started: Instant::now(),
                    started_at: Utc::now(),
                    terminate: Some(tx),
                },
            );
        }
        self.consumed = true;
        metrics::ACTIVE_PROCESSES.inc();

        // Shutdown may have swept the map just before this entry landed
        if self.registry.is_shutting_down() {
            self.registry.terminate_entry(&id);
        }

        let guard = RegisteredProcess {
            registry: Arc::clone(&self.registry),
            id,
            pid,
        };
        (guard, rx)
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        let mut state = self.registry.lock();
        state.reserved = state.reserved.saturating_sub(1);
        if state.occupied() == 0 {
            self.registry.idle.notify_waiters();
        }
    }
}

/// Registration guard; dropping it releases the entry
#[derive(Debug)]
pub struct RegisteredProcess {
    registry: Arc<ProcessRegistry>,
    id: String,
    pid: u32,
}

impl RegisteredProcess {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for RegisteredProcess {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}
