//! Registry of running watchers.
//!
//! `watch` and `stop` are the only ways in. The registry mutex is held for a
//! map lookup and insert/remove only; thread spawning and all monitoring
//! work happen outside it, so calls for different pids never wait on each
//! other beyond that. Calls for the same pid serialize on the same lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::audit::AuditLog;
use crate::cancel::CancelToken;
use crate::config::GuardConfig;
use crate::error::Result;
use crate::watcher::{Collaborators, Lifecycle, WatchTarget, Watcher, WatcherState};

/// Registry entry for one watched pid.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    pub pid: u32,
    pub run_id: String,
    generation: u64,
    cancel: CancelToken,
    lifecycle: Arc<Lifecycle>,
}

impl WatchHandle {
    pub fn state(&self) -> WatcherState {
        self.lifecycle.current()
    }
}

#[derive(Debug, Default)]
struct Registry {
    handles: Mutex<HashMap<u32, WatchHandle>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, WatchHandle>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Removes the entry for `pid` only if it is still the same watch. A
    /// stop followed by a fresh watch must survive the old watcher exiting.
    fn release(&self, pid: u32, generation: u64) {
        let mut handles = self.lock();
        if handles
            .get(&pid)
            .is_some_and(|handle| handle.generation == generation)
        {
            handles.remove(&pid);
        }
    }
}

/// Deregisters a watch when its thread ends, including by panic, and moves
/// a lifecycle that never reached a terminal state to `Exited`.
struct ReleaseOnExit {
    registry: Arc<Registry>,
    pid: u32,
    generation: u64,
    lifecycle: Arc<Lifecycle>,
}

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!(pid = self.pid, "Watcher panicked; releasing its registration");
        }
        if !self.lifecycle.current().is_terminal() {
            self.lifecycle.set(WatcherState::Exited);
        }
        self.registry.release(self.pid, self.generation);
    }
}

pub struct Supervisor {
    config: Arc<GuardConfig>,
    collaborators: Collaborators,
    audit: Arc<AuditLog>,
    registry: Arc<Registry>,
    next_generation: AtomicU64,
    log_dir_ready: AtomicBool,
}

impl Supervisor {
    /// Fails with [`GuardError::ConfigInvalid`](crate::GuardError::ConfigInvalid)
    /// when `config` does not validate.
    pub fn new(
        config: GuardConfig,
        collaborators: Collaborators,
        audit: AuditLog,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            audit: Arc::new(audit),
            registry: Arc::new(Registry::default()),
            next_generation: AtomicU64::new(0),
            log_dir_ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Starts guarding `pid`. A no-op if the pid is already watched.
    ///
    /// `run_id` defaults to `live-{pid}`.
    pub fn watch(
        &self,
        pid: u32,
        jail_root: impl Into<PathBuf>,
        command: Vec<String>,
        run_id: Option<String>,
    ) {
        self.ensure_log_dir();

        let handle = {
            let mut handles = self.registry.lock();
            if handles.contains_key(&pid) {
                tracing::debug!(pid, "Already watching; ignoring watch request");
                return;
            }
            let handle = WatchHandle {
                pid,
                run_id: run_id.unwrap_or_else(|| format!("live-{pid}")),
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                cancel: CancelToken::new(),
                lifecycle: Arc::new(Lifecycle::default()),
            };
            handles.insert(pid, handle.clone());
            handle
        };

        let target = WatchTarget {
            pid,
            jail_root: jail_root.into(),
            command,
            run_id: handle.run_id.clone(),
        };
        tracing::info!(
            pid,
            run_id = %target.run_id,
            jail_root = %target.jail_root.display(),
            "Watching process"
        );

        let watcher = Watcher::new(
            target,
            Arc::clone(&self.config),
            self.collaborators.clone(),
            Arc::clone(&self.audit),
        )
        .with_lifecycle(Arc::clone(&handle.lifecycle));

        let generation = handle.generation;
        let registry = Arc::clone(&self.registry);
        let spawned = thread::Builder::new()
            .name(format!("guard-{pid}"))
            .spawn(move || {
                let _release = ReleaseOnExit {
                    registry,
                    pid: handle.pid,
                    generation: handle.generation,
                    lifecycle: Arc::clone(&handle.lifecycle),
                };
                watcher.run(&handle.cancel);
            });

        if let Err(err) = spawned {
            tracing::error!(pid, error = %err, "Failed to spawn watcher thread");
            self.registry.release(pid, generation);
        }
    }

    /// Signals the watcher for `pid` to stop and forgets it immediately.
    /// A no-op for unknown pids.
    pub fn stop(&self, pid: u32) {
        let removed = self.registry.lock().remove(&pid);
        if let Some(handle) = removed {
            handle.cancel.cancel();
            tracing::info!(pid, run_id = %handle.run_id, "Stopped watching process");
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<WatchHandle> = self.registry.lock().drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.cancel.cancel();
        }
    }

    pub fn is_watching(&self, pid: u32) -> bool {
        self.registry.lock().contains_key(&pid)
    }

    pub fn watched_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.registry.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Lifecycle cell of the watcher for `pid`, or `None` once the pid is no
    /// longer registered. A cell fetched earlier keeps reporting the
    /// watcher's state after deregistration.
    pub fn lifecycle(&self, pid: u32) -> Option<Arc<Lifecycle>> {
        self.registry
            .lock()
            .get(&pid)
            .map(|handle| Arc::clone(&handle.lifecycle))
    }

    fn ensure_log_dir(&self) {
        if self.log_dir_ready.load(Ordering::Acquire) {
            return;
        }
        match self.audit.ensure_dir() {
            Ok(()) => self.log_dir_ready.store(true, Ordering::Release),
            Err(err) => tracing::warn!(error = %err, "Failed to create guard log directory"),
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
