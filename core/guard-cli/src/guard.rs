//! `run` and `watch`: guard one process until its watcher finishes.

use sandbox_guard::{AuditLog, Collaborators, GuardConfig, LinearModel, Supervisor, WatcherState};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Extra time a watcher gets to notice its process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct GuardSession {
    supervisor: Supervisor,
}

impl GuardSession {
    pub fn new(config: GuardConfig, model: &Path, log_dir: &Path) -> Result<Self, String> {
        let model = LinearModel::from_path(model).map_err(|err| err.to_string())?;
        tracing::info!(labels = ?model.labels(), "Model loaded");

        let supervisor = Supervisor::new(
            config,
            Collaborators::system(Arc::new(model)),
            AuditLog::in_dir(log_dir),
        )
        .map_err(|err| err.to_string())?;
        Ok(Self { supervisor })
    }

    /// Spawns `command` inside `jail_root` and guards it. Returns the exit
    /// code to propagate (128 + signal when killed).
    pub fn run(
        &self,
        jail_root: &Path,
        command: &[String],
        run_id: Option<String>,
    ) -> Result<i32, String> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| "No command given".to_string())?;
        let jail_root = canonical_jail(jail_root)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&jail_root)
            .spawn()
            .map_err(|err| format!("Failed to spawn {}: {}", program, err))?;
        let pid = child.id();
        tracing::info!(pid, program = %program, "Spawned guarded command");

        self.supervisor
            .watch(pid, jail_root, command.to_vec(), run_id);
        let lifecycle = self.supervisor.lifecycle(pid);

        let status = child
            .wait()
            .map_err(|err| format!("Failed to wait for {}: {}", program, err))?;
        self.drain(pid);

        let outcome = lifecycle.map(|cell| cell.current());
        tracing::info!(pid, status = %status, outcome = ?outcome, "Guarded command finished");
        Ok(status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(1))
    }

    /// Guards an already running process until its watcher finishes.
    pub fn watch(
        &self,
        pid: u32,
        jail_root: &Path,
        command: Vec<String>,
        run_id: Option<String>,
    ) -> Result<WatcherState, String> {
        let jail_root = canonical_jail(jail_root)?;
        self.supervisor.watch(pid, jail_root, command, run_id);
        let lifecycle = self
            .supervisor
            .lifecycle(pid)
            .ok_or_else(|| format!("Watcher for pid {} ended immediately", pid))?;

        let poll = self.supervisor.config().poll_duration();
        while self.supervisor.is_watching(pid) {
            thread::sleep(poll);
        }
        Ok(lifecycle.current())
    }

    fn drain(&self, pid: u32) {
        let deadline = Instant::now() + self.supervisor.config().poll_duration() + DRAIN_GRACE;
        while self.supervisor.is_watching(pid) {
            if Instant::now() >= deadline {
                tracing::warn!(pid, "Watcher still running after process exit; stopping it");
                self.supervisor.stop(pid);
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

fn canonical_jail(jail_root: &Path) -> Result<PathBuf, String> {
    let resolved = fs_err::canonicalize(jail_root).map_err(|err| err.to_string())?;
    if !resolved.is_dir() {
        return Err(format!("Jail root {} is not a directory", resolved.display()));
    }
    Ok(resolved)
}
