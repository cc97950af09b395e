//! Process termination.

/// Result of one termination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Killed,
    /// The target had already exited. Not an error.
    AlreadyGone,
    /// The pid was rejected or the signal could not be delivered.
    Failed,
}

/// Kills a process. A target that is already gone reports
/// [`TerminateOutcome::AlreadyGone`].
pub trait Terminator: Send + Sync {
    fn terminate(&self, pid: u32) -> TerminateOutcome;
}

/// Sends `SIGKILL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTerminator;

impl Terminator for SignalTerminator {
    fn terminate(&self, pid: u32) -> TerminateOutcome {
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            tracing::warn!(pid, "Refusing to signal out-of-range pid");
            return TerminateOutcome::Failed;
        };
        // pid 0 and negative pids address process groups.
        if raw_pid <= 0 {
            tracing::warn!(pid, "Refusing to signal process group");
            return TerminateOutcome::Failed;
        }

        // SAFETY: libc::kill only delivers a signal and touches no memory of
        // ours. raw_pid is positive, so it names a single process, never a
        // group. A target that already exited yields ESRCH.
        let rc = unsafe { libc::kill(raw_pid, libc::SIGKILL) };
        if rc == 0 {
            tracing::info!(pid, "Sent SIGKILL");
            return TerminateOutcome::Killed;
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            tracing::debug!(pid, "Process already gone before SIGKILL");
            TerminateOutcome::AlreadyGone
        } else {
            tracing::warn!(pid, error = %err, "Failed to send SIGKILL");
            TerminateOutcome::Failed
        }
    }
}
