//! Per-process monitoring loop.
//!
//! ```text
//! Attaching ──(not found)──────────────────────────────▶ Exited
//!     │
//!     ▼
//! Sampling ◀──▶ Classifying ──(kill, contained)────────▶ Terminated
//!     │               └──────(kill, not contained)─────▶ Suppressed
//!     ├──(cancel)──────────────────────────────────────▶ Stopped
//!     └──(process gone / sample error)─────────────────▶ Exited
//! ```
//!
//! The buffer and decision state belong to the watcher alone. When the loop
//! ends without a kill and a verdict exists, one final `exit` event carries
//! that verdict into the audit log.

use sandbox_guard_events::{AuditAction, AuditEvent, ClassificationResult};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::audit::AuditLog;
use crate::buffer::SampleBuffer;
use crate::cancel::CancelToken;
use crate::classifier::Classifier;
use crate::config::GuardConfig;
use crate::containment::{ContainmentCheck, ProcCwdContainment};
use crate::policy::{decide, DecisionState, Verdict};
use crate::source::{ProcessHandle, SysinfoSource, TelemetrySource};
use crate::terminate::{SignalTerminator, Terminator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherState {
    #[default]
    Attaching,
    Sampling,
    Classifying,
    /// Killed after a contained malicious verdict.
    Terminated,
    /// Process exited, vanished, or could not be sampled.
    Exited,
    /// Cancelled through the supervisor.
    Stopped,
    /// Kill warranted but the process was outside its jail; monitoring ends.
    Suppressed,
}

impl WatcherState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WatcherState::Terminated
                | WatcherState::Exited
                | WatcherState::Stopped
                | WatcherState::Suppressed
        )
    }
}

/// Current state of one watcher, readable from other threads.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: Mutex<WatcherState>,
}

impl Lifecycle {
    pub fn current(&self) -> WatcherState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set(&self, next: WatcherState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = next;
    }
}

/// External collaborators, shared by every watcher of a supervisor.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn TelemetrySource>,
    pub classifier: Arc<dyn Classifier>,
    pub containment: Arc<dyn ContainmentCheck>,
    pub terminator: Arc<dyn Terminator>,
}

impl Collaborators {
    /// sysinfo sampling, `/proc` containment, and `SIGKILL` termination.
    pub fn system(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            source: Arc::new(SysinfoSource),
            classifier,
            containment: Arc::new(ProcCwdContainment),
            terminator: Arc::new(SignalTerminator),
        }
    }
}

/// What one watcher guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub pid: u32,
    pub jail_root: PathBuf,
    pub command: Vec<String>,
    pub run_id: String,
}

pub struct Watcher {
    target: WatchTarget,
    config: Arc<GuardConfig>,
    collaborators: Collaborators,
    audit: Arc<AuditLog>,
    lifecycle: Arc<Lifecycle>,
    buffer: SampleBuffer,
    decision: DecisionState,
    last_result: Option<ClassificationResult>,
}

impl Watcher {
    pub fn new(
        target: WatchTarget,
        config: Arc<GuardConfig>,
        collaborators: Collaborators,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            target,
            config,
            collaborators,
            audit,
            lifecycle: Arc::new(Lifecycle::default()),
            buffer: SampleBuffer::new(),
            decision: DecisionState::default(),
            last_result: None,
        }
    }

    /// Reports state transitions into a lifecycle cell owned elsewhere.
    pub fn with_lifecycle(mut self, lifecycle: Arc<Lifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn decision_state(&self) -> &DecisionState {
        &self.decision
    }

    pub fn last_result(&self) -> Option<&ClassificationResult> {
        self.last_result.as_ref()
    }

    /// Runs until the process exits, the token is cancelled, or a kill
    /// decision ends monitoring. Returns the terminal state.
    pub fn run(mut self, cancel: &CancelToken) -> WatcherState {
        let Some(mut handle) = self.attach() else {
            return WatcherState::Exited;
        };

        let poll = self.config.poll_duration();
        let outcome = loop {
            if cancel.is_cancelled() {
                break WatcherState::Stopped;
            }
            if !handle.is_running() {
                break WatcherState::Exited;
            }
            if let Some(terminal) = self.step(handle.as_mut()) {
                break terminal;
            }
            if cancel.wait(poll) {
                break WatcherState::Stopped;
            }
        };

        self.finish(outcome)
    }

    /// Obtains a sampling handle. On failure the watcher is `Exited` and
    /// nothing is written to the audit log.
    pub fn attach(&mut self) -> Option<Box<dyn ProcessHandle>> {
        self.lifecycle.set(WatcherState::Attaching);
        match self.collaborators.source.attach(self.target.pid) {
            Ok(handle) => {
                tracing::debug!(pid = self.target.pid, run_id = %self.target.run_id, "Watcher attached");
                self.lifecycle.set(WatcherState::Sampling);
                Some(handle)
            }
            Err(err) => {
                tracing::debug!(pid = self.target.pid, error = %err, "Watcher could not attach");
                self.lifecycle.set(WatcherState::Exited);
                None
            }
        }
    }

    /// One tick: take a sample and, once enough are buffered, classify and
    /// act. Returns the terminal state if this tick ended monitoring.
    pub fn step(&mut self, handle: &mut dyn ProcessHandle) -> Option<WatcherState> {
        self.lifecycle.set(WatcherState::Sampling);
        let sample = match handle.sample() {
            Ok(sample) => sample,
            Err(err) => {
                tracing::debug!(pid = self.target.pid, error = %err, "Sampling failed; treating as exit");
                return Some(WatcherState::Exited);
            }
        };
        self.buffer.push(sample);

        if self.buffer.len() < self.config.min_samples {
            return None;
        }

        self.lifecycle.set(WatcherState::Classifying);
        let window = self.buffer.window();
        let result = match self.collaborators.classifier.predict(window) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(pid = self.target.pid, error = %err, "Classifier failed; skipping tick");
                self.lifecycle.set(WatcherState::Sampling);
                return None;
            }
        };

        let outcome = self.act(&result);
        self.last_result = Some(result);
        if outcome.is_none() {
            self.lifecycle.set(WatcherState::Sampling);
        }
        outcome
    }

    fn act(&mut self, result: &ClassificationResult) -> Option<WatcherState> {
        match decide(result, &self.decision, &self.config) {
            Verdict::TerminateCandidate => {
                let pid = self.target.pid;
                if self
                    .collaborators
                    .containment
                    .is_contained(pid, &self.target.jail_root)
                {
                    let outcome = self.collaborators.terminator.terminate(pid);
                    tracing::debug!(pid, outcome = ?outcome, "Termination attempted");
                    self.record(AuditAction::Terminated, result);
                    Some(WatcherState::Terminated)
                } else {
                    tracing::warn!(
                        pid,
                        jail_root = %self.target.jail_root.display(),
                        confidence = result.confidence,
                        "Malicious process is outside its jail; not terminating"
                    );
                    self.record(AuditAction::SkipTermination, result);
                    Some(WatcherState::Suppressed)
                }
            }
            Verdict::Update => {
                self.decision.observe(result);
                self.record(AuditAction::Update, result);
                None
            }
            Verdict::Hold => None,
        }
    }

    fn finish(&mut self, outcome: WatcherState) -> WatcherState {
        if outcome != WatcherState::Terminated {
            if let Some(result) = &self.last_result {
                self.record(AuditAction::Exit, result);
            }
        }
        self.lifecycle.set(outcome);
        tracing::info!(
            pid = self.target.pid,
            run_id = %self.target.run_id,
            outcome = ?outcome,
            samples = self.buffer.len(),
            "Watcher finished"
        );
        outcome
    }

    fn record(&self, action: AuditAction, result: &ClassificationResult) {
        tracing::info!(
            pid = self.target.pid,
            run_id = %self.target.run_id,
            action = %action,
            label = %result.label,
            confidence = result.confidence,
            "Guard action"
        );
        let event = AuditEvent::new(
            self.target.pid,
            &self.target.run_id,
            &self.target.command,
            action,
            result,
        );
        if let Err(err) = self.audit.append(&event) {
            tracing::warn!(pid = self.target.pid, error = %err, "Failed to write audit event");
        }
    }
}
