//! In-memory collaborators for driving watchers without real processes.

#![allow(dead_code)]

use sandbox_guard::containment::is_within_root;
use sandbox_guard::events::{ClassificationResult, RawSample, Sample};
use sandbox_guard::{
    AuditLog, Classifier, Collaborators, ContainmentCheck, GuardConfig, GuardError,
    ProcessHandle, TelemetrySource, TerminateOutcome, Terminator, WatchTarget, Watcher,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeProcess {
    killed: AtomicBool,
    taken: AtomicU64,
    exit_after: Option<u64>,
    fail_after: Option<u64>,
}

impl FakeProcess {
    pub fn endless() -> Self {
        Self::default()
    }

    /// Stops running once `samples` readings have been taken.
    pub fn exits_after(samples: u64) -> Self {
        Self {
            exit_after: Some(samples),
            ..Self::default()
        }
    }

    /// Sampling errors once `samples` readings have been taken.
    pub fn fails_after(samples: u64) -> Self {
        Self {
            fail_after: Some(samples),
            ..Self::default()
        }
    }

    pub fn samples_taken(&self) -> u64 {
        self.taken.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        let taken = self.samples_taken();
        !self.killed.load(Ordering::SeqCst) && self.exit_after.map_or(true, |limit| taken < limit)
    }
}

#[derive(Default)]
pub struct FakeSource {
    processes: Mutex<HashMap<u32, Arc<FakeProcess>>>,
    attaches: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pid: u32, process: FakeProcess) -> Arc<FakeProcess> {
        let process = Arc::new(process);
        self.processes
            .lock()
            .expect("fake source lock")
            .insert(pid, Arc::clone(&process));
        process
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }
}

impl TelemetrySource for FakeSource {
    fn attach(&self, pid: u32) -> sandbox_guard::Result<Box<dyn ProcessHandle>> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        let process = self
            .processes
            .lock()
            .expect("fake source lock")
            .get(&pid)
            .cloned()
            .ok_or(GuardError::AttachFailed { pid })?;
        Ok(Box::new(FakeHandle { pid, process }))
    }
}

struct FakeHandle {
    pid: u32,
    process: Arc<FakeProcess>,
}

impl ProcessHandle for FakeHandle {
    fn is_running(&mut self) -> bool {
        self.process.is_running()
    }

    fn sample(&mut self) -> sandbox_guard::Result<Sample> {
        let taken = self.process.samples_taken();
        if self.process.fail_after.is_some_and(|limit| taken >= limit) {
            return Err(GuardError::SampleFailed {
                pid: self.pid,
                reason: "scripted failure".to_string(),
            });
        }
        let seq = self.process.taken.fetch_add(1, Ordering::SeqCst);
        Ok(sample(seq))
    }
}

/// Sample whose `memory_rss` is its sequence number.
pub fn sample(seq: u64) -> Sample {
    Sample::from(RawSample {
        timestamp: Some(format!("2026-01-01T00:00:{:02}Z", seq % 60)),
        cpu_percent: 1.0,
        memory_rss: seq,
        threads: 1,
        ..RawSample::default()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────────────────────────────────────

pub fn verdict(label: &str, confidence: f64) -> ClassificationResult {
    let other = if label == "malicious" { "benign" } else { "malicious" };
    ClassificationResult::new(
        label,
        confidence,
        BTreeMap::from([
            (label.to_string(), confidence),
            (other.to_string(), 1.0 - confidence),
        ]),
        vec![("cpu_percent_mean".to_string(), 0.5)],
    )
}

/// Returns scripted verdicts in order, then repeats the last one.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<ClassificationResult>>,
    fallback: ClassificationResult,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn constant(label: &str, confidence: f64) -> Self {
        Self::sequence(vec![verdict(label, confidence)])
    }

    pub fn sequence(results: Vec<ClassificationResult>) -> Self {
        let fallback = results
            .last()
            .cloned()
            .unwrap_or_else(|| verdict("benign", 0.5));
        Self {
            script: Mutex::new(results.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for ScriptedClassifier {
    fn predict(&self, window: &[Sample]) -> sandbox_guard::Result<ClassificationResult> {
        assert!(!window.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("script lock").pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Containment and termination
// ─────────────────────────────────────────────────────────────────────────────

/// Pretends every process has the given working directory.
pub struct FixedCwd(pub PathBuf);

impl ContainmentCheck for FixedCwd {
    fn is_contained(&self, _pid: u32, jail_root: &Path) -> bool {
        is_within_root(&self.0, jail_root)
    }
}

#[derive(Default)]
pub struct RecordingTerminator {
    killed: Mutex<Vec<u32>>,
}

impl RecordingTerminator {
    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().expect("terminator lock").clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, pid: u32) -> TerminateOutcome {
        self.killed.lock().expect("terminator lock").push(pid);
        TerminateOutcome::Killed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

pub const JAIL_ROOT: &str = "/sandbox/abc";

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub classifier: Arc<ScriptedClassifier>,
    pub terminator: Arc<RecordingTerminator>,
    pub collaborators: Collaborators,
    pub log_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(classifier: ScriptedClassifier, cwd: &str) -> Self {
        let source = Arc::new(FakeSource::new());
        let classifier = Arc::new(classifier);
        let terminator = Arc::new(RecordingTerminator::default());
        let collaborators = Collaborators {
            source: source.clone(),
            classifier: classifier.clone(),
            containment: Arc::new(FixedCwd(PathBuf::from(cwd))),
            terminator: terminator.clone(),
        };
        Self {
            source,
            classifier,
            terminator,
            collaborators,
            log_dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.log_dir.path().join("logs")
    }

    pub fn audit_log(&self) -> AuditLog {
        AuditLog::in_dir(&self.audit_dir())
    }

    pub fn watcher(&self, pid: u32, config: GuardConfig) -> Watcher {
        Watcher::new(
            WatchTarget {
                pid,
                jail_root: PathBuf::from(JAIL_ROOT),
                command: vec!["./payload".to_string(), "--fast".to_string()],
                run_id: format!("live-{pid}"),
            },
            Arc::new(config),
            self.collaborators.clone(),
            Arc::new(self.audit_log()),
        )
    }

    pub fn actions(&self) -> Vec<String> {
        self.audit_log()
            .read_all()
            .expect("read audit log")
            .into_iter()
            .map(|event| event.action.to_string())
            .collect()
    }
}

pub fn fast_config(min_samples: usize) -> GuardConfig {
    GuardConfig {
        poll_interval: 0.01,
        min_samples,
        kill_threshold: 0.85,
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    condition()
}
