//! Record types shared by the sandbox guard runtime and its tooling.
//!
//! Telemetry samples, classifier verdicts, and audit events all cross a
//! boundary (the sampling source, the model, the JSONL audit file), so their
//! shapes live here once. Optional telemetry fields are defaulted when a
//! sample is built, never by the code that reads it.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value of the `event` field on every audit line written by the guard.
pub const AUDIT_EVENT_KIND: &str = "sandbox_guard";

/// Maximum number of feature contributions carried by a verdict.
pub const MAX_TOP_FEATURES: usize = 5;

/// Current UTC time as an RFC 3339 string with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Telemetry
// ═══════════════════════════════════════════════════════════════════════════════

/// One telemetry reading for one process.
///
/// Deserialization goes through [`RawSample`], so recorded runs with missing
/// optional columns come out fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSample")]
pub struct Sample {
    pub timestamp: String,
    pub cpu_percent: f64,
    pub memory_rss: u64,
    pub memory_vms: u64,
    pub threads: u64,
    pub open_files: u64,
    pub socket_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// A sample as reported by a source that may not know every column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSample {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_rss: u64,
    #[serde(default)]
    pub memory_vms: Option<u64>,
    #[serde(default)]
    pub threads: u64,
    #[serde(default)]
    pub open_files: Option<u64>,
    #[serde(default)]
    pub socket_count: Option<u64>,
    #[serde(default)]
    pub read_bytes: Option<u64>,
    #[serde(default)]
    pub write_bytes: Option<u64>,
}

impl From<RawSample> for Sample {
    fn from(raw: RawSample) -> Self {
        let cpu_percent = if raw.cpu_percent.is_finite() {
            raw.cpu_percent.max(0.0)
        } else {
            0.0
        };
        Self {
            timestamp: raw.timestamp.unwrap_or_else(now_timestamp),
            cpu_percent,
            memory_rss: raw.memory_rss,
            // vms of 0 means the source could not read it
            memory_vms: raw
                .memory_vms
                .filter(|vms| *vms > 0)
                .unwrap_or(raw.memory_rss),
            threads: raw.threads,
            open_files: raw.open_files.unwrap_or(0),
            socket_count: raw.socket_count.unwrap_or(0),
            read_bytes: raw.read_bytes.unwrap_or(0),
            write_bytes: raw.write_bytes.unwrap_or(0),
        }
    }
}

impl Sample {
    /// Numeric value of one telemetry column.
    pub fn value(&self, key: FeatureKey) -> f64 {
        match key {
            FeatureKey::CpuPercent => self.cpu_percent,
            FeatureKey::MemoryRss => self.memory_rss as f64,
            FeatureKey::MemoryVms => self.memory_vms as f64,
            FeatureKey::Threads => self.threads as f64,
            FeatureKey::OpenFiles => self.open_files as f64,
            FeatureKey::SocketCount => self.socket_count as f64,
            FeatureKey::ReadBytes => self.read_bytes as f64,
            FeatureKey::WriteBytes => self.write_bytes as f64,
        }
    }
}

/// Numeric telemetry columns of a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    CpuPercent,
    MemoryRss,
    MemoryVms,
    Threads,
    OpenFiles,
    SocketCount,
    ReadBytes,
    WriteBytes,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 8] = [
        FeatureKey::CpuPercent,
        FeatureKey::MemoryRss,
        FeatureKey::MemoryVms,
        FeatureKey::Threads,
        FeatureKey::OpenFiles,
        FeatureKey::SocketCount,
        FeatureKey::ReadBytes,
        FeatureKey::WriteBytes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKey::CpuPercent => "cpu_percent",
            FeatureKey::MemoryRss => "memory_rss",
            FeatureKey::MemoryVms => "memory_vms",
            FeatureKey::Threads => "threads",
            FeatureKey::OpenFiles => "open_files",
            FeatureKey::SocketCount => "socket_count",
            FeatureKey::ReadBytes => "read_bytes",
            FeatureKey::WriteBytes => "write_bytes",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════════════════════════════════════════

pub const LABEL_MALICIOUS: &str = "malicious";
pub const LABEL_BENIGN: &str = "benign";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    /// `(feature_name, contribution)` pairs, strongest first.
    pub top_features: Vec<(String, f64)>,
}

impl ClassificationResult {
    /// Builds a result, clamping confidence into `[0, 1]` and keeping at
    /// most [`MAX_TOP_FEATURES`] contributions.
    pub fn new(
        label: impl Into<String>,
        confidence: f64,
        probabilities: BTreeMap<String, f64>,
        mut top_features: Vec<(String, f64)>,
    ) -> Self {
        top_features.truncate(MAX_TOP_FEATURES);
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            label: label.into(),
            confidence,
            probabilities,
            top_features,
        }
    }

    pub fn is_malicious(&self) -> bool {
        self.label == LABEL_MALICIOUS
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Audit
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    /// Verdict changed enough to be worth recording.
    Update,
    /// Process was confined to its jail and has been killed.
    Terminated,
    /// Kill was warranted but the process was not inside its jail.
    SkipTermination,
    /// Monitoring ended without a kill; carries the last verdict.
    Exit,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Update => "update",
            AuditAction::Terminated => "terminated",
            AuditAction::SkipTermination => "skip-termination",
            AuditAction::Exit => "exit",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log. Self-contained: nothing outside the line is
/// needed to interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    pub timestamp: String,
    pub pid: u32,
    pub run_id: String,
    pub action: AuditAction,
    pub label: String,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    pub top_features: Vec<(String, f64)>,
    pub command: Vec<String>,
}

impl AuditEvent {
    pub fn new(
        pid: u32,
        run_id: &str,
        command: &[String],
        action: AuditAction,
        result: &ClassificationResult,
    ) -> Self {
        Self {
            event: AUDIT_EVENT_KIND.to_string(),
            timestamp: now_timestamp(),
            pid,
            run_id: run_id.to_string(),
            action,
            label: result.label.clone(),
            confidence: result.confidence,
            probabilities: result.probabilities.clone(),
            top_features: result.top_features.clone(),
            command: command.to_vec(),
        }
    }
}
