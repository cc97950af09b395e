//! # sandbox-guard
//!
//! Live guard for processes running inside a sandbox. Each watched process
//! gets its own watcher thread that samples resource telemetry, asks a
//! classifier for a verdict, and kills the process when it is confidently
//! malicious and provably inside its jail root.
//!
//! ## Design Principles
//!
//! - **Thread per process**: a stalled watcher never delays another one.
//! - **Single writer**: buffers and decision state belong to one watcher;
//!   only the supervisor registry is shared, behind a mutex.
//! - **Fail closed**: when containment cannot be proven, nothing is killed.
//! - **Errors stay local**: watcher failures end that watcher and are never
//!   reported to the supervisor's callers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sandbox_guard::{AuditLog, Collaborators, GuardConfig, LinearModel, Supervisor};
//! use std::sync::Arc;
//!
//! let model = Arc::new(LinearModel::from_path("model.json".as_ref())?);
//! let supervisor = Supervisor::new(
//!     GuardConfig::default(),
//!     Collaborators::system(model),
//!     AuditLog::in_dir("/var/log/sandbox-guard".as_ref()),
//! )?;
//! supervisor.watch(pid, "/sandbox/abc", vec!["./job".into()], None);
//! ```

pub mod audit;
pub mod buffer;
pub mod cancel;
pub mod classifier;
pub mod config;
pub mod containment;
pub mod error;
pub mod policy;
pub mod source;
pub mod supervisor;
pub mod terminate;
pub mod watcher;
pub mod windowing;

pub use audit::{read_events, AuditLog, AUDIT_FILE_NAME};
pub use buffer::{SampleBuffer, BUFFER_CAPACITY};
pub use cancel::CancelToken;
pub use classifier::{window_features, Classifier, LinearModel};
pub use config::{load_config, GuardConfig, GuardFileConfig};
pub use containment::{ContainmentCheck, ProcCwdContainment};
pub use error::{GuardError, Result};
pub use policy::{decide, DecisionState, Verdict, HYSTERESIS_DELTA};
pub use source::{ProcessHandle, SysinfoSource, TelemetrySource};
pub use supervisor::{Supervisor, WatchHandle};
pub use terminate::{SignalTerminator, TerminateOutcome, Terminator};
pub use watcher::{Collaborators, Lifecycle, WatchTarget, Watcher, WatcherState};
pub use windowing::{extract_sequences, normalize_window, SequenceExample, TelemetryRun};

pub use sandbox_guard_events as events;
