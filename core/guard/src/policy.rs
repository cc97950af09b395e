//! Maps a classifier verdict onto a guard action.
//!
//! Rules, first match wins:
//! 1. `malicious` at or above the kill threshold is a termination candidate.
//!    The watcher then consults containment before acting.
//! 2. A label change, or a confidence move of at least [`HYSTERESIS_DELTA`],
//!    is recorded as an update.
//! 3. Anything else is held silently, which bounds audit volume when the
//!    classifier output jitters.

use sandbox_guard_events::ClassificationResult;

use crate::config::GuardConfig;

/// Confidence change that counts as a meaningful update.
pub const HYSTERESIS_DELTA: f64 = 0.2;

/// Last verdict that was recorded, per watcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionState {
    pub last_label: Option<String>,
    pub last_confidence: f64,
}

impl DecisionState {
    pub fn observe(&mut self, result: &ClassificationResult) {
        self.last_label = Some(result.label.clone());
        self.last_confidence = result.confidence;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Confidently malicious; terminate if contained.
    TerminateCandidate,
    /// Significant change since the last recorded verdict.
    Update,
    /// Nothing worth recording.
    Hold,
}

pub fn decide(
    result: &ClassificationResult,
    state: &DecisionState,
    config: &GuardConfig,
) -> Verdict {
    if result.is_malicious() && result.confidence >= config.kill_threshold {
        return Verdict::TerminateCandidate;
    }

    let label_changed = state.last_label.as_deref() != Some(result.label.as_str());
    let confidence_moved = (result.confidence - state.last_confidence).abs() >= HYSTERESIS_DELTA;
    if label_changed || confidence_moved {
        Verdict::Update
    } else {
        Verdict::Hold
    }
}
