//! Classifier collaborator and the linear model shipped with the guard.
//!
//! ## Concurrency contract
//!
//! `predict` takes `&self` and `Classifier: Send + Sync`, so one instance is
//! shared by every watcher and may be called from several threads at once.
//! An implementation with mutable inference state must synchronize
//! internally. [`LinearModel`] is immutable after loading.

use sandbox_guard_events::{ClassificationResult, FeatureKey, Sample};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{GuardError, Result};

pub trait Classifier: Send + Sync {
    /// Classifies a window of samples, oldest first.
    fn predict(&self, window: &[Sample]) -> Result<ClassificationResult>;
}

/// Summary statistics of every telemetry column over a window:
/// `<column>_mean`, `<column>_max`, and `<column>_delta` (last minus first).
pub fn window_features(window: &[Sample]) -> BTreeMap<String, f64> {
    let mut features = BTreeMap::new();
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return features;
    };

    for key in FeatureKey::ALL {
        let values = window.iter().map(|sample| sample.value(key));
        let sum: f64 = values.clone().sum();
        let max = values.fold(f64::NEG_INFINITY, f64::max);
        features.insert(format!("{key}_mean"), sum / window.len() as f64);
        features.insert(format!("{key}_max"), max);
        features.insert(format!("{key}_delta"), last.value(key) - first.value(key));
    }
    features
}

/// On-disk model: standardization parameters plus one linear scorer per
/// label, combined with softmax.
#[derive(Debug, Clone, Deserialize)]
struct ModelArtifact {
    labels: Vec<String>,
    features: Vec<String>,
    mean: Vec<f64>,
    scale: Vec<f64>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    #[serde(default)]
    feature_importances: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    labels: Vec<String>,
    features: Vec<String>,
    mean: Vec<f64>,
    scale: Vec<f64>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    importances: Vec<f64>,
}

impl LinearModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .map_err(|err| GuardError::io(format!("reading model {}", path.display()), err))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_str(content)
            .map_err(|err| GuardError::json("parsing model artifact", err))?;
        Self::from_artifact(artifact)
    }

    fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        let width = artifact.features.len();
        if artifact.labels.is_empty() || width == 0 {
            return Err(GuardError::ModelInvalid(
                "model needs at least one label and one feature".to_string(),
            ));
        }
        if artifact.mean.len() != width || artifact.scale.len() != width {
            return Err(GuardError::ModelInvalid(format!(
                "mean/scale length must equal feature count {width}"
            )));
        }
        if artifact.weights.len() != artifact.labels.len()
            || artifact.bias.len() != artifact.labels.len()
        {
            return Err(GuardError::ModelInvalid(
                "weights and bias need one entry per label".to_string(),
            ));
        }
        if let Some(row) = artifact.weights.iter().find(|row| row.len() != width) {
            return Err(GuardError::ModelInvalid(format!(
                "weight row has {} values, expected {width}",
                row.len()
            )));
        }

        let known = known_feature_names();
        if let Some(unknown) = artifact.features.iter().find(|name| !known.contains(*name)) {
            return Err(GuardError::ModelInvalid(format!("unknown feature '{unknown}'")));
        }

        let uniform = 1.0 / width as f64;
        let importances = artifact
            .features
            .iter()
            .map(|name| {
                if artifact.feature_importances.is_empty() {
                    uniform
                } else {
                    artifact.feature_importances.get(name).copied().unwrap_or(0.0)
                }
            })
            .collect();

        Ok(Self {
            labels: artifact.labels,
            features: artifact.features,
            mean: artifact.mean,
            scale: artifact.scale,
            weights: artifact.weights,
            bias: artifact.bias,
            importances,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn standardize(&self, summary: &BTreeMap<String, f64>) -> Vec<f64> {
        self.features
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let value = summary.get(name).copied().unwrap_or(0.0);
                let scale = self.scale[index];
                if scale == 0.0 {
                    0.0
                } else {
                    (value - self.mean[index]) / scale
                }
            })
            .collect()
    }

    fn explain(&self, zscores: &[f64]) -> Vec<(String, f64)> {
        let mut contributions: Vec<(String, f64)> = self
            .features
            .iter()
            .zip(zscores)
            .zip(&self.importances)
            .map(|((name, z), importance)| (name.clone(), z.abs() * importance))
            .collect();
        contributions.sort_by(|left, right| right.1.total_cmp(&left.1));
        contributions
    }
}

impl Classifier for LinearModel {
    fn predict(&self, window: &[Sample]) -> Result<ClassificationResult> {
        if window.is_empty() {
            return Err(GuardError::EmptyWindow);
        }

        let zscores = self.standardize(&window_features(window));
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| row.iter().zip(&zscores).map(|(w, z)| w * z).sum::<f64>() + bias)
            .collect();
        let probabilities = softmax(&logits);

        let (best, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (index, p)| {
                if p > acc.1 {
                    (index, p)
                } else {
                    acc
                }
            });

        let distribution = self
            .labels
            .iter()
            .cloned()
            .zip(probabilities.iter().copied())
            .collect();

        Ok(ClassificationResult::new(
            self.labels[best].clone(),
            confidence,
            distribution,
            self.explain(&zscores),
        ))
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|logit| (logit - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|value| value / total).collect()
}

fn known_feature_names() -> HashSet<String> {
    FeatureKey::ALL
        .iter()
        .flat_map(|key| {
            ["mean", "max", "delta"]
                .into_iter()
                .map(move |stat| format!("{key}_{stat}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_guard_events::{RawSample, MAX_TOP_FEATURES};

    const MODEL: &str = r#"{
        "labels": ["benign", "malicious"],
        "features": ["cpu_percent_mean", "threads_max", "memory_rss_delta",
                     "open_files_max", "write_bytes_delta", "socket_count_max"],
        "mean": [10.0, 2.0, 0.0, 5.0, 0.0, 0.0],
        "scale": [10.0, 2.0, 1000000.0, 5.0, 1000000.0, 0.0],
        "weights": [[-1.0, -1.0, -1.0, 0.0, 0.0, 0.0],
                    [ 1.0,  1.0,  1.0, 0.0, 0.0, 0.0]],
        "bias": [0.0, 0.0],
        "feature_importances": {"cpu_percent_mean": 0.5, "threads_max": 0.3}
    }"#;

    fn window(cpu: f64, threads: u64, len: u64) -> Vec<Sample> {
        (0..len)
            .map(|seq| {
                Sample::from(RawSample {
                    timestamp: Some(format!("t{seq}")),
                    cpu_percent: cpu,
                    memory_rss: 4096,
                    threads,
                    ..RawSample::default()
                })
            })
            .collect()
    }

    #[test]
    fn busy_window_classifies_malicious() {
        let model = LinearModel::from_json(MODEL).expect("load model");
        let result = model.predict(&window(95.0, 64, 8)).expect("predict");

        assert_eq!(result.label, "malicious");
        assert!(result.confidence > 0.99);
        let total: f64 = result.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(result.top_features[0].0, "threads_max");
        assert!(result.top_features.len() <= MAX_TOP_FEATURES);
    }

    #[test]
    fn quiet_window_classifies_benign() {
        let model = LinearModel::from_json(MODEL).expect("load model");
        let result = model.predict(&window(0.0, 1, 8)).expect("predict");
        assert_eq!(result.label, "benign");
        assert_eq!(result.confidence, result.probabilities["benign"]);
    }

    #[test]
    fn empty_window_is_rejected() {
        let model = LinearModel::from_json(MODEL).expect("load model");
        assert!(matches!(model.predict(&[]), Err(GuardError::EmptyWindow)));
    }

    #[test]
    fn rejects_mismatched_dimensions_and_unknown_features() {
        let short_mean = MODEL.replace("[10.0, 2.0, 0.0, 5.0, 0.0, 0.0]", "[10.0]");
        assert!(matches!(
            LinearModel::from_json(&short_mean),
            Err(GuardError::ModelInvalid(_))
        ));

        let unknown = MODEL.replace("\"threads_max\", \"memory_rss_delta\"", "\"gpu_max\", \"memory_rss_delta\"");
        assert!(matches!(
            LinearModel::from_json(&unknown),
            Err(GuardError::ModelInvalid(_))
        ));
    }

    #[test]
    fn window_features_summarize_columns() {
        let mut samples = window(10.0, 2, 3);
        samples[2].cpu_percent = 40.0;
        samples[2].memory_rss = 8192;
        let features = window_features(&samples);

        assert_eq!(features["cpu_percent_mean"], 20.0);
        assert_eq!(features["cpu_percent_max"], 40.0);
        assert_eq!(features["memory_rss_delta"], 4096.0);
        assert_eq!(features.len(), FeatureKey::ALL.len() * 3);
    }
}
