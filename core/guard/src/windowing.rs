//! Sliding-window extraction over recorded telemetry (offline use).
//!
//! Windows overlap by `window - stride` samples. Each window is min-max
//! scaled per column on its own, so a window's values never depend on
//! samples outside it. A run shorter than `window` yields nothing.

use fs_err as fs;
use sandbox_guard_events::{FeatureKey, Sample};
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{GuardError, Result};

pub const DEFAULT_KEYS: [FeatureKey; 6] = [
    FeatureKey::CpuPercent,
    FeatureKey::MemoryRss,
    FeatureKey::OpenFiles,
    FeatureKey::SocketCount,
    FeatureKey::ReadBytes,
    FeatureKey::WriteBytes,
];

pub const DEFAULT_WINDOW: usize = 20;
pub const DEFAULT_STRIDE: usize = 10;

// Columns whose range is at or below this are treated as constant.
const MIN_RANGE: f64 = 1e-6;

const UNKNOWN_LABEL: &str = "unknown";

/// One recorded run of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRun {
    pub run_id: String,
    pub label: Option<String>,
    pub samples: Vec<Sample>,
}

impl TelemetryRun {
    /// Reads a JSONL recording. Lines with `"event": "sample"` are samples;
    /// a `"label"` string on any line labels the run (last one wins).
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .map_err(|err| GuardError::io(format!("opening run {}", path.display()), err))?;

        let mut label = None;
        let mut samples = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .map_err(|err| GuardError::io(format!("reading run {}", path.display()), err))?;
            if line.trim().is_empty() {
                continue;
            }
            let context = || format!("{} line {}", path.display(), index + 1);
            let value: Value =
                serde_json::from_str(&line).map_err(|err| GuardError::json(context(), err))?;

            if let Some(found) = value.get("label").and_then(Value::as_str) {
                label = Some(found.to_string());
            }
            if value.get("event").and_then(Value::as_str) == Some("sample") {
                let sample: Sample =
                    serde_json::from_value(value).map_err(|err| GuardError::json(context(), err))?;
                samples.push(sample);
            }
        }

        let run_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            run_id,
            label,
            samples,
        })
    }
}

/// A fixed-length, normalized slice of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceExample {
    pub run_id: String,
    pub label: String,
    pub start_index: usize,
    /// `window` rows of `keys.len()` columns, each in `[0, 1]`.
    pub features: Vec<Vec<f32>>,
    pub timestamps: Vec<String>,
}

pub fn extract_sequences<'a>(
    runs: impl IntoIterator<Item = &'a TelemetryRun>,
    window: usize,
    stride: usize,
    keys: &[FeatureKey],
) -> Vec<SequenceExample> {
    let mut sequences = Vec::new();
    if window == 0 {
        return sequences;
    }
    let stride = stride.max(1);

    for run in runs {
        if run.samples.len() < window {
            continue;
        }
        let label = run
            .label
            .as_deref()
            .unwrap_or(UNKNOWN_LABEL)
            .to_lowercase();

        for start in (0..=run.samples.len() - window).step_by(stride) {
            let slice = &run.samples[start..start + window];
            sequences.push(SequenceExample {
                run_id: run.run_id.clone(),
                label: label.clone(),
                start_index: start,
                features: normalize_window(slice, keys),
                timestamps: slice.iter().map(|s| s.timestamp.clone()).collect(),
            });
        }
    }
    sequences
}

/// Min-max scales each column of `samples` independently.
pub fn normalize_window(samples: &[Sample], keys: &[FeatureKey]) -> Vec<Vec<f32>> {
    let mut mins = vec![f64::INFINITY; keys.len()];
    let mut maxs = vec![f64::NEG_INFINITY; keys.len()];
    for sample in samples {
        for (column, key) in keys.iter().enumerate() {
            let value = sample.value(*key);
            mins[column] = mins[column].min(value);
            maxs[column] = maxs[column].max(value);
        }
    }

    let denominators: Vec<f64> = mins
        .iter()
        .zip(&maxs)
        .map(|(min, max)| {
            let range = max - min;
            if range > MIN_RANGE {
                range
            } else {
                1.0
            }
        })
        .collect();

    samples
        .iter()
        .map(|sample| {
            keys.iter()
                .enumerate()
                .map(|(column, key)| {
                    ((sample.value(*key) - mins[column]) / denominators[column]) as f32
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_guard_events::RawSample;

    fn sample(seq: u64, cpu: f64) -> Sample {
        Sample::from(RawSample {
            timestamp: Some(format!("t{seq}")),
            cpu_percent: cpu,
            memory_rss: 1000 + seq * 10,
            threads: 1,
            ..RawSample::default()
        })
    }

    fn run(id: &str, len: u64) -> TelemetryRun {
        TelemetryRun {
            run_id: id.to_string(),
            label: Some("Malicious".to_string()),
            samples: (0..len).map(|seq| sample(seq, seq as f64)).collect(),
        }
    }

    #[test]
    fn produces_overlapping_windows_and_drops_short_runs() {
        let runs = vec![run("long", 25), run("short", 4)];
        let sequences = extract_sequences(&runs, 10, 5, &DEFAULT_KEYS);

        let starts: Vec<_> = sequences.iter().map(|s| s.start_index).collect();
        assert_eq!(starts, vec![0, 5, 10, 15]);
        assert!(sequences.iter().all(|s| s.run_id == "long"));
        assert!(sequences.iter().all(|s| s.label == "malicious"));
        assert!(sequences.iter().all(|s| s.features.len() == 10));
        assert_eq!(sequences[1].timestamps.first().map(String::as_str), Some("t5"));
    }

    #[test]
    fn normalizes_each_window_independently() {
        let runs = vec![run("r", 20)];
        let sequences = extract_sequences(&runs, 10, 10, &[FeatureKey::CpuPercent]);
        assert_eq!(sequences.len(), 2);
        for sequence in &sequences {
            assert_eq!(sequence.features.first(), Some(&vec![0.0]));
            assert_eq!(sequence.features.last(), Some(&vec![1.0]));
        }
    }

    #[test]
    fn constant_columns_do_not_divide_by_zero() {
        let samples: Vec<_> = (0..5).map(|seq| sample(seq, 42.0)).collect();
        let features = normalize_window(&samples, &[FeatureKey::CpuPercent, FeatureKey::Threads]);
        assert!(features.iter().flatten().all(|value| *value == 0.0));
    }

    #[test]
    fn zero_window_yields_nothing() {
        let runs = vec![run("r", 5)];
        assert!(extract_sequences(&runs, 0, 1, &DEFAULT_KEYS).is_empty());
    }

    #[test]
    fn loads_recorded_run() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("fork_bomb.jsonl");
        fs_err::write(
            &path,
            concat!(
                r#"{"event":"start","timestamp":"t0","interval":0.4}"#,
                "\n",
                r#"{"event":"sample","timestamp":"t1","cpu_percent":5.0,"memory_rss":100,"threads":1}"#,
                "\n\n",
                r#"{"event":"sample","timestamp":"t2","cpu_percent":9.0,"memory_rss":200,"threads":2,"open_files":3}"#,
                "\n",
                r#"{"event":"stop","label":"malicious"}"#,
                "\n",
            ),
        )
        .expect("write run");

        let run = TelemetryRun::load_jsonl(&path).expect("load run");
        assert_eq!(run.run_id, "fork_bomb");
        assert_eq!(run.label.as_deref(), Some("malicious"));
        assert_eq!(run.samples.len(), 2);
        assert_eq!(run.samples[0].memory_vms, 100);
        assert_eq!(run.samples[1].open_files, 3);
    }

    #[test]
    fn malformed_line_reports_position() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("bad.jsonl");
        fs_err::write(&path, "{\"event\":\"sample\"}\n{not json\n").expect("write run");

        let err = TelemetryRun::load_jsonl(&path).expect_err("malformed run");
        assert!(err.to_string().contains("line 2"));
    }
}
