//! Read-only commands over recorded data: audit events and run windows.

use sandbox_guard::windowing::DEFAULT_KEYS;
use sandbox_guard::{extract_sequences, AuditLog, TelemetryRun};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn print_events(log_dir: &Path, limit: usize) -> Result<(), String> {
    let log = AuditLog::in_dir(log_dir);
    let events = log.read_recent(limit).map_err(|err| err.to_string())?;
    tracing::debug!(path = %log.path().display(), count = events.len(), "Audit events read");

    let mut stdout = std::io::stdout().lock();
    for event in events {
        let line = serde_json::to_string(&event).map_err(|err| err.to_string())?;
        writeln!(stdout, "{}", line).map_err(|err| err.to_string())?;
    }
    Ok(())
}

pub fn print_sequences(inputs: &[PathBuf], window: usize, stride: usize) -> Result<(), String> {
    if window == 0 || stride == 0 {
        return Err("window and stride must be at least 1".to_string());
    }
    let runs = inputs
        .iter()
        .map(|path| TelemetryRun::load_jsonl(path).map_err(|err| err.to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    let sequences = extract_sequences(&runs, window, stride, &DEFAULT_KEYS);
    tracing::info!(runs = runs.len(), windows = sequences.len(), "Extracted windows");

    let mut stdout = std::io::stdout().lock();
    for sequence in sequences {
        let line = serde_json::to_string(&sequence).map_err(|err| err.to_string())?;
        writeln!(stdout, "{}", line).map_err(|err| err.to_string())?;
    }
    Ok(())
}
