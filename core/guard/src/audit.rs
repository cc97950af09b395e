//! Append-only JSONL audit trail.
//!
//! Each event is serialized to a single buffer ending in `\n` and written
//! with one `write_all` on an `O_APPEND` handle while holding the log's
//! mutex, so lines from concurrent watchers never interleave. Ordering is
//! only guaranteed per watcher.

use fs_err as fs;
use sandbox_guard_events::AuditEvent;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{GuardError, Result};

pub const AUDIT_FILE_NAME: &str = "guard_events.jsonl";

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Audit log stored as [`AUDIT_FILE_NAME`] inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(AUDIT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the log directory if it is missing.
    pub fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| GuardError::io("creating audit log directory", err))?;
        }
        Ok(())
    }

    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line =
            serde_json::to_vec(event).map_err(|err| GuardError::json("serializing audit event", err))?;
        line.push(b'\n');

        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.ensure_dir()?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| GuardError::io("opening audit log", err))?;
        file.write_all(&line)
            .map_err(|err| GuardError::io("writing audit event", err))?;
        Ok(())
    }

    /// Reads back every event in file order. A missing file is empty.
    pub fn read_all(&self) -> Result<Vec<AuditEvent>> {
        read_events(&self.path)
    }

    /// The last `limit` events in file order.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let mut events = self.read_all()?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }
}

pub fn read_events(path: &Path) -> Result<Vec<AuditEvent>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(GuardError::io("opening audit log", err)),
    };

    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| GuardError::io("reading audit log", err))?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .map_err(|err| GuardError::json(format!("audit log line {}", index + 1), err))?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_guard_events::{AuditAction, ClassificationResult};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    fn event(pid: u32, action: AuditAction) -> AuditEvent {
        let result = ClassificationResult::new(
            "benign",
            0.6,
            BTreeMap::from([("benign".to_string(), 0.6), ("malicious".to_string(), 0.4)]),
            vec![("threads_max".to_string(), 0.2)],
        );
        AuditEvent::new(pid, &format!("live-{pid}"), &["sleep".to_string()], action, &result)
    }

    #[test]
    fn creates_directory_and_appends_lines() {
        let temp = tempfile::tempdir().expect("temp dir");
        let log = AuditLog::in_dir(&temp.path().join("nested").join("logs"));

        log.append(&event(1, AuditAction::Update)).expect("append");
        log.append(&event(1, AuditAction::Exit)).expect("append");

        let events = log.read_all().expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::Update);
        assert_eq!(events[1].action, AuditAction::Exit);
        assert_eq!(events[1].run_id, "live-1");
    }

    #[test]
    fn missing_log_reads_empty() {
        let temp = tempfile::tempdir().expect("temp dir");
        let log = AuditLog::in_dir(temp.path());
        assert!(log.read_all().expect("read").is_empty());
    }

    #[test]
    fn concurrent_writers_produce_whole_lines() {
        let temp = tempfile::tempdir().expect("temp dir");
        let log = Arc::new(AuditLog::in_dir(temp.path()));

        let writers: Vec<_> = (0..8u32)
            .map(|pid| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..25 {
                        log.append(&event(pid, AuditAction::Update)).expect("append");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("join writer");
        }

        let events = log.read_all().expect("every line parses");
        assert_eq!(events.len(), 200);
        for pid in 0..8u32 {
            assert_eq!(events.iter().filter(|e| e.pid == pid).count(), 25);
        }
    }

    #[test]
    fn read_recent_returns_tail() {
        let temp = tempfile::tempdir().expect("temp dir");
        let log = AuditLog::in_dir(temp.path());
        for pid in 0..5 {
            log.append(&event(pid, AuditAction::Update)).expect("append");
        }
        let recent = log.read_recent(2).expect("read");
        assert_eq!(recent.iter().map(|e| e.pid).collect::<Vec<_>>(), vec![3, 4]);
    }
}
