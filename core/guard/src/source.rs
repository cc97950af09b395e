//! Telemetry sampling source.
//!
//! The guard only needs three things from the OS: find a process, ask
//! whether it still runs, and take a reading. [`SysinfoSource`] answers
//! through `sysinfo`, with thread and descriptor counts read from `/proc`.

use fs_err as fs;
use sandbox_guard_events::{now_timestamp, RawSample, Sample};
use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

use crate::error::{GuardError, Result};

/// Finds processes to sample. Shared by every watcher of a supervisor.
pub trait TelemetrySource: Send + Sync {
    /// Fails with [`GuardError::AttachFailed`] when the pid is unknown.
    fn attach(&self, pid: u32) -> Result<Box<dyn ProcessHandle>>;
}

/// Per-process sampling handle, owned by exactly one watcher.
pub trait ProcessHandle: Send {
    fn is_running(&mut self) -> bool;
    fn sample(&mut self) -> Result<Sample>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoSource;

impl TelemetrySource for SysinfoSource {
    fn attach(&self, pid: u32) -> Result<Box<dyn ProcessHandle>> {
        let mut system = System::new();
        let sys_pid = Pid::from(pid as usize);
        if !system.refresh_process_specifics(sys_pid, refresh_kind()) {
            return Err(GuardError::AttachFailed { pid });
        }
        match system.process(sys_pid) {
            Some(process) if is_live_status(process.status()) => {}
            _ => return Err(GuardError::AttachFailed { pid }),
        }
        Ok(Box::new(SysinfoHandle {
            pid,
            sys_pid,
            system,
            fresh: true,
        }))
    }
}

fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::new()
        .with_cpu()
        .with_memory()
        .with_disk_usage()
}

fn is_live_status(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

pub struct SysinfoHandle {
    pid: u32,
    sys_pid: Pid,
    system: System,
    // Set when the last refresh has not been consumed by a sample yet, so a
    // liveness check followed by a sample costs one refresh.
    fresh: bool,
}

impl SysinfoHandle {
    fn refresh(&mut self) -> bool {
        self.system
            .refresh_process_specifics(self.sys_pid, refresh_kind())
    }
}

impl ProcessHandle for SysinfoHandle {
    fn is_running(&mut self) -> bool {
        let found = self.refresh();
        self.fresh = found;
        found
            && self
                .system
                .process(self.sys_pid)
                .is_some_and(|process| is_live_status(process.status()))
    }

    fn sample(&mut self) -> Result<Sample> {
        if !self.fresh && !self.refresh() {
            return Err(GuardError::SampleFailed {
                pid: self.pid,
                reason: "process disappeared".to_string(),
            });
        }
        self.fresh = false;

        let process = self
            .system
            .process(self.sys_pid)
            .ok_or_else(|| GuardError::SampleFailed {
                pid: self.pid,
                reason: "process disappeared".to_string(),
            })?;
        let disk = process.disk_usage();
        let descriptors = read_descriptor_counts(self.pid);

        Ok(Sample::from(RawSample {
            timestamp: Some(now_timestamp()),
            cpu_percent: f64::from(process.cpu_usage()),
            memory_rss: process.memory(),
            memory_vms: Some(process.virtual_memory()),
            threads: read_thread_count(self.pid).unwrap_or(1),
            open_files: descriptors.map(|counts| counts.open_files),
            socket_count: descriptors.map(|counts| counts.sockets),
            read_bytes: Some(disk.total_read_bytes),
            write_bytes: Some(disk.total_written_bytes),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DescriptorCounts {
    open_files: u64,
    sockets: u64,
}

fn proc_dir(pid: u32) -> PathBuf {
    PathBuf::from("/proc").join(pid.to_string())
}

fn read_thread_count(pid: u32) -> Option<u64> {
    let entries = fs::read_dir(proc_dir(pid).join("task")).ok()?;
    Some(entries.filter_map(|entry| entry.ok()).count() as u64)
}

// Unreadable for processes owned by other users without privileges; the
// sample then falls back to zero for both columns.
fn read_descriptor_counts(pid: u32) -> Option<DescriptorCounts> {
    let entries = fs::read_dir(proc_dir(pid).join("fd")).ok()?;
    let mut counts = DescriptorCounts {
        open_files: 0,
        sockets: 0,
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        counts.open_files += 1;
        let is_socket = fs::read_link(entry.path())
            .map(|target| target.to_string_lossy().starts_with("socket:"))
            .unwrap_or(false);
        if is_socket {
            counts.sockets += 1;
        }
    }
    Some(counts)
}
