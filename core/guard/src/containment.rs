//! Sandbox containment checks that gate termination.
//!
//! A process is contained when its working directory, with every symlink
//! resolved, is the jail root or lies beneath it. Comparison is by path
//! component, so `/sandbox/abc-evil` is not inside `/sandbox/abc`.
//! Any resolution failure answers "not contained".

use std::path::Path;

/// Decides whether a process is confined to a jail root.
///
/// Implementations must be safe to call from many watcher threads at once.
pub trait ContainmentCheck: Send + Sync {
    fn is_contained(&self, pid: u32, jail_root: &Path) -> bool;
}

/// Reads the working directory the kernel reports under `/proc/<pid>/cwd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcCwdContainment;

impl ContainmentCheck for ProcCwdContainment {
    fn is_contained(&self, pid: u32, jail_root: &Path) -> bool {
        let cwd_link = Path::new("/proc").join(pid.to_string()).join("cwd");
        let contained = resolves_within(&cwd_link, jail_root);
        tracing::debug!(
            pid,
            jail_root = %jail_root.display(),
            contained,
            "Containment check"
        );
        contained
    }
}

/// Canonicalizes both paths and checks containment; `false` if either
/// cannot be resolved.
pub fn resolves_within(path: &Path, jail_root: &Path) -> bool {
    let resolved = match fs_err::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::debug!(error = %err, "Failed to resolve process working directory");
            return false;
        }
    };
    let root = match fs_err::canonicalize(jail_root) {
        Ok(root) => root,
        Err(err) => {
            tracing::debug!(error = %err, "Failed to resolve jail root");
            return false;
        }
    };
    is_within_root(&resolved, &root)
}

/// Component-wise containment of two already-resolved paths.
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
