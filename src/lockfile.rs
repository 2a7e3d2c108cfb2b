// =============================================================================
// Singleton Lock File — exactly one engine per broker account
// =============================================================================
//
// Bootstrap creates a lock file holding our PID and refuses to start when a
// live process already holds it. A lock left behind by a dead process is
// treated as stale and replaced. The lock is removed on clean shutdown via
// Drop.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

/// Guard for the engine singleton. Dropping it releases the lock.
pub struct LockFile {
    path: PathBuf,
    pid: u32,
}

impl LockFile {
    /// Acquire the lock at `path`, failing when another live engine holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let my_pid = std::process::id();

        if let Ok(content) = std::fs::read_to_string(&path) {
            match content.trim().parse::<u32>() {
                Ok(existing_pid) if process_alive(existing_pid) => {
                    bail!(
                        "another engine instance (pid {existing_pid}) holds {}; \
                         refusing to start",
                        path.display()
                    );
                }
                Ok(existing_pid) => {
                    warn!(
                        stale_pid = existing_pid,
                        path = %path.display(),
                        "removing stale lock from dead process"
                    );
                }
                Err(_) => {
                    warn!(path = %path.display(), "removing unparsable lock file");
                }
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("removing stale lock {}", path.display()))?;
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, my_pid.to_string())
            .with_context(|| format!("writing lock file {}", path.display()))?;

        info!(pid = my_pid, path = %path.display(), "engine lock acquired");
        Ok(Self { path, pid: my_pid })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Only remove a lock we still own — a crashed-and-restarted engine
        // may have replaced it.
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if content.trim() == self.pid.to_string() {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

/// Whether a PID refers to a live process. Uses the procfs on Linux; on
/// platforms without /proc an existing lock is conservatively treated as
/// live.
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if proc_root.is_dir() {
        proc_root.join(pid.to_string()).exists()
    } else {
        true
    }
}
