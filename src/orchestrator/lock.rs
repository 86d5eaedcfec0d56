//! Process lock file used for crash detection across restarts.
//!
//! On a clean shutdown the lock is removed. If it's found present at
//! startup, the previous run died without cleaning up; we log a warning,
//! delete it, and proceed; the pending-task recovery pass in `mod.rs`
//! picks up whatever that run left unfinished.

use std::path::{Path, PathBuf};
use tracing::warn;

pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn acquire(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join("core.lock");
        if path.exists() {
            warn!(path = %path.display(), "stale lock file from a prior run, removing");
            let _ = std::fs::remove_file(&path);
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_drop_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("core.lock");
        {
            let _lock = ProcessLock::acquire(dir.path()).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn stale_lock_is_replaced_not_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("core.lock"), "99999999").unwrap();
        let _lock = ProcessLock::acquire(dir.path()).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("core.lock")).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }
}
