//! Process lock for the data directory.
//!
//! sled refuses concurrent opens of one database from two processes. The
//! lock file turns that into a readable error naming the PID of the holder.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// PID lock file held for the lifetime of the process.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".fbg-ingest.lock";

    /// Acquire the lock for `data_dir`, creating the directory if needed.
    ///
    /// A lock left behind by a process that no longer exists is replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);
        match Self::holder(&lock_path) {
            Some(pid) if pid != std::process::id() => {
                bail!(
                    "Another fbg-ingest process (PID {pid}) holds {}.\n\
                     Stop it, or remove the lock file if that process is gone.",
                    lock_path.display()
                );
            }
            Some(_) => {}
            None if lock_path.exists() => {
                tracing::info!(path = %lock_path.display(), "Removing stale lock file");
                fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
            }
            None => {}
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to write lock file {}", lock_path.display()))?;
        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID recorded in the lock file, if that process is still alive.
    fn holder(lock_path: &Path) -> Option<u32> {
        let contents = fs::read_to_string(lock_path).ok()?;
        let pid: u32 = contents.trim().parse().ok()?;
        Self::is_alive(pid).then_some(pid)
    }

    #[cfg(unix)]
    fn is_alive(pid: u32) -> bool {
        fs::read_to_string(format!("/proc/{pid}/cmdline"))
            .map(|cmdline| cmdline.contains("fbg"))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_alive(_pid: u32) -> bool {
        true
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = %self.lock_path.display(), "Released process lock"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove lock file"),
        }
        self.owned = false;
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_records_pid_and_releases_on_drop() {
        let dir = tempdir().unwrap();
        let path = {
            let lock = ProcessLock::acquire(dir.path()).unwrap();
            let pid: u32 = fs::read_to_string(lock.path()).unwrap().trim().parse().unwrap();
            assert_eq!(pid, std::process::id());
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_is_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ProcessLock::LOCK_FILE_NAME), "999999999\n").unwrap();
        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
    }
}
