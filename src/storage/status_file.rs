//! Live status artifact.
//!
//! A small JSON file read by out-of-process consumers (dashboards, the query
//! service) to tell whether recording is live and at what rate. Replaced
//! atomically via write-to-temp + rename so readers never see a torn file.

use super::StorageError;
use crate::types::LiveStatus;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StatusPublisher {
    path: PathBuf,
}

impl StatusPublisher {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn publish(&self, status: &LiveStatus) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(status)?;
        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        tracing::info!(
            live = status.live,
            setup = %status.setup,
            sampling_rate = ?status.sampling_rate,
            path = %self.path.display(),
            "Published recording status"
        );
        Ok(())
    }

    /// Last published status, or `None` if nothing was published yet.
    pub fn read(&self) -> Result<Option<LiveStatus>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
