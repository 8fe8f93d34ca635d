//! Sensor Metadata and Measurement Storage
//!
//! Each structural group owns two tables: a metadata table (one row per
//! sensor, keyed by uid) and a measurement table (one row per streamed
//! frame, keyed by timestamp). [`SensorStore`] abstracts the backend:
//!
//! - [`SledStore`]: one sled tree per table, used in production
//! - [`InMemoryStore`]: for tests and dry runs

pub mod lockfile;
pub mod memory;
pub mod sled_store;
pub mod status_file;

pub use lockfile::ProcessLock;
pub use memory::InMemoryStore;
pub use sled_store::SledStore;
pub use status_file::StatusPublisher;

use crate::types::{MeasurementRow, SensorMetadata, StructuralGroup};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Pluggable storage backend for sensor metadata and measurements.
///
/// Implementations must be thread-safe: persistence workers call
/// [`write_measurements`](Self::write_measurements) from their own OS threads.
pub trait SensorStore: Send + Sync {
    /// All metadata rows of one group.
    fn load_metadata(&self, group: StructuralGroup) -> Result<Vec<SensorMetadata>, StorageError>;

    /// Insert or replace metadata rows. Only used to seed tables.
    fn seed_metadata(
        &self,
        group: StructuralGroup,
        sensors: &[SensorMetadata],
    ) -> Result<(), StorageError>;

    /// Apply `patches` all-or-nothing.
    ///
    /// Patches naming a uid that is not in the table are skipped; rows are
    /// never inserted. Returns the number of patches applied.
    fn apply_patches(&self, patches: &[MetadataPatch]) -> Result<usize, StorageError>;

    /// Persist one batch of rows in a single write.
    fn write_measurements(
        &self,
        group: StructuralGroup,
        rows: &[MeasurementRow],
    ) -> Result<(), StorageError>;

    /// Rows with `start <= timestamp <= end`, oldest first.
    fn measurements_between(
        &self,
        group: StructuralGroup,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRow>, StorageError>;

    fn measurement_count(&self, group: StructuralGroup) -> Result<usize, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// An in-place update to one metadata row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataPatch {
    pub group: StructuralGroup,
    pub uid: String,
    pub change: PatchChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchChange {
    /// Channel binding and wavelength band from a sensor configuration entry
    Placement {
        channel: usize,
        index: usize,
        reference_wavelength: Option<f64>,
        minimum_wavelength: Option<f64>,
        maximum_wavelength: Option<f64>,
    },
    InitialWavelength(f64),
    /// Merged into the existing coefficient map
    Coefficients(BTreeMap<String, f64>),
}

impl MetadataPatch {
    pub fn apply(&self, sensor: &mut SensorMetadata) {
        match &self.change {
            PatchChange::Placement {
                channel,
                index,
                reference_wavelength,
                minimum_wavelength,
                maximum_wavelength,
            } => {
                sensor.channel = *channel;
                sensor.index = *index;
                sensor.reference_wavelength = *reference_wavelength;
                sensor.minimum_wavelength = *minimum_wavelength;
                sensor.maximum_wavelength = *maximum_wavelength;
            }
            PatchChange::InitialWavelength(wavelength) => {
                sensor.initial_wavelength = Some(*wavelength);
            }
            PatchChange::Coefficients(coeffs) => {
                sensor
                    .coeffs
                    .extend(coeffs.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
    }
}

/// Measurement key: big-endian timestamp nanoseconds followed by a big-endian
/// sequence number.
///
/// Keys sort chronologically, and rows sharing a timestamp keep their write
/// order instead of replacing each other.
pub fn measurement_key(timestamp: DateTime<Utc>, sequence: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&timestamp_nanos(timestamp).to_be_bytes());
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

fn timestamp_nanos(timestamp: DateTime<Utc>) -> i64 {
    timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| timestamp.timestamp() * 1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn measurement_keys_sort_chronologically() {
        let early = Utc.timestamp_opt(1_700_000_000, 999_999_999).unwrap();
        let late = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
        assert!(measurement_key(early, u64::MAX) < measurement_key(late, 0));
        assert!(measurement_key(early, 1) < measurement_key(early, 2));
    }

    #[test]
    fn coefficient_patch_merges() {
        let mut sensor = SensorMetadata::new("A1", "B-S1", 0, 0);
        sensor.coeffs.insert("beta".to_string(), 1.0);
        sensor.coeffs.insert("St".to_string(), 2.0);

        let patch = MetadataPatch {
            group: StructuralGroup::Basement,
            uid: "A1".to_string(),
            change: PatchChange::Coefficients(BTreeMap::from([("St".to_string(), 3.0)])),
        };
        patch.apply(&mut sensor);

        assert_eq!(sensor.coeffs["beta"], 1.0);
        assert_eq!(sensor.coeffs["St"], 3.0);
    }

    #[test]
    fn placement_patch_replaces_band() {
        let mut sensor = SensorMetadata::new("B2", "B-S2", 0, 0).with_band(1.0, 2.0);
        MetadataPatch {
            group: StructuralGroup::Basement,
            uid: "B2".to_string(),
            change: PatchChange::Placement {
                channel: 1,
                index: 1,
                reference_wavelength: Some(1540.0),
                minimum_wavelength: Some(1538.0),
                maximum_wavelength: Some(1542.0),
            },
        }
        .apply(&mut sensor);

        assert_eq!((sensor.channel, sensor.index), (1, 1));
        assert!(sensor.in_band(1540.5));
        assert_eq!(sensor.reference_wavelength, Some(1540.0));
    }
}
