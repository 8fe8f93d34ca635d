//! In-memory sensor store for tests and dry runs.
//!
//! Thread-safe via `RwLock`. Not durable.

use super::{MetadataPatch, SensorStore, StorageError};
use crate::types::{MeasurementRow, SensorMetadata, StructuralGroup};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    metadata: RwLock<HashMap<StructuralGroup, BTreeMap<String, SensorMetadata>>>,
    measurements: RwLock<HashMap<StructuralGroup, Vec<MeasurementRow>>>,
    failing_writes: RwLock<Vec<StructuralGroup>>,
    failing_patches: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent measurement write for `group` fail.
    pub fn fail_writes_for(&self, group: StructuralGroup) {
        if let Ok(mut failing) = self.failing_writes.write() {
            failing.push(group);
        }
    }

    /// Make every subsequent `apply_patches` call fail before writing.
    pub fn fail_patches(&self, fail: bool) {
        self.failing_patches.store(fail, Ordering::Release);
    }

    fn poisoned<T>(e: std::sync::PoisonError<T>) -> StorageError {
        StorageError::Backend(e.to_string())
    }
}

impl SensorStore for InMemoryStore {
    fn load_metadata(&self, group: StructuralGroup) -> Result<Vec<SensorMetadata>, StorageError> {
        let metadata = self.metadata.read().map_err(Self::poisoned)?;
        Ok(metadata
            .get(&group)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn seed_metadata(
        &self,
        group: StructuralGroup,
        sensors: &[SensorMetadata],
    ) -> Result<(), StorageError> {
        let mut metadata = self.metadata.write().map_err(Self::poisoned)?;
        let rows = metadata.entry(group).or_default();
        for sensor in sensors {
            rows.insert(sensor.uid.clone(), sensor.clone());
        }
        Ok(())
    }

    fn apply_patches(&self, patches: &[MetadataPatch]) -> Result<usize, StorageError> {
        if self.failing_patches.load(Ordering::Acquire) {
            return Err(StorageError::Backend("injected patch failure".to_string()));
        }
        let mut metadata = self.metadata.write().map_err(Self::poisoned)?;

        // Stage on a copy so a failure leaves the tables untouched.
        let mut staged = metadata.clone();
        let mut applied = 0;
        for patch in patches {
            if let Some(sensor) = staged
                .get_mut(&patch.group)
                .and_then(|rows| rows.get_mut(&patch.uid))
            {
                patch.apply(sensor);
                applied += 1;
            }
        }
        *metadata = staged;
        Ok(applied)
    }

    fn write_measurements(
        &self,
        group: StructuralGroup,
        rows: &[MeasurementRow],
    ) -> Result<(), StorageError> {
        let failing = self.failing_writes.read().map_err(Self::poisoned)?;
        if failing.contains(&group) {
            return Err(StorageError::Backend(format!(
                "injected write failure for {group}"
            )));
        }
        drop(failing);

        let mut measurements = self.measurements.write().map_err(Self::poisoned)?;
        measurements
            .entry(group)
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    fn measurements_between(
        &self,
        group: StructuralGroup,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRow>, StorageError> {
        let measurements = self.measurements.read().map_err(Self::poisoned)?;
        let mut rows: Vec<MeasurementRow> = measurements
            .get(&group)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.timestamp >= start && r.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    fn measurement_count(&self, group: StructuralGroup) -> Result<usize, StorageError> {
        let measurements = self.measurements.read().map_err(Self::poisoned)?;
        Ok(measurements.get(&group).map_or(0, Vec::len))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
