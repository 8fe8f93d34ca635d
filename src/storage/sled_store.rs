//! Sled-backed sensor store.
//!
//! One tree per table, named after the table (`basement_fbg_metadata`,
//! `basement_fbg`, ...).
//!
//! - metadata trees: key = uid, value = JSON `SensorMetadata`
//! - measurement trees: key = big-endian timestamp nanoseconds then a
//!   database-unique sequence number, value = JSON row

use super::{measurement_key, MetadataPatch, SensorStore, StorageError};
use crate::types::{MeasurementRow, SensorMetadata, StructuralGroup};
use chrono::{DateTime, Utc};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Transactional, Tree};
use std::path::Path;

/// Production store. Cloning shares the underlying database handle.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        tracing::info!(path = %path.display(), "Sensor store opened");
        Ok(Self { db })
    }

    fn metadata_tree(&self, group: StructuralGroup) -> Result<Tree, StorageError> {
        Ok(self.db.open_tree(group.metadata_table())?)
    }

    fn values_tree(&self, group: StructuralGroup) -> Result<Tree, StorageError> {
        Ok(self.db.open_tree(group.values_table())?)
    }

    pub fn flush(&self) -> Result<usize, StorageError> {
        Ok(self.db.flush()?)
    }
}

impl SensorStore for SledStore {
    fn load_metadata(&self, group: StructuralGroup) -> Result<Vec<SensorMetadata>, StorageError> {
        let tree = self.metadata_tree(group)?;
        let mut sensors = Vec::with_capacity(tree.len());
        for item in tree.iter() {
            let (_key, value) = item?;
            sensors.push(serde_json::from_slice(&value)?);
        }
        Ok(sensors)
    }

    fn seed_metadata(
        &self,
        group: StructuralGroup,
        sensors: &[SensorMetadata],
    ) -> Result<(), StorageError> {
        let tree = self.metadata_tree(group)?;
        let mut batch = sled::Batch::default();
        for sensor in sensors {
            batch.insert(sensor.uid.as_bytes(), serde_json::to_vec(sensor)?);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn apply_patches(&self, patches: &[MetadataPatch]) -> Result<usize, StorageError> {
        let groups: Vec<StructuralGroup> = StructuralGroup::ALL
            .into_iter()
            .filter(|g| patches.iter().any(|p| p.group == *g))
            .collect();
        if groups.is_empty() {
            return Ok(0);
        }
        let trees = groups
            .iter()
            .map(|g| self.metadata_tree(*g))
            .collect::<Result<Vec<_>, _>>()?;

        let applied = trees
            .as_slice()
            .transaction(|views| -> ConflictableTransactionResult<usize, StorageError> {
                let mut applied = 0usize;
                for patch in patches {
                    let Some(position) = groups.iter().position(|g| *g == patch.group) else {
                        continue;
                    };
                    let view = &views[position];
                    let Some(raw) = view.get(patch.uid.as_bytes())? else {
                        continue;
                    };
                    let mut sensor: SensorMetadata = serde_json::from_slice(&raw).map_err(|e| {
                        ConflictableTransactionError::Abort(StorageError::Serialization(e))
                    })?;
                    patch.apply(&mut sensor);
                    let value = serde_json::to_vec(&sensor).map_err(|e| {
                        ConflictableTransactionError::Abort(StorageError::Serialization(e))
                    })?;
                    view.insert(patch.uid.as_bytes(), value)?;
                    applied += 1;
                }
                Ok(applied)
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StorageError::Database(e),
            })?;

        self.db.flush()?;
        Ok(applied)
    }

    fn write_measurements(
        &self,
        group: StructuralGroup,
        rows: &[MeasurementRow],
    ) -> Result<(), StorageError> {
        let tree = self.values_tree(group)?;
        let mut batch = sled::Batch::default();
        for row in rows {
            let key = measurement_key(row.timestamp, self.db.generate_id()?);
            batch.insert(key.to_vec(), serde_json::to_vec(row)?);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn measurements_between(
        &self,
        group: StructuralGroup,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRow>, StorageError> {
        let tree = self.values_tree(group)?;
        let mut rows = Vec::new();
        for item in tree.range(measurement_key(start, 0)..=measurement_key(end, u64::MAX)) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn measurement_count(&self, group: StructuralGroup) -> Result<usize, StorageError> {
        Ok(self.values_tree(group)?.len())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
