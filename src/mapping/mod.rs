//! Sensor mapping
//!
//! Holds the metadata of every structural group in the active setup as an
//! immutable [`MappingSnapshot`]. Loads and calibration uploads build a new
//! snapshot and swap it in atomically; the streaming path takes the current
//! snapshot once per frame and never blocks on a reload.

pub mod calibration;
pub mod matcher;

pub use calibration::{CalibrationDocument, CalibrationError, UploadSummary};
pub use matcher::{map_peaks, match_sensor};

use crate::storage::{SensorStore, StorageError};
use crate::types::{SensorMetadata, SetupOption, StructuralGroup};
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Metadata of one group, keyed by uid.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMapping {
    pub group: StructuralGroup,
    pub sensors: HashMap<String, SensorMetadata>,
}

/// Immutable mapping for one setup.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSnapshot {
    setup: SetupOption,
    groups: Vec<GroupMapping>,
}

impl MappingSnapshot {
    /// Snapshot with every group of `setup` present but empty.
    pub fn empty(setup: SetupOption) -> Self {
        Self {
            setup,
            groups: setup
                .groups()
                .iter()
                .map(|group| GroupMapping {
                    group: *group,
                    sensors: HashMap::new(),
                })
                .collect(),
        }
    }

    pub fn from_tables(setup: SetupOption, tables: Vec<(StructuralGroup, Vec<SensorMetadata>)>) -> Self {
        Self {
            setup,
            groups: tables
                .into_iter()
                .map(|(group, rows)| GroupMapping {
                    group,
                    sensors: rows.into_iter().map(|s| (s.uid.clone(), s)).collect(),
                })
                .collect(),
        }
    }

    pub const fn setup(&self) -> SetupOption {
        self.setup
    }

    pub fn groups(&self) -> &[GroupMapping] {
        &self.groups
    }

    pub fn sensors(&self, group: StructuralGroup) -> Option<&HashMap<String, SensorMetadata>> {
        self.groups
            .iter()
            .find(|g| g.group == group)
            .map(|g| &g.sensors)
    }

    pub fn sensor_count(&self) -> usize {
        self.groups.iter().map(|g| g.sensors.len()).sum()
    }

    /// uid -> wavelength for `group`. Empty if the group is not in this setup.
    pub fn map(&self, peaks: &[Vec<f64>], group: StructuralGroup) -> BTreeMap<String, f64> {
        self.sensors(group)
            .map(|sensors| map_peaks(peaks, sensors))
            .unwrap_or_default()
    }
}

/// Owner of the live mapping snapshot.
pub struct SensorMapper {
    current: ArcSwap<MappingSnapshot>,
    store: Arc<dyn SensorStore>,
}

impl SensorMapper {
    /// Mapper with an empty snapshot; call [`load`](Self::load) before mapping.
    pub fn new(store: Arc<dyn SensorStore>, setup: SetupOption) -> Self {
        Self {
            current: ArcSwap::from_pointee(MappingSnapshot::empty(setup)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SensorStore> {
        &self.store
    }

    /// Current snapshot. Holders keep it alive across later swaps.
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.current.load_full()
    }

    pub fn setup(&self) -> SetupOption {
        self.current.load().setup
    }

    /// Replace the mapping with the full contents of every metadata table in `setup`.
    pub fn load(&self, setup: SetupOption) -> Result<SetupOption, StorageError> {
        let tables = self.read_tables(setup)?;
        let snapshot = MappingSnapshot::from_tables(setup, tables);
        tracing::info!(
            setup = %setup,
            sensors = snapshot.sensor_count(),
            backend = self.store.backend_name(),
            "Loaded sensor configuration"
        );
        self.current.store(Arc::new(snapshot));
        Ok(setup)
    }

    pub fn map(&self, peaks: &[Vec<f64>], group: StructuralGroup) -> BTreeMap<String, f64> {
        self.current.load().map(peaks, group)
    }

    /// Apply a calibration document to every group of the current setup.
    ///
    /// The document is parsed and planned before anything is written; the
    /// patches then commit in one transaction and the mapping is reloaded.
    pub fn upload(&self, xml: &str) -> Result<UploadSummary, CalibrationError> {
        let setup = self.setup();
        let document = CalibrationDocument::parse(xml)?;
        let tables = self.read_tables(setup)?;
        let plan = calibration::plan_patches(&document, &tables)?;

        let patches_applied = self.store.apply_patches(&plan.patches)?;
        if !plan.ignored.is_empty() {
            tracing::info!(ignored = ?plan.ignored, "Calibration entries without a matching sensor");
        }
        tracing::info!(
            setup = %setup,
            patches = patches_applied,
            "Uploaded calibration document"
        );

        self.load(setup)?;
        Ok(UploadSummary {
            setup,
            sensor_entries: document.sensors.len(),
            transducer_entries: document.transducers.len(),
            patches_applied,
            ignored: plan.ignored,
        })
    }

    fn read_tables(
        &self,
        setup: SetupOption,
    ) -> Result<Vec<(StructuralGroup, Vec<SensorMetadata>)>, StorageError> {
        setup
            .groups()
            .iter()
            .map(|group| Ok((*group, self.store.load_metadata(*group)?)))
            .collect()
    }
}
