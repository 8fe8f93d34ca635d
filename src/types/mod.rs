//! Core data types shared across the ingestion pipeline.
//!
//! - [`StructuralGroup`] / [`SetupOption`]: which sensor tables are active
//! - [`SensorMetadata`]: per-sensor channel binding and calibration
//! - [`PeakFrame`] / [`MeasurementRow`]: raw streamed peaks and mapped rows
//! - [`InstrumentStatus`] / [`LiveStatus`]: runtime state snapshots

mod group;
mod measurement;
mod sensor;
mod status;

pub use group::{SetupOption, StructuralGroup, UnknownSetup};
pub use measurement::{MeasurementRow, PeakFrame};
pub use sensor::{SensorMetadata, SensorType};
pub use status::{InstrumentStatus, LiveStatus};
