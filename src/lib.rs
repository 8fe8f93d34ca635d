//! FBG Ingest: x55 interrogator client
//!
//! Streams fibre Bragg grating peak wavelengths from an x55 optical
//! interrogator, maps them onto named sensors per structural group and
//! persists one time-stamped row per group and frame.
//!
//! ## Architecture
//!
//! - **Protocol**: binary request/response framing and content codecs
//! - **Acquisition**: command and streaming connections, the instrument client
//! - **Mapping**: sensor metadata snapshots, peak matching, calibration uploads
//! - **Pipeline**: frame pump and per-group persistence writers
//! - **Storage**: sled-backed metadata and measurement tables, live status file

pub mod acquisition;
pub mod config;
pub mod mapping;
pub mod pipeline;
pub mod protocol;
pub mod storage;
pub mod types;

pub use acquisition::{ClientError, ClientSettings, InstrumentClient};
pub use config::AppConfig;
pub use mapping::SensorMapper;
pub use storage::{SensorStore, SledStore, StorageError};
pub use types::{
    InstrumentStatus, LiveStatus, MeasurementRow, PeakFrame, SensorMetadata, SetupOption,
    StructuralGroup,
};
