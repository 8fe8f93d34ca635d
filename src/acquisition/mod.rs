//! Instrument acquisition
//!
//! - [`connection`]: one framed TCP channel (command or streaming port)
//! - [`stream`]: a peak streaming session with guaranteed teardown
//! - [`client`]: the instrument client tying both channels to the mapper
//!   and the recording pipeline

pub mod client;
pub mod connection;
pub mod stream;

pub use client::{ClientSettings, InstrumentClient};
pub use connection::{read_frame, Connection, ConnectionError};
pub use stream::PeakStream;

use crate::mapping::CalibrationError;
use crate::protocol::DecodeError;
use crate::storage::StorageError;
use thiserror::Error;

/// Failures surfaced by [`InstrumentClient`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("instrument rejected {command}: {message}")]
    CommandRejected { command: String, message: String },

    #[error("undecodable response: {0}")]
    Decode(#[from] DecodeError),

    #[error("instrument refused to start streaming: {message}")]
    StreamingRejected { message: String },

    #[error("divider {divider} is not one of {options:?}")]
    UnsupportedDivider { divider: u32, options: Vec<u32> },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("failed to start persistence writers: {0}")]
    Writers(#[source] std::io::Error),

    #[error("command connection is not open")]
    NotConnected,
}
