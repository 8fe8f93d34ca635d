//! Streamed peak frames and the mapped rows persisted per structural group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decoded frame from the peak streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakFrame {
    /// Capture time reported by the instrument
    pub timestamp: DateTime<Utc>,
    pub serial_number: u64,
    /// Detected wavelengths (nm), one list per instrument channel
    pub peaks: Vec<Vec<f64>>,
}

impl PeakFrame {
    pub fn new(timestamp: DateTime<Utc>, peaks: Vec<Vec<f64>>) -> Self {
        Self {
            timestamp,
            serial_number: 0,
            peaks,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.peaks.len()
    }

    pub fn peak_count(&self) -> usize {
        self.peaks.iter().map(Vec::len).sum()
    }
}

/// A measurement table row: capture time plus one value per matched sensor uid.
///
/// Sensors that were not matched in this frame are absent, never zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl MeasurementRow {
    pub const fn new(timestamp: DateTime<Utc>, values: BTreeMap<String, f64>) -> Self {
        Self { timestamp, values }
    }
}
