//! Per-sensor metadata: channel binding, wavelength band and calibration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measurement type of a physical sensor.
///
/// Stored as the short codes used by the metadata tables (`str`, `tmp`);
/// anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorType {
    Strain,
    Temperature,
    Other(String),
}

impl From<String> for SensorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "str" => Self::Strain,
            "tmp" => Self::Temperature,
            _ => Self::Other(value),
        }
    }
}

impl From<SensorType> for String {
    fn from(value: SensorType) -> Self {
        match value {
            SensorType::Strain => "str".to_string(),
            SensorType::Temperature => "tmp".to_string(),
            SensorType::Other(other) => other,
        }
    }
}

/// One row of a structural group's metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    /// Stable short code, e.g. `A3` (channel letter + position)
    pub uid: String,
    /// Index into the per-channel peak array
    pub channel: usize,
    /// Expected position within the channel's peak list
    pub index: usize,
    /// Unique logical name
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    /// Sensors with `recording = false` are never mapped
    pub recording: bool,
    /// Paired temperature sensor uid (temperature-compensated strain gauges)
    #[serde(default)]
    pub corresponding_sensor: Option<String>,
    #[serde(default)]
    pub reference_wavelength: Option<f64>,
    #[serde(default)]
    pub minimum_wavelength: Option<f64>,
    #[serde(default)]
    pub maximum_wavelength: Option<f64>,
    #[serde(default)]
    pub initial_wavelength: Option<f64>,
    /// Calibration coefficients (gauge factor, thermal coefficients, ...)
    #[serde(default)]
    pub coeffs: BTreeMap<String, f64>,
}

impl SensorMetadata {
    pub fn new(uid: &str, name: &str, channel: usize, index: usize) -> Self {
        Self {
            uid: uid.to_string(),
            channel,
            index,
            name: name.to_string(),
            sensor_type: SensorType::Other(String::new()),
            recording: true,
            corresponding_sensor: None,
            reference_wavelength: None,
            minimum_wavelength: None,
            maximum_wavelength: None,
            initial_wavelength: None,
            coeffs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_band(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum_wavelength = Some(minimum);
        self.maximum_wavelength = Some(maximum);
        self
    }

    #[must_use]
    pub fn with_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    #[must_use]
    pub fn with_recording(mut self, recording: bool) -> Self {
        self.recording = recording;
        self
    }

    #[must_use]
    pub fn with_corresponding_sensor(mut self, uid: &str) -> Self {
        self.corresponding_sensor = Some(uid.to_string());
        self
    }

    /// True when `wavelength` lies strictly inside the sensor's band.
    ///
    /// A sensor without a complete band never matches.
    pub fn in_band(&self, wavelength: f64) -> bool {
        match (self.minimum_wavelength, self.maximum_wavelength) {
            (Some(min), Some(max)) => min < wavelength && wavelength < max,
            _ => false,
        }
    }

    pub const fn is_strain(&self) -> bool {
        matches!(self.sensor_type, SensorType::Strain)
    }
}
