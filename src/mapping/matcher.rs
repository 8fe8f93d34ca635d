//! Peak-to-sensor matching.
//!
//! The interrogator reports every detected peak on a channel in wavelength
//! order. Peaks can be dropped (a sensor out of band, a weak reflection) but
//! never invented, so a sensor expected at position `i` can only appear at
//! some position `j <= i`. Matching scans backward from `i` and takes the
//! first reading inside the sensor's band.

use crate::types::SensorMetadata;
use std::collections::{BTreeMap, HashMap};

/// Reading for one sensor, or `None` if it is disabled, unbound or unmatched.
pub fn match_sensor(peaks: &[Vec<f64>], sensor: &SensorMetadata) -> Option<f64> {
    if !sensor.recording {
        return None;
    }
    let readings = peaks.get(sensor.channel)?;
    let last = readings.len().checked_sub(1)?;
    let start = sensor.index.min(last);

    readings[..=start]
        .iter()
        .rev()
        .copied()
        .find(|wavelength| sensor.in_band(*wavelength))
}

/// uid -> matched wavelength for every sensor that matched.
pub fn map_peaks(
    peaks: &[Vec<f64>],
    sensors: &HashMap<String, SensorMetadata>,
) -> BTreeMap<String, f64> {
    sensors
        .iter()
        .filter_map(|(uid, sensor)| match_sensor(peaks, sensor).map(|w| (uid.clone(), w)))
        .collect()
}
