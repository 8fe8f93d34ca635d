//! Instrument status snapshot and the live-recording marker.

use super::{SetupOption, StructuralGroup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Last values read back from the interrogator.
///
/// Every field is optional: a rejected or undecodable query leaves it unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentStatus {
    pub firmware_version: Option<String>,
    pub instrument_name: Option<String>,
    pub is_ready: Option<bool>,
    pub dut_channel_count: Option<u32>,
    pub available_laser_scan_speeds: Vec<u32>,
    pub peak_data_streaming_status: Option<bool>,
    /// Laser scan speed (Hz)
    pub laser_scan_speed: Option<u32>,
    pub peak_data_streaming_divider: Option<u32>,
    /// Free streaming buffer (percent)
    pub peak_data_streaming_available_buffer: Option<u32>,
    pub instrument_time: Option<DateTime<Utc>>,
    pub ntp_enabled: Option<bool>,
    pub ntp_server: Option<Ipv4Addr>,
}

impl InstrumentStatus {
    /// Frames per second delivered on the streaming channel.
    ///
    /// `None` when either input is unknown or the divider is zero.
    pub fn effective_sampling_rate(&self) -> Option<u32> {
        match (self.laser_scan_speed, self.peak_data_streaming_divider) {
            (Some(speed), Some(divider)) if divider > 0 => Some(speed / divider),
            _ => None,
        }
    }
}

/// Side-channel record telling out-of-process readers whether recording is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub live: bool,
    pub setup: SetupOption,
    pub groups: Vec<StructuralGroup>,
    pub sampling_rate: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl LiveStatus {
    pub fn new(live: bool, setup: SetupOption, sampling_rate: Option<u32>) -> Self {
        Self {
            live,
            setup,
            groups: setup.groups().to_vec(),
            sampling_rate,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_rate_needs_both_inputs() {
        let mut status = InstrumentStatus::default();
        assert_eq!(status.effective_sampling_rate(), None);

        status.laser_scan_speed = Some(1000);
        assert_eq!(status.effective_sampling_rate(), None);

        status.peak_data_streaming_divider = Some(0);
        assert_eq!(status.effective_sampling_rate(), None);

        status.peak_data_streaming_divider = Some(3);
        assert_eq!(status.effective_sampling_rate(), Some(333));
    }

    #[test]
    fn live_status_lists_setup_groups() {
        let status = LiveStatus::new(true, SetupOption::BasementAndFrame, Some(100));
        assert_eq!(
            status.groups,
            vec![StructuralGroup::Basement, StructuralGroup::SteelFrame]
        );
    }
}
