//! Structural groups and the setup bundles that select them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A physical substructure with its own metadata and measurement tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralGroup {
    Basement,
    StrongFloor,
    SteelFrame,
}

impl StructuralGroup {
    pub const ALL: [Self; 3] = [Self::Basement, Self::StrongFloor, Self::SteelFrame];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basement => "basement",
            Self::StrongFloor => "strong_floor",
            Self::SteelFrame => "steel_frame",
        }
    }

    /// Table holding one [`SensorMetadata`](super::SensorMetadata) row per sensor.
    pub const fn metadata_table(self) -> &'static str {
        match self {
            Self::Basement => "basement_fbg_metadata",
            Self::StrongFloor => "strong_floor_fbg_metadata",
            Self::SteelFrame => "steel_frame_fbg_metadata",
        }
    }

    /// Time-keyed table holding one [`MeasurementRow`](super::MeasurementRow) per frame.
    pub const fn values_table(self) -> &'static str {
        match self {
            Self::Basement => "basement_fbg",
            Self::StrongFloor => "strong_floor_fbg",
            Self::SteelFrame => "steel_frame_fbg",
        }
    }
}

impl fmt::Display for StructuralGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor setup currently wired to the interrogator.
///
/// Each setup selects an ordered bundle of structural groups. The numeric
/// codes are stable and used by operators on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupOption {
    #[default]
    BasementAndFrame,
    StrongFloor,
    Basement,
    Frame,
}

impl SetupOption {
    pub const ALL: [Self; 4] = [
        Self::BasementAndFrame,
        Self::StrongFloor,
        Self::Basement,
        Self::Frame,
    ];

    pub const fn code(self) -> u8 {
        match self {
            Self::BasementAndFrame => 0,
            Self::StrongFloor => 1,
            Self::Basement => 2,
            Self::Frame => 3,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::BasementAndFrame),
            1 => Some(Self::StrongFloor),
            2 => Some(Self::Basement),
            3 => Some(Self::Frame),
            _ => None,
        }
    }

    /// Structural groups recorded under this setup, in table order.
    pub const fn groups(self) -> &'static [StructuralGroup] {
        match self {
            Self::BasementAndFrame => &[StructuralGroup::Basement, StructuralGroup::SteelFrame],
            Self::StrongFloor => &[StructuralGroup::StrongFloor],
            Self::Basement => &[StructuralGroup::Basement],
            Self::Frame => &[StructuralGroup::SteelFrame],
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::BasementAndFrame => "BASEMENT AND FRAME",
            Self::StrongFloor => "STRONG FLOOR",
            Self::Basement => "BASEMENT",
            Self::Frame => "FRAME",
        }
    }
}

impl fmt::Display for SetupOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown setup '{0}' (expected 0-3 or one of: basement_and_frame, strong_floor, basement, frame)")]
pub struct UnknownSetup(pub String);

impl FromStr for SetupOption {
    type Err = UnknownSetup;

    /// Accepts the numeric code, the snake_case name or the display label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| UnknownSetup(s.to_string()));
        }

        let normalized: String = trimmed
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_lowercase() })
            .collect();

        match normalized.as_str() {
            "basement_and_frame" => Ok(Self::BasementAndFrame),
            "strong_floor" => Ok(Self::StrongFloor),
            "basement" => Ok(Self::Basement),
            "frame" | "steel_frame" => Ok(Self::Frame),
            _ => Err(UnknownSetup(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_bundles_match_tables() {
        assert_eq!(
            SetupOption::BasementAndFrame.groups(),
            &[StructuralGroup::Basement, StructuralGroup::SteelFrame]
        );
        assert_eq!(SetupOption::Frame.groups(), &[StructuralGroup::SteelFrame]);
        assert_eq!(StructuralGroup::StrongFloor.metadata_table(), "strong_floor_fbg_metadata");
        assert_eq!(StructuralGroup::SteelFrame.values_table(), "steel_frame_fbg");
    }

    #[test]
    fn setup_parses_codes_names_and_labels() {
        assert_eq!("0".parse::<SetupOption>(), Ok(SetupOption::BasementAndFrame));
        assert_eq!("strong_floor".parse::<SetupOption>(), Ok(SetupOption::StrongFloor));
        assert_eq!("BASEMENT AND FRAME".parse::<SetupOption>(), Ok(SetupOption::BasementAndFrame));
        assert_eq!("steel-frame".parse::<SetupOption>(), Ok(SetupOption::Frame));
        assert!("7".parse::<SetupOption>().is_err());
        assert!("roof".parse::<SetupOption>().is_err());
    }

    #[test]
    fn setup_codes_round_trip() {
        for setup in SetupOption::ALL {
            assert_eq!(SetupOption::from_code(setup.code()), Some(setup));
        }
        assert_eq!(SetupOption::BasementAndFrame.to_string(), "BASEMENT AND FRAME");
    }
}
