//! Calibration document parsing and patch planning.
//!
//! The interrogator's configuration software exports an XML document with
//! two kinds of entries:
//!
//! - `SensorConfiguration`: a sensor's channel position (encoded in the
//!   trailing uid of `Name`, e.g. `..._B3` is channel B, position 3) and its
//!   reference wavelength and band.
//! - `Transducer`: keyed by sensor name (`ID`), a list of
//!   `TransducerConstant` name/value pairs holding calibration coefficients
//!   and initial wavelengths.
//!
//! Parsing is pure. [`plan_patches`] turns a parsed document into metadata
//! patches against the current table contents; nothing is written until the
//! whole document has been parsed and planned.

use crate::storage::{MetadataPatch, PatchChange, StorageError};
use crate::types::{SensorMetadata, SetupOption, StructuralGroup};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Trailing sensor uid of a `SensorConfiguration` name.
const UID_PATTERN: &str = r"[A-Za-z0-9]{1,3}$";

/// Upstream unit of `CTEt` is 10^-6 / °C.
const CTET_SCALE: f64 = 1e6;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read calibration document: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed calibration document: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("{element} entry is missing {field}")]
    MissingField {
        element: &'static str,
        field: &'static str,
    },

    #[error("{field} value '{value}' is not a number")]
    InvalidNumber { field: String, value: String },

    #[error("sensor name '{name}' does not end in a channel letter and position")]
    InvalidSensorName { name: String },

    #[error("constant '{name}' does not carry a uid between underscores")]
    InvalidConstantName { name: String },

    #[error("document ended inside <{element}>")]
    Unterminated { element: String },

    #[error("invalid uid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ============================================================================
// Document model
// ============================================================================

/// Placement of one sensor on the interrogator.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfiguration {
    pub name: String,
    pub uid: String,
    pub channel: usize,
    pub index: usize,
    pub reference_wavelength: f64,
    pub minimum_wavelength: f64,
    pub maximum_wavelength: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransducerConstant {
    pub name: String,
    pub value: f64,
}

/// Calibration constants for one named sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Transducer {
    pub id: String,
    pub constants: Vec<TransducerConstant>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationDocument {
    pub sensors: Vec<SensorConfiguration>,
    pub transducers: Vec<Transducer>,
}

#[derive(Default)]
struct SensorDraft {
    name: Option<String>,
    reference: Option<String>,
    minimum: Option<String>,
    maximum: Option<String>,
}

#[derive(Default)]
struct TransducerDraft {
    id: Option<String>,
    constants: Vec<TransducerConstant>,
}

#[derive(Default)]
struct ConstantDraft {
    name: Option<String>,
    value: Option<String>,
}

impl CalibrationDocument {
    pub fn parse(xml: &str) -> Result<Self, CalibrationError> {
        let uid_pattern = Regex::new(UID_PATTERN)?;
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut document = Self::default();
        let mut path: Vec<String> = Vec::new();
        let mut sensor: Option<SensorDraft> = None;
        let mut transducer: Option<TransducerDraft> = None;
        let mut constant: Option<ConstantDraft> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match name.as_str() {
                        "SensorConfiguration" => sensor = Some(SensorDraft::default()),
                        "Transducer" => transducer = Some(TransducerDraft::default()),
                        "TransducerConstant" => constant = Some(ConstantDraft::default()),
                        _ => {}
                    }
                    path.push(name);
                }
                Event::End(e) => {
                    path.pop();
                    match e.local_name().as_ref() {
                        b"SensorConfiguration" => {
                            if let Some(draft) = sensor.take() {
                                document.sensors.push(draft.finish(&uid_pattern)?);
                            }
                        }
                        b"TransducerConstant" => {
                            if let (Some(draft), Some(owner)) = (constant.take(), transducer.as_mut())
                            {
                                owner.constants.push(draft.finish()?);
                            }
                        }
                        b"Transducer" => {
                            if let Some(draft) = transducer.take() {
                                document.transducers.push(draft.finish()?);
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    let (Some(field), Some(parent)) =
                        (path.last(), path.len().checked_sub(2).and_then(|i| path.get(i)))
                    else {
                        continue;
                    };
                    match (parent.as_str(), field.as_str()) {
                        ("SensorConfiguration", "Name") => {
                            if let Some(d) = sensor.as_mut() {
                                d.name = Some(text);
                            }
                        }
                        ("SensorConfiguration", "Reference") => {
                            if let Some(d) = sensor.as_mut() {
                                d.reference = Some(text);
                            }
                        }
                        ("SensorConfiguration", "WavelengthMinimum") => {
                            if let Some(d) = sensor.as_mut() {
                                d.minimum = Some(text);
                            }
                        }
                        ("SensorConfiguration", "WavelengthMaximum") => {
                            if let Some(d) = sensor.as_mut() {
                                d.maximum = Some(text);
                            }
                        }
                        ("Transducer", "ID") => {
                            if let Some(d) = transducer.as_mut() {
                                d.id = Some(text);
                            }
                        }
                        ("TransducerConstant", "Name") => {
                            if let Some(d) = constant.as_mut() {
                                d.name = Some(text);
                            }
                        }
                        ("TransducerConstant", "Value") => {
                            if let Some(d) = constant.as_mut() {
                                d.value = Some(text);
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => {
                    if let Some(element) = path.pop() {
                        return Err(CalibrationError::Unterminated { element });
                    }
                    break;
                }
                _ => {}
            }
        }

        Ok(document)
    }
}

fn parse_number(field: &str, value: &str) -> Result<f64, CalibrationError> {
    value
        .trim()
        .parse()
        .map_err(|_| CalibrationError::InvalidNumber {
            field: field.to_string(),
            value: value.to_string(),
        })
}

fn required(
    value: Option<String>,
    element: &'static str,
    field: &'static str,
) -> Result<String, CalibrationError> {
    value.ok_or(CalibrationError::MissingField { element, field })
}

impl SensorDraft {
    fn finish(self, uid_pattern: &Regex) -> Result<SensorConfiguration, CalibrationError> {
        let name = required(self.name, "SensorConfiguration", "Name")?;
        let reference = required(self.reference, "SensorConfiguration", "Reference")?;
        let minimum = required(self.minimum, "SensorConfiguration", "WavelengthMinimum")?;
        let maximum = required(self.maximum, "SensorConfiguration", "WavelengthMaximum")?;

        let (uid, channel, index) = placement_from_name(&name, uid_pattern)?;
        Ok(SensorConfiguration {
            uid,
            channel,
            index,
            reference_wavelength: parse_number("Reference", &reference)?,
            minimum_wavelength: parse_number("WavelengthMinimum", &minimum)?,
            maximum_wavelength: parse_number("WavelengthMaximum", &maximum)?,
            name,
        })
    }
}

impl TransducerDraft {
    fn finish(self) -> Result<Transducer, CalibrationError> {
        Ok(Transducer {
            id: required(self.id, "Transducer", "ID")?,
            constants: self.constants,
        })
    }
}

impl ConstantDraft {
    fn finish(self) -> Result<TransducerConstant, CalibrationError> {
        let name = required(self.name, "TransducerConstant", "Name")?;
        let value = required(self.value, "TransducerConstant", "Value")?;
        Ok(TransducerConstant {
            value: parse_number(&name, &value)?,
            name,
        })
    }
}

/// `..._C12` -> (`C12`, channel 2, index 11).
fn placement_from_name(
    name: &str,
    uid_pattern: &Regex,
) -> Result<(String, usize, usize), CalibrationError> {
    let invalid = || CalibrationError::InvalidSensorName {
        name: name.to_string(),
    };
    let uid = uid_pattern.find(name.trim()).ok_or_else(invalid)?.as_str();

    let mut chars = uid.chars();
    let letter = chars.next().filter(char::is_ascii_uppercase).ok_or_else(invalid)?;
    let position: usize = chars.as_str().parse().map_err(|_| invalid())?;
    let index = position.checked_sub(1).ok_or_else(invalid)?;
    let channel = usize::from(letter as u8 - b'A');

    Ok((uid.to_string(), channel, index))
}

/// `FBG_A3_0` style constants carry an initial wavelength for the uid
/// between the first and last underscore.
fn initial_wavelength_uid(constant: &str) -> Option<Result<String, CalibrationError>> {
    if !(constant.starts_with("FBG") && constant.ends_with('0')) {
        return None;
    }
    let invalid = || CalibrationError::InvalidConstantName {
        name: constant.to_string(),
    };
    let uid = match (constant.find('_'), constant.rfind('_')) {
        (Some(first), Some(last)) if first < last => Ok(constant[first + 1..last].to_string()),
        _ => Err(invalid()),
    };
    Some(uid)
}

// ============================================================================
// Planning
// ============================================================================

/// Patches to apply plus the identifiers no group in the bundle knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchPlan {
    pub patches: Vec<MetadataPatch>,
    pub ignored: BTreeSet<String>,
}

/// Result of a committed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub setup: SetupOption,
    pub sensor_entries: usize,
    pub transducer_entries: usize,
    pub patches_applied: usize,
    /// uids and sensor names in the document that matched no row
    pub ignored: BTreeSet<String>,
}

/// Plan metadata updates for every group in `tables`.
///
/// Per group, placements come first, then initial wavelengths and
/// coefficients in document order. Unknown uids and names produce no patch.
pub fn plan_patches(
    document: &CalibrationDocument,
    tables: &[(StructuralGroup, Vec<SensorMetadata>)],
) -> Result<PatchPlan, CalibrationError> {
    let mut plan = PatchPlan::default();
    let mut known: BTreeSet<String> = BTreeSet::new();
    let mut referenced: BTreeSet<String> = BTreeSet::new();

    for (group, rows) in tables {
        let group = *group;
        let by_uid: BTreeMap<&str, &SensorMetadata> =
            rows.iter().map(|s| (s.uid.as_str(), s)).collect();
        let by_name: BTreeMap<&str, &SensorMetadata> =
            rows.iter().map(|s| (s.name.as_str(), s)).collect();
        let patch = |uid: &str, change: PatchChange| MetadataPatch {
            group,
            uid: uid.to_string(),
            change,
        };

        for entry in &document.sensors {
            referenced.insert(entry.uid.clone());
            if !by_uid.contains_key(entry.uid.as_str()) {
                continue;
            }
            known.insert(entry.uid.clone());
            plan.patches.push(patch(
                &entry.uid,
                PatchChange::Placement {
                    channel: entry.channel,
                    index: entry.index,
                    reference_wavelength: Some(entry.reference_wavelength),
                    minimum_wavelength: Some(entry.minimum_wavelength),
                    maximum_wavelength: Some(entry.maximum_wavelength),
                },
            ));
        }

        for transducer in &document.transducers {
            referenced.insert(transducer.id.clone());
            let sensor = by_name.get(transducer.id.as_str()).copied();
            if sensor.is_some() {
                known.insert(transducer.id.clone());
            }

            let mut coeffs = BTreeMap::new();
            for constant in &transducer.constants {
                if let Some(uid) = initial_wavelength_uid(&constant.name) {
                    let uid = uid?;
                    referenced.insert(uid.clone());
                    if by_uid.contains_key(uid.as_str()) {
                        known.insert(uid.clone());
                        plan.patches
                            .push(patch(&uid, PatchChange::InitialWavelength(constant.value)));
                    }
                    continue;
                }

                let (name, value) = match constant.name.as_str() {
                    "K" => ("beta".to_string(), constant.value),
                    "CTEt" => (constant.name.clone(), constant.value / CTET_SCALE),
                    _ => (constant.name.clone(), constant.value),
                };

                if name == "St" {
                    let paired = sensor
                        .filter(|s| s.is_strain())
                        .and_then(|s| s.corresponding_sensor.as_deref())
                        .filter(|uid| by_uid.contains_key(uid));
                    if let Some(paired) = paired {
                        plan.patches.push(patch(
                            paired,
                            PatchChange::Coefficients(BTreeMap::from([(name.clone(), value)])),
                        ));
                    }
                }

                coeffs.insert(name, value);
            }

            if let Some(sensor) = sensor.filter(|_| !coeffs.is_empty()) {
                plan.patches
                    .push(patch(&sensor.uid, PatchChange::Coefficients(coeffs)));
            }
        }
    }

    plan.ignored = referenced.difference(&known).cloned().collect();
    Ok(plan)
}
