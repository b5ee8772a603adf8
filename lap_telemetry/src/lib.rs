//! Lap telemetry core: multi-rate sparse channel storage and local-tangent-plane track projection.
//!
//! A session export is decoded into a [`TelemetryFrame`] holding one run-length compacted
//! [`TimeSeriesField`] per column. Channels recorded at different rates are aligned through a
//! shared reference rate, and GPS positions are mapped to a flat track frame anchored at a
//! calibrated [`Origin`].

use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod field;
pub mod frame;
pub mod geo;
pub mod origin;
pub mod rates;
pub mod sectors;
pub mod session;

pub use field::{FieldSummary, IndexSpace, Run, SampleRate, TimeSeriesField};
pub use frame::{
    normalize_identifier, AlignedPair, TelemetryFrame, TimeAxes, TimeAxis, TIME_CHANNEL,
};
pub use geo::{
    cartesian_distance, dx_dy, earth_radius, gps_distance, project_to_plane,
    unproject_from_plane, Coordinates, DistanceMethod, LocalFrame, Origin, DEFAULT_ALTITUDE_M,
    EARTH_RADIUS_M,
};
pub use origin::{
    calibrate, parse_angle, parse_reference_points, read_reference_points, validate_reference,
    Calibration, OriginPolicy, ReferencePoint,
};
pub use rates::SampleRateConfig;
pub use sectors::{SectorEvent, SectorExtractor};
pub use session::{parse_session, read_session, InfoBlock, InfoField, Session, SessionHeader};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("data import failed: {0}")]
    Import(String),
    #[error(
        "mismatch in number of columns: {titles} titles, {units} units, {values} values"
    )]
    SchemaMismatch {
        titles: usize,
        units: usize,
        values: usize,
    },
    #[error("cannot decode cell {position} ({cell:?}): {reason}")]
    Decode {
        position: usize,
        cell: String,
        reason: String,
    },
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("channel title `{title}` is ambiguous ({matches} matches)")]
    AmbiguousChannel { title: String, matches: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A decoded telemetry cell.
///
/// Numbers are wrapped in [`OrderedFloat`] so that values compare and hash totally; two `NaN`
/// cells in a row therefore collapse into a single run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(OrderedFloat<f64>),
    Text(String),
}

impl Value {
    pub fn number(value: f64) -> Self {
        Value::Number(OrderedFloat(value))
    }

    /// Numeric view used for plotting: booleans map to 0/1, text has no numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Some(n.into_inner()),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n.into_inner()),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_numeric_view() {
        assert_eq!(Value::number(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::from("pit").as_f64(), None);
        assert_eq!(Value::from("pit").as_str(), Some("pit"));
        assert!(Value::from("pit").is_text());
        assert!(!Value::number(1.0).is_text());
        assert_eq!(Value::Bool(false).as_str(), None);
    }

    #[test]
    fn test_nan_values_compare_equal() {
        assert_eq!(Value::number(f64::NAN), Value::number(f64::NAN));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::number(12.0).to_string(), "12");
        assert_eq!(Value::number(0.25).to_string(), "0.25");
        assert_eq!(Value::from("Lap 3").to_string(), "Lap 3");
    }
}
