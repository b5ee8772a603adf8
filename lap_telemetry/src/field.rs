//! Sparse, run-length compacted storage for a single telemetry channel.
//!
//! Recorders emit most channels at a fraction of the session rate and repeat the last value
//! in between, so a field only keeps the first sample of every run together with its row
//! position. Lookups resolve the value in effect at a position, either in the channel's own
//! sample-index space or in the session's shared reference space.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::frame::TimeAxis;
use crate::{TelemetryError, Value};

/// Sample rates of one channel in Hz: `default` is the session reference rate, `current` the
/// rate the channel was recorded at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSampleRate")]
pub struct SampleRate {
    default: u32,
    current: u32,
}

#[derive(Deserialize)]
struct RawSampleRate {
    default: u32,
    current: u32,
}

impl TryFrom<RawSampleRate> for SampleRate {
    type Error = TelemetryError;

    fn try_from(raw: RawSampleRate) -> Result<Self, Self::Error> {
        SampleRate::new(raw.default, raw.current)
    }
}

impl SampleRate {
    pub fn new(default: u32, current: u32) -> Result<Self, TelemetryError> {
        if default == 0 || current == 0 {
            return Err(TelemetryError::InvalidParameter(format!(
                "sample rates must be positive (default {}, current {})",
                default, current
            )));
        }
        Ok(Self { default, current })
    }

    pub fn default_rate(&self) -> u32 {
        self.default
    }

    pub fn current_rate(&self) -> u32 {
        self.current
    }

    /// Reference-space position to the channel's own index space (floor).
    pub fn to_current(&self, position: usize) -> usize {
        let scaled = position as u128 * self.current as u128 / self.default as u128;
        usize::try_from(scaled).unwrap_or(usize::MAX)
    }

    /// Channel index to the first reference-space position that resolves back to it (ceil).
    pub fn to_default(&self, index: usize) -> usize {
        let scaled = (index as u128 * self.default as u128).div_ceil(self.current as u128);
        usize::try_from(scaled).unwrap_or(usize::MAX)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexSpace {
    /// The channel's own sample-index space.
    #[default]
    Current,
    /// The session's shared reference-rate space.
    Default,
}

/// One retained run as seen from a range query: where it takes effect and its value.
#[derive(Clone, Debug, PartialEq)]
pub struct Run<'a> {
    pub start: usize,
    pub value: &'a Value,
}

/// Per-channel statistics for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldSummary {
    pub runs: usize,
    pub rows: usize,
    pub first_index: Option<usize>,
    pub last_index: Option<usize>,
    pub numeric: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

enum Cell {
    Empty,
    Scalar(Value),
    Text(String),
    Continuation(String),
}

fn classify(raw: &str) -> Result<Cell, String> {
    if raw.is_empty() {
        return Ok(Cell::Empty);
    }
    match raw.trim() {
        "NaN" => return Ok(Cell::Scalar(Value::number(f64::NAN))),
        "Infinity" => return Ok(Cell::Scalar(Value::number(f64::INFINITY))),
        "-Infinity" => return Ok(Cell::Scalar(Value::number(f64::NEG_INFINITY))),
        _ => {}
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Null) => Ok(Cell::Empty),
        Ok(JsonValue::Bool(b)) => Ok(Cell::Scalar(Value::Bool(b))),
        Ok(JsonValue::Number(n)) => n
            .as_f64()
            .map(|v| Cell::Scalar(Value::number(v)))
            .ok_or_else(|| "number out of range".to_string()),
        Ok(JsonValue::String(s)) => Ok(Cell::Text(s)),
        Ok(JsonValue::Array(_)) | Ok(JsonValue::Object(_)) => {
            Err("structured JSON is not a scalar".to_string())
        }
        Err(_) if raw.starts_with(' ') => Ok(Cell::Continuation(raw.to_string())),
        Err(_) => Ok(Cell::Text(raw.to_string())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenizerState {
    Normal,
    /// The last decoded cell was text and may absorb a continuation.
    OpenText,
}

/// Decodes raw cells positionally. A cell that is not JSON and starts with a space is the
/// tail of a string that was split on an unescaped comma; it is rejoined onto the preceding
/// text cell instead of producing an entry of its own.
pub(crate) fn decode_cells<S: AsRef<str>>(
    cells: &[S],
) -> Result<Vec<(usize, Option<Value>)>, TelemetryError> {
    let mut out: Vec<(usize, Option<Value>)> = Vec::with_capacity(cells.len());
    let mut state = TokenizerState::Normal;
    for (position, raw) in cells.iter().enumerate() {
        let raw = raw.as_ref();
        let cell = classify(raw).map_err(|reason| TelemetryError::Decode {
            position,
            cell: raw.to_string(),
            reason,
        })?;
        state = match (cell, state) {
            (Cell::Empty, _) => {
                out.push((position, None));
                TokenizerState::Normal
            }
            (Cell::Scalar(value), _) => {
                out.push((position, Some(value)));
                TokenizerState::Normal
            }
            (Cell::Text(text), _) => {
                out.push((position, Some(Value::Text(text))));
                TokenizerState::OpenText
            }
            (Cell::Continuation(tail), TokenizerState::OpenText) => {
                if let Some((_, Some(Value::Text(head)))) = out.last_mut() {
                    head.push(',');
                    head.push_str(&tail);
                }
                TokenizerState::OpenText
            }
            (Cell::Continuation(_), TokenizerState::Normal) => {
                return Err(TelemetryError::Decode {
                    position,
                    cell: raw.to_string(),
                    reason: "continuation without a preceding string".to_string(),
                })
            }
        };
    }
    Ok(out)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeSeriesField {
    title: String,
    unit: String,
    sample_rate: Option<SampleRate>,
    row_count: usize,
    indices: Vec<usize>,
    values: Vec<Value>,
}

impl TimeSeriesField {
    /// Decodes a raw column and compacts it to the first sample of each run. Empty cells are
    /// skipped entirely, so a run continues across them.
    pub fn from_cells<S: AsRef<str>>(
        title: impl Into<String>,
        unit: impl Into<String>,
        cells: &[S],
    ) -> Result<Self, TelemetryError> {
        let decoded = decode_cells(cells)?;
        let mut indices = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for (position, value) in decoded {
            let Some(value) = value else { continue };
            if values.last() != Some(&value) {
                indices.push(position);
                values.push(value);
            }
        }
        Ok(Self {
            title: title.into(),
            unit: unit.into(),
            sample_rate: None,
            row_count: cells.len(),
            indices,
            values,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn sample_rate(&self) -> Option<SampleRate> {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, rate: SampleRate) {
        self.sample_rate = Some(rate);
    }

    /// Number of raw rows the column was built from.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of retained runs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn last_value(&self) -> Option<&Value> {
        self.values.last()
    }

    pub(crate) fn require_rate(&self) -> Result<SampleRate, TelemetryError> {
        self.sample_rate.ok_or_else(|| {
            TelemetryError::MissingPrerequisite(format!(
                "sample rate for channel `{}` is not assigned",
                self.title
            ))
        })
    }

    /// Value in effect at a position of the channel's own index space, `None` before the
    /// first stored sample.
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        let run = self.indices.partition_point(|&stored| stored <= index);
        run.checked_sub(1).map(|run| &self.values[run])
    }

    pub fn lookup(
        &self,
        position: usize,
        space: IndexSpace,
    ) -> Result<Option<&Value>, TelemetryError> {
        match space {
            IndexSpace::Current => Ok(self.value_at(position)),
            IndexSpace::Default => {
                let rate = self.require_rate()?;
                Ok(self.value_at(rate.to_current(position)))
            }
        }
    }

    /// Stored run starts expressed in the requested space.
    pub fn positions(&self, space: IndexSpace) -> Result<Vec<usize>, TelemetryError> {
        match space {
            IndexSpace::Current => Ok(self.indices.clone()),
            IndexSpace::Default => {
                let rate = self.require_rate()?;
                Ok(self.indices.iter().map(|&i| rate.to_default(i)).collect())
            }
        }
    }

    /// Runs in effect anywhere in `[start, end)`, each with its effective start position
    /// clamped to `start`. Nothing is densified.
    pub fn range(
        &self,
        start: usize,
        end: usize,
        space: IndexSpace,
    ) -> Result<Vec<Run<'_>>, TelemetryError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let rate = match space {
            IndexSpace::Current => None,
            IndexSpace::Default => Some(self.require_rate()?),
        };
        let (lo, hi) = match rate {
            None => (start, end - 1),
            Some(rate) => (rate.to_current(start), rate.to_current(end - 1)),
        };
        let first = self.indices.partition_point(|&stored| stored <= lo).saturating_sub(1);
        let last = self.indices.partition_point(|&stored| stored <= hi);
        let mut runs = Vec::new();
        for run in first..last {
            let index = self.indices[run];
            if index > hi {
                break;
            }
            let position = match rate {
                None => index,
                Some(rate) => rate.to_default(index),
            };
            runs.push(Run {
                start: position.max(start),
                value: &self.values[run],
            });
        }
        Ok(runs)
    }

    /// Dense reconstruction over `len` positions of the channel's own index space.
    pub fn expand(&self, len: usize) -> Vec<Option<&Value>> {
        let mut out = Vec::with_capacity(len);
        let mut run = 0usize;
        let mut current: Option<&Value> = None;
        for position in 0..len {
            while run < self.indices.len() && self.indices[run] <= position {
                current = Some(&self.values[run]);
                run += 1;
            }
            out.push(current);
        }
        out
    }

    /// Samples the channel on a time axis of any rate.
    pub fn sample_on_axis(&self, axis: &TimeAxis) -> Result<Vec<Option<&Value>>, TelemetryError> {
        let rate = self.require_rate()?;
        if axis.rate() == rate.current_rate() {
            return Ok(self.expand(axis.len()));
        }
        let scale = SampleRate::new(axis.rate(), rate.current_rate())?;
        Ok((0..axis.len())
            .map(|k| self.value_at(scale.to_current(k)))
            .collect())
    }

    /// Numeric view of [`Self::sample_on_axis`] for plotting.
    pub fn numeric_on_axis(&self, axis: &TimeAxis) -> Result<Vec<Option<f64>>, TelemetryError> {
        Ok(self
            .sample_on_axis(axis)?
            .into_iter()
            .map(|value| value.and_then(Value::as_f64))
            .collect())
    }

    pub fn summary(&self) -> FieldSummary {
        let mut summary = FieldSummary {
            runs: self.values.len(),
            rows: self.row_count,
            first_index: self.indices.first().copied(),
            last_index: self.indices.last().copied(),
            ..FieldSummary::default()
        };
        for value in self.values.iter().filter_map(Value::as_f64).filter(|v| !v.is_nan()) {
            summary.numeric += 1;
            summary.min = Some(summary.min.map_or(value, |m| m.min(value)));
            summary.max = Some(summary.max.map_or(value, |m| m.max(value)));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(cells: &[&str]) -> TimeSeriesField {
        TimeSeriesField::from_cells("Gear", "", cells).unwrap()
    }

    #[test]
    fn test_decodes_scalars_and_text() {
        let decoded = decode_cells(&["1.5", "true", "", "pit lane", "\"quoted\"", "null"]).unwrap();
        let values: Vec<Option<Value>> = decoded.into_iter().map(|(_, v)| v).collect();
        assert_eq!(
            values,
            vec![
                Some(Value::number(1.5)),
                Some(Value::Bool(true)),
                None,
                Some(Value::from("pit lane")),
                Some(Value::from("quoted")),
                None,
            ]
        );
    }

    #[test]
    fn test_continuation_rejoins_split_text() {
        let decoded = decode_cells(&["Laguna Seca", " Monterey", " CA", "3"]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].1, Some(Value::from("Laguna Seca, Monterey, CA")));
        assert_eq!(decoded[1], (3, Some(Value::number(3.0))));
    }

    #[test]
    fn test_continuation_without_text_is_error() {
        let err = decode_cells(&["4", " stray"]).unwrap_err();
        assert!(matches!(err, TelemetryError::Decode { position: 1, .. }));
        assert!(decode_cells(&[" lead"]).is_err());
        assert!(decode_cells(&["[1, 2]"]).is_err());
    }

    #[test]
    fn test_run_length_compaction() {
        let f = field(&["1", "1", "1", "2", "2", "", "2", "3", "1", "1"]);
        assert_eq!(f.indices(), &[0, 3, 7, 8]);
        assert_eq!(
            f.values(),
            &[Value::number(1.0), Value::number(2.0), Value::number(3.0), Value::number(1.0)]
        );
        assert!(f.values().windows(2).all(|w| w[0] != w[1]));
        assert_eq!(f.row_count(), 10);
    }

    #[test]
    fn test_nan_cells_compact_into_one_run() {
        let f = field(&["NaN", "NaN", "1", "NaN"]);
        assert_eq!(f.indices(), &[0, 2, 3]);
        assert_eq!(f.first_value(), Some(&Value::number(f64::NAN)));
        assert_eq!(f.value_at(1), Some(&Value::number(f64::NAN)));
        assert_eq!(f.last_value(), Some(&Value::number(f64::NAN)));
    }

    #[test]
    fn test_lookup_returns_covering_run() {
        let raw = ["0", "0", "5", "5", "5", "7", "7", "0"];
        let f = field(&raw);
        for (row, cell) in raw.iter().enumerate() {
            let expected = Value::number(cell.parse().unwrap());
            assert_eq!(f.lookup(row, IndexSpace::Current).unwrap(), Some(&expected));
        }
        assert_eq!(f.value_at(1_000), Some(&Value::number(0.0)));
    }

    #[test]
    fn test_lookup_before_first_sample() {
        let f = field(&["", "", "4"]);
        assert_eq!(f.value_at(1), None);
        assert_eq!(f.value_at(2), Some(&Value::number(4.0)));
    }

    #[test]
    fn test_default_space_requires_rate() {
        let f = field(&["1", "2"]);
        assert!(matches!(
            f.lookup(0, IndexSpace::Default),
            Err(TelemetryError::MissingPrerequisite(_))
        ));
        assert!(f.lookup(0, IndexSpace::Current).is_ok());
    }

    #[test]
    fn test_index_space_conversion() {
        let cells: Vec<String> = (0..40).map(|i| (i / 3).to_string()).collect();
        let mut f = TimeSeriesField::from_cells("Brake", "bar", &cells).unwrap();
        f.set_sample_rate(SampleRate::new(60, 30).unwrap());
        for p in 0..80 {
            assert_eq!(
                f.lookup(p, IndexSpace::Default).unwrap(),
                f.lookup(p * 30 / 60, IndexSpace::Current).unwrap()
            );
        }
    }

    #[test]
    fn test_to_default_round_trips() {
        let rate = SampleRate::new(30, 20).unwrap();
        for i in 0..100 {
            let p = rate.to_default(i);
            assert_eq!(rate.to_current(p), i);
            if p > 0 {
                assert!(rate.to_current(p - 1) < i);
            }
        }
        assert!(SampleRate::new(0, 10).is_err());
    }

    #[test]
    fn test_channel_at_reference_rate_maps_identically() {
        let cells: Vec<String> = (0..30).map(|i| (i / 4).to_string()).collect();
        let mut f = TimeSeriesField::from_cells("Throttle", "%", &cells).unwrap();
        f.set_sample_rate(SampleRate::new(30, 30).unwrap());
        let rate = f.sample_rate().unwrap();
        for i in 0..30 {
            assert_eq!(rate.to_default(i), i);
            assert_eq!(rate.to_current(i), i);
            assert_eq!(
                f.lookup(i, IndexSpace::Default).unwrap(),
                f.lookup(i, IndexSpace::Current).unwrap()
            );
        }
        for &index in f.indices() {
            let position = rate.to_default(index);
            assert_eq!(f.lookup(position, IndexSpace::Default).unwrap(), f.value_at(index));
        }
    }

    #[test]
    fn test_far_positions_resolve_to_last_value() {
        let mut f = field(&["1", "2", "3"]);
        f.set_sample_rate(SampleRate::new(30, 10).unwrap());
        assert_eq!(
            f.lookup(usize::MAX / 2, IndexSpace::Default).unwrap(),
            Some(&Value::number(3.0))
        );
        assert_eq!(
            f.lookup(usize::MAX, IndexSpace::Default).unwrap(),
            Some(&Value::number(3.0))
        );
        let fast = SampleRate::new(10, 30).unwrap();
        assert_eq!(fast.to_current(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_deserialized_rate_is_validated() {
        let rate: SampleRate = serde_json::from_str(r#"{"default":30,"current":5}"#).unwrap();
        assert_eq!(rate, SampleRate::new(30, 5).unwrap());
        assert!(serde_json::from_str::<SampleRate>(r#"{"default":0,"current":5}"#).is_err());
        assert!(serde_json::from_str::<SampleRate>(r#"{"default":30,"current":0}"#).is_err());
    }

    #[test]
    fn test_range_query() {
        let mut f = field(&["1", "1", "2", "2", "3", "3", "4", "4"]);
        let runs = f.range(1, 5, IndexSpace::Current).unwrap();
        let starts: Vec<usize> = runs.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![1, 2, 4]);
        assert_eq!(runs[2].value, &Value::number(3.0));

        f.set_sample_rate(SampleRate::new(20, 10).unwrap());
        let runs = f.range(3, 9, IndexSpace::Default).unwrap();
        let starts: Vec<usize> = runs.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![3, 4, 8]);
        assert!(f.range(4, 4, IndexSpace::Current).unwrap().is_empty());
    }

    #[test]
    fn test_expand_dense() {
        let f = field(&["", "a", "a", "b"]);
        let dense = f.expand(5);
        assert_eq!(dense[0], None);
        assert_eq!(dense[2], Some(&Value::from("a")));
        assert_eq!(dense[4], Some(&Value::from("b")));
    }

    #[test]
    fn test_summary_statistics() {
        let f = field(&["3", "-1", "pit", "8"]);
        let summary = f.summary();
        assert_eq!(summary.runs, 4);
        assert_eq!(summary.numeric, 3);
        assert_eq!(summary.min, Some(-1.0));
        assert_eq!(summary.max, Some(8.0));
        assert_eq!(summary.last_index, Some(3));
    }
}
