//! Session-wide channel registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use ndarray::Array1;
use tracing::debug;

use crate::field::{IndexSpace, SampleRate, TimeSeriesField};
use crate::rates::SampleRateConfig;
use crate::{TelemetryError, Value};

/// Identifier of the mandatory elapsed-time channel.
pub const TIME_CHANNEL: &str = "time";

/// Turns a display title into a channel identifier: spaces become underscores, the result is
/// lowercased, anything outside `[0-9a-z_]` is removed and leading characters that are not a
/// letter or underscore are stripped. May return an empty string.
pub fn normalize_identifier(title: &str) -> String {
    let cleaned: String = title
        .replace(' ', "_")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    cleaned
        .trim_start_matches(|c: char| !(c.is_ascii_lowercase() || c == '_'))
        .to_string()
}

/// Normalized identifier for `title`, suffixed with `_2`, `_3`, ... while `taken`.
pub(crate) fn unique_identifier(title: &str, taken: impl Fn(&str) -> bool) -> String {
    let base = normalize_identifier(title);
    let mut identifier = base.clone();
    let mut suffix = 2;
    while taken(&identifier) {
        identifier = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    identifier
}

/// Dense timestamps `k / rate` for one sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeAxis {
    rate: u32,
    times: Array1<f64>,
}

impl TimeAxis {
    pub fn new(rate: u32, duration_s: f64) -> Self {
        let len = (duration_s * rate as f64).round().max(0.0) as usize;
        let times = Array1::from_shape_fn(len, |k| k as f64 / rate as f64);
        Self { rate, times }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn time_at(&self, position: usize) -> Option<f64> {
        self.times.get(position).copied()
    }

    /// Sample position in effect at `time_s`.
    pub fn position_at(&self, time_s: f64) -> usize {
        (time_s.max(0.0) * self.rate as f64).floor() as usize
    }
}

pub type TimeAxes = BTreeMap<u32, TimeAxis>;

pub(crate) fn retain_positions<T>(items: Vec<T>, keep: impl Fn(usize) -> bool) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter(|(position, _)| keep(*position))
        .map(|(_, item)| item)
        .collect()
}

/// Two channels resolved at the union of their run starts in reference space.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedPair<'a> {
    pub positions: Vec<usize>,
    pub first: Vec<Option<&'a Value>>,
    pub second: Vec<Option<&'a Value>>,
}

impl AlignedPair<'_> {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Points where both channels hold a numeric value, ready for an x/y plot.
    pub fn numeric(&self) -> Vec<(f64, f64)> {
        self.first
            .iter()
            .zip(self.second.iter())
            .filter_map(|(a, b)| Some((a.and_then(Value::as_f64)?, b.and_then(Value::as_f64)?)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct TelemetryFrame {
    identifiers: Vec<String>,
    fields: Vec<TimeSeriesField>,
    by_identifier: HashMap<String, usize>,
    row_count: usize,
    time_axes: OnceLock<TimeAxes>,
}

impl TelemetryFrame {
    /// Builds a frame from parallel column titles, units and raw value columns. Columns whose
    /// title normalizes to nothing are dropped from all three in lock-step; the counts must
    /// agree afterwards.
    pub fn from_columns(
        titles: Vec<String>,
        units: Vec<String>,
        columns: Vec<Vec<String>>,
    ) -> Result<Self, TelemetryError> {
        let normalized: Vec<String> = titles.iter().map(|t| normalize_identifier(t)).collect();
        let keep = |position: usize| normalized.get(position).map_or(true, |id| !id.is_empty());
        let dropped = normalized.iter().filter(|id| id.is_empty()).count();
        if dropped > 0 {
            debug!("dropping {} columns with unaddressable titles", dropped);
        }

        let titles = retain_positions(titles, &keep);
        let units = retain_positions(units, &keep);
        let columns = retain_positions(columns, &keep);
        if titles.len() != units.len() || titles.len() != columns.len() {
            return Err(TelemetryError::SchemaMismatch {
                titles: titles.len(),
                units: units.len(),
                values: columns.len(),
            });
        }

        let row_count = columns.first().map_or(0, Vec::len);
        if let Some(ragged) = columns.iter().position(|c| c.len() != row_count) {
            return Err(TelemetryError::Import(format!(
                "column `{}` has {} rows, expected {}",
                titles[ragged],
                columns[ragged].len(),
                row_count
            )));
        }

        let mut frame = TelemetryFrame {
            row_count,
            ..TelemetryFrame::default()
        };
        for ((title, unit), column) in titles.into_iter().zip(units).zip(columns) {
            let field = TimeSeriesField::from_cells(title, unit, &column)?;
            frame.insert(field);
        }
        debug!(
            "frame built: {} channels, {} rows, {} retained runs",
            frame.fields.len(),
            frame.row_count,
            frame.fields.iter().map(TimeSeriesField::len).sum::<usize>()
        );
        Ok(frame)
    }

    /// Row-major variant of [`Self::from_columns`]. Every row must have one cell per title.
    pub fn from_rows(
        titles: Vec<String>,
        units: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, TelemetryError> {
        let mut columns: Vec<Vec<String>> = vec![Vec::with_capacity(rows.len()); titles.len()];
        for row in rows {
            if row.len() != titles.len() {
                return Err(TelemetryError::SchemaMismatch {
                    titles: titles.len(),
                    units: units.len(),
                    values: row.len(),
                });
            }
            for (column, cell) in columns.iter_mut().zip(row) {
                column.push(cell);
            }
        }
        Self::from_columns(titles, units, columns)
    }

    fn insert(&mut self, field: TimeSeriesField) {
        let identifier = unique_identifier(field.title(), |id| self.by_identifier.contains_key(id));
        self.by_identifier.insert(identifier.clone(), self.fields.len());
        self.identifiers.push(identifier);
        self.fields.push(field);
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Channels in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimeSeriesField)> {
        self.identifiers.iter().map(String::as_str).zip(self.fields.iter())
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(String::as_str)
    }

    /// `(display title, identifier)` pairs in column order.
    pub fn title_pairs(&self) -> Vec<(&str, &str)> {
        self.iter().map(|(id, field)| (field.title(), id)).collect()
    }

    pub fn get(&self, identifier: &str) -> Option<&TimeSeriesField> {
        self.by_identifier.get(identifier).map(|&idx| &self.fields[idx])
    }

    pub fn field(&self, identifier: &str) -> Result<&TimeSeriesField, TelemetryError> {
        self.get(identifier)
            .ok_or_else(|| TelemetryError::UnknownChannel(identifier.to_string()))
    }

    fn position_by_title(&self, title: &str) -> Result<usize, TelemetryError> {
        let matches: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.title().trim() == title.trim())
            .map(|(idx, _)| idx)
            .collect();
        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(TelemetryError::UnknownChannel(title.to_string())),
            many => Err(TelemetryError::AmbiguousChannel {
                title: title.to_string(),
                matches: many.len(),
            }),
        }
    }

    /// Channel whose display title is exactly `title`.
    pub fn find_by_title(&self, title: &str) -> Result<(&str, &TimeSeriesField), TelemetryError> {
        let idx = self.position_by_title(title)?;
        Ok((&self.identifiers[idx], &self.fields[idx]))
    }

    /// Gives every channel the default rate, then applies the per-title overrides. All
    /// overrides are resolved before anything changes. Cached time axes are discarded.
    pub fn assign_sample_rates(&mut self, config: &SampleRateConfig) -> Result<(), TelemetryError> {
        let uniform = SampleRate::new(config.default_rate, config.default_rate)?;
        let mut overrides = Vec::with_capacity(config.overrides.len());
        for (title, rate) in &config.overrides {
            let idx = self.position_by_title(title)?;
            // A channel faster than the reference rate has samples with no reference position.
            if *rate > config.default_rate {
                return Err(TelemetryError::InvalidParameter(format!(
                    "`{}` rate {} Hz exceeds the {} Hz reference rate",
                    title, rate, config.default_rate
                )));
            }
            overrides.push((idx, SampleRate::new(config.default_rate, *rate)?));
        }
        for field in &mut self.fields {
            field.set_sample_rate(uniform);
        }
        for (idx, rate) in overrides {
            self.fields[idx].set_sample_rate(rate);
        }
        self.time_axes = OnceLock::new();
        debug!(
            "sample rates assigned: default {} Hz, {} overrides",
            config.default_rate,
            config.overrides.len()
        );
        Ok(())
    }

    /// Session length: last elapsed time plus one sample period of the `time` channel.
    pub fn duration(&self) -> Result<f64, TelemetryError> {
        let time = self.get(TIME_CHANNEL).ok_or_else(|| {
            TelemetryError::MissingPrerequisite(format!("`{}` channel", TIME_CHANNEL))
        })?;
        let rate = time.require_rate()?;
        let last = time
            .last_value()
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite())
            .ok_or_else(|| {
                TelemetryError::Import(format!("`{}` channel holds no numeric value", TIME_CHANNEL))
            })?;
        Ok(last + 1.0 / rate.current_rate() as f64)
    }

    /// One dense axis per distinct recording rate. Every channel needs a rate.
    pub fn derive_time_axes(&self) -> Result<TimeAxes, TelemetryError> {
        let mut rates = BTreeSet::new();
        for field in &self.fields {
            rates.insert(field.require_rate()?.current_rate());
        }
        let duration = self.duration()?;
        Ok(rates
            .into_iter()
            .map(|rate| (rate, TimeAxis::new(rate, duration)))
            .collect())
    }

    /// Cached [`Self::derive_time_axes`], rebuilt after each rate assignment.
    pub fn time_axes(&self) -> Result<&TimeAxes, TelemetryError> {
        if let Some(axes) = self.time_axes.get() {
            return Ok(axes);
        }
        let axes = self.derive_time_axes()?;
        Ok(self.time_axes.get_or_init(|| axes))
    }

    pub fn time_axis(&self, rate: u32) -> Result<&TimeAxis, TelemetryError> {
        self.time_axes()?.get(&rate).ok_or_else(|| {
            TelemetryError::InvalidParameter(format!("no channel is recorded at {} Hz", rate))
        })
    }

    /// Axis matching a channel's own recording rate.
    pub fn axis_for(&self, identifier: &str) -> Result<&TimeAxis, TelemetryError> {
        let rate = self.field(identifier)?.require_rate()?;
        self.time_axis(rate.current_rate())
    }

    /// Resolves two independently sampled channels at every position where either changes,
    /// in reference space.
    pub fn aligned_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<AlignedPair<'_>, TelemetryError> {
        let a = self.field(first)?;
        let b = self.field(second)?;
        let (rate_a, rate_b) = (a.require_rate()?, b.require_rate()?);
        if rate_a.default_rate() != rate_b.default_rate() {
            return Err(TelemetryError::InvalidParameter(format!(
                "`{}` and `{}` use different reference rates",
                first, second
            )));
        }
        let positions: BTreeSet<usize> = a
            .positions(IndexSpace::Default)?
            .into_iter()
            .chain(b.positions(IndexSpace::Default)?)
            .collect();
        let positions: Vec<usize> = positions.into_iter().collect();
        let mut pair = AlignedPair {
            first: Vec::with_capacity(positions.len()),
            second: Vec::with_capacity(positions.len()),
            positions,
        };
        for &position in &pair.positions {
            pair.first.push(a.lookup(position, IndexSpace::Default)?);
            pair.second.push(b.lookup(position, IndexSpace::Default)?);
        }
        Ok(pair)
    }
}
