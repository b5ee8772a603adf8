//! Sector event extraction.
//!
//! A marker channel (e.g. the last completed sector time) changes value exactly when an event
//! happens. Every change point after the first stored value is an event; companions are
//! resolved at the same reference position through their own rates.

use serde::Serialize;

use crate::field::{IndexSpace, TimeSeriesField};
use crate::frame::{TelemetryFrame, TIME_CHANNEL};
use crate::{TelemetryError, Value};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SectorEvent {
    /// Event position in the session's reference space.
    pub reference_position: usize,
    /// Elapsed session time at the event.
    pub time: Option<f64>,
    /// One entry per companion channel, in request order.
    pub companions: Vec<Option<Value>>,
    pub marker: Value,
}

pub struct SectorExtractor<'a> {
    marker: &'a TimeSeriesField,
    time: &'a TimeSeriesField,
    companions: Vec<&'a TimeSeriesField>,
}

impl<'a> SectorExtractor<'a> {
    pub fn new(
        frame: &'a TelemetryFrame,
        marker: &str,
        companions: &[&str],
    ) -> Result<Self, TelemetryError> {
        let companions = companions
            .iter()
            .map(|id| frame.field(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            marker: frame.field(marker)?,
            time: frame.field(TIME_CHANNEL)?,
            companions,
        })
    }

    pub fn events(&self) -> Result<Vec<SectorEvent>, TelemetryError> {
        let rate = self.marker.require_rate()?;
        let mut events = Vec::with_capacity(self.marker.len().saturating_sub(1));
        for (&index, value) in self
            .marker
            .indices()
            .iter()
            .zip(self.marker.values())
            .skip(1)
        {
            let position = rate.to_default(index);
            let time = self
                .time
                .lookup(position, IndexSpace::Default)?
                .and_then(Value::as_f64);
            let companions = self
                .companions
                .iter()
                .map(|field| -> Result<Option<Value>, TelemetryError> {
                    Ok(field.lookup(position, IndexSpace::Default)?.cloned())
                })
                .collect::<Result<Vec<_>, _>>()?;
            events.push(SectorEvent {
                reference_position: position,
                time,
                companions,
                marker: value.clone(),
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::SampleRateConfig;

    fn lap_frame() -> TelemetryFrame {
        let rows = 20;
        let time: Vec<String> = (0..rows).map(|i| format!("{}", i as f64 / 10.0)).collect();
        let distance: Vec<String> = (0..rows).map(|i| format!("{}", i as f64 / 20.0)).collect();
        // 5 Hz marker: samples in the first 10 rows, sector completions at its samples 3 and 7
        let marker: Vec<String> = (0..rows)
            .map(|i| match i {
                0..=2 => "0".to_string(),
                3..=6 => "31.4".to_string(),
                7..=9 => "28.9".to_string(),
                _ => String::new(),
            })
            .collect();
        let flat: Vec<String> = vec!["1".to_string(); rows];
        let mut frame = TelemetryFrame::from_columns(
            vec!["Time".into(), "Lap Distance".into(), "Sector Time".into(), "Lap".into()],
            vec!["s".into(), "".into(), "s".into(), "".into()],
            vec![time, distance, marker, flat],
        )
        .unwrap();
        let config = SampleRateConfig {
            default_label: "Default".into(),
            default_rate: 10,
            overrides: vec![("Sector Time".into(), 5)],
        };
        frame.assign_sample_rates(&config).unwrap();
        frame
    }

    #[test]
    fn test_sector_events() {
        let frame = lap_frame();
        let events = SectorExtractor::new(&frame, "sector_time", &["lap_distance"])
            .unwrap()
            .events()
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].reference_position, 6);
        assert_eq!(events[0].marker, Value::number(31.4));
        assert!((events[0].time.unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(events[0].companions, vec![Some(Value::number(0.3))]);
        assert_eq!(events[1].reference_position, 14);
        assert!((events[1].time.unwrap() - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_constant_marker_has_no_events() {
        let frame = lap_frame();
        let events = SectorExtractor::new(&frame, "lap", &[]).unwrap().events().unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_unknown_companion() {
        let frame = lap_frame();
        assert!(matches!(
            SectorExtractor::new(&frame, "sector_time", &["rpm"]),
            Err(TelemetryError::UnknownChannel(_))
        ));
    }
}
