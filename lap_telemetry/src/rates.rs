// Sample-rate configuration:
//
//     Channels|Default:30
//     Tire Temp Inner FL|5
//     GPS Latitude|10

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::TelemetryError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRateConfig {
    pub default_label: String,
    pub default_rate: u32,
    /// `(display title, recording rate)` per channel that differs from the default.
    pub overrides: Vec<(String, u32)>,
}

fn parse_rate(token: &str, line: usize) -> Result<u32, TelemetryError> {
    match token.trim().parse::<u32>() {
        Ok(rate) if rate > 0 => Ok(rate),
        _ => Err(TelemetryError::Import(format!(
            "rate config line {}: invalid rate `{}`",
            line,
            token.trim()
        ))),
    }
}

impl SampleRateConfig {
    pub fn parse(text: &str) -> Result<Self, TelemetryError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (first_no, first) = lines
            .next()
            .ok_or_else(|| TelemetryError::Import("rate config is empty".into()))?;
        let (_, default_part) = first.split_once('|').ok_or_else(|| {
            TelemetryError::Import(format!(
                "rate config line {}: expected `<label>|<default label>:<rate>`",
                first_no
            ))
        })?;
        let (default_label, default_rate) = default_part.rsplit_once(':').ok_or_else(|| {
            TelemetryError::Import(format!(
                "rate config line {}: default rate needs a `label:rate` pair",
                first_no
            ))
        })?;
        let default_rate = parse_rate(default_rate, first_no)?;

        let mut overrides = Vec::new();
        for (line_no, line) in lines {
            // Titles may contain `|`; the rate is always after the last one.
            let (title, rate) = line.rsplit_once('|').ok_or_else(|| {
                TelemetryError::Import(format!(
                    "rate config line {}: expected `<channel title>|<rate>`",
                    line_no
                ))
            })?;
            overrides.push((title.trim().to_string(), parse_rate(rate, line_no)?));
        }

        Ok(Self {
            default_label: default_label.trim().to_string(),
            default_rate,
            overrides,
        })
    }

    pub fn read(path: &Path) -> Result<Self, TelemetryError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Rate declared for a display title, falling back to the default.
    pub fn rate_for(&self, title: &str) -> u32 {
        self.overrides
            .iter()
            .rev()
            .find(|(declared, _)| declared == title)
            .map_or(self.default_rate, |(_, rate)| *rate)
    }
}
