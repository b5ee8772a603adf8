//! Session export import.
//!
//! Layout of an export, sections separated by blank lines:
//!
//! ```text
//! Format,PDR
//! Session date,2024-05-12
//!
//! Driver,Vehicle,Track
//! ,,
//! A. Driver,Corvette C7,Laguna Seca
//!
//! Time,Ground Speed,Gear,...
//! s,km/h,,...
//! 0.000,0.0,1,...
//! ...
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::field::decode_cells;
use crate::frame::{normalize_identifier, retain_positions, unique_identifier, TelemetryFrame};
use crate::{TelemetryError, Value};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%d/%m/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

/// Ordered `key, value` metadata from the top of the export.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionHeader {
    entries: Vec<(String, String)>,
}

impl SessionHeader {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Case-insensitive key lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.find(|k| k == key.trim().to_lowercase())
    }

    fn find(&self, pred: impl Fn(&str) -> bool) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| pred(&k.trim().to_lowercase()))
            .map(|(_, v)| v.trim())
    }

    /// Recording timestamp assembled from the first `*date*` entry and, if present, a
    /// separate `*time*` entry.
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        let date = self.find(|k| k.contains("date"))?;
        let combined = match self.find(|k| k.contains("time") && !k.contains("date")) {
            Some(time) => format!("{} {}", date, time),
            None => date.to_string(),
        };
        DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
            .or_else(|| {
                DATE_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
                    .and_then(|day| day.and_hms_opt(0, 0, 0))
            })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InfoField {
    pub title: String,
    pub unit: String,
    pub value: Option<Value>,
}

impl fmt::Display for InfoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {}{}", self.title, value, self.unit),
            None => write!(f, "{}: -", self.title),
        }
    }
}

/// Single-snapshot session facts (driver, vehicle, track, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InfoBlock {
    fields: Vec<(String, InfoField)>,
}

impl InfoBlock {
    pub fn new(
        titles: Vec<String>,
        units: Vec<String>,
        cells: &[String],
    ) -> Result<Self, TelemetryError> {
        let values: Vec<Option<Value>> = decode_cells(cells)?.into_iter().map(|(_, v)| v).collect();
        let normalized: Vec<String> = titles.iter().map(|t| normalize_identifier(t)).collect();
        let keep = |position: usize| normalized.get(position).map_or(true, |id| !id.is_empty());
        let titles = retain_positions(titles, &keep);
        let units = retain_positions(units, &keep);
        let values = retain_positions(values, &keep);
        if titles.len() != units.len() || titles.len() != values.len() {
            return Err(TelemetryError::SchemaMismatch {
                titles: titles.len(),
                units: units.len(),
                values: values.len(),
            });
        }

        let mut block = InfoBlock::default();
        for ((title, unit), value) in titles.into_iter().zip(units).zip(values) {
            let id = unique_identifier(&title, |id| block.get(id).is_some());
            block.fields.push((id, InfoField { title, unit, value }));
        }
        Ok(block)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&InfoField> {
        self.fields
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, field)| field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoField)> {
        self.fields.iter().map(|(id, field)| (id.as_str(), field))
    }
}

impl fmt::Display for InfoBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoBlock:")?;
        for (_, field) in &self.fields {
            write!(f, "\n\t{}", field)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Session {
    pub header: SessionHeader,
    pub info: InfoBlock,
    pub frame: TelemetryFrame,
}

fn read_records(lines: &[&str]) -> Result<Vec<Vec<String>>, TelemetryError> {
    let block = lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(block.as_bytes());
    let mut rows = Vec::with_capacity(lines.len());
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn split_sections(text: &str) -> Vec<Vec<&str>> {
    let mut sections = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

pub fn parse_session(text: &str) -> Result<Session, TelemetryError> {
    let sections = split_sections(text);
    if sections.len() < 3 {
        return Err(TelemetryError::Import(format!(
            "expected header, info and data sections, found {}",
            sections.len()
        )));
    }

    let mut header = SessionHeader::default();
    for (idx, row) in read_records(&sections[0])?.into_iter().enumerate() {
        match <[String; 2]>::try_from(row) {
            Ok([key, value]) => header.entries.push((key, value)),
            Err(row) => {
                return Err(TelemetryError::Import(format!(
                    "header row {} has {} fields, expected `key,value`",
                    idx + 1,
                    row.len()
                )))
            }
        }
    }

    let mut info_rows = read_records(&sections[1])?.into_iter();
    let info = match (info_rows.next(), info_rows.next(), info_rows.next(), info_rows.next()) {
        (Some(titles), Some(units), Some(values), None) => InfoBlock::new(titles, units, &values)?,
        _ => {
            return Err(TelemetryError::Import(
                "info section must be a titles, a units and a values row".into(),
            ))
        }
    };

    // Blank lines inside the channel matrix do not start a new section.
    let data_lines: Vec<&str> = sections[2..].iter().flatten().copied().collect();
    let mut rows = read_records(&data_lines)?.into_iter();
    let (titles, units) = match (rows.next(), rows.next()) {
        (Some(titles), Some(units)) => (titles, units),
        _ => {
            return Err(TelemetryError::Import(
                "channel section needs a titles and a units row".into(),
            ))
        }
    };
    let frame = TelemetryFrame::from_rows(titles, units, rows.collect())?;
    debug!(
        "session parsed: {} header entries, {} info fields, {} channels x {} rows",
        header.len(),
        info.len(),
        frame.len(),
        frame.row_count()
    );
    Ok(Session {
        header,
        info,
        frame,
    })
}

pub fn read_session(path: &Path) -> Result<Session, TelemetryError> {
    let text = fs::read_to_string(path)?;
    parse_session(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "Format,PDR\n\
Session date,2024-05-12\n\
Session time,14:05:30\n\
\n\
Driver,Vehicle,Track,Ambient,#\n\
,,,C,\n\
A. Driver,Corvette C7,\"Laguna Seca, Monterey\",21.5,7\n\
\n\
\n\
Time,Ground Speed,Gear,Sector Time,%\n\
s,km/h,,s,\n\
0.0,0.0,1,0,x\n\
0.5,12.5,1,0,x\n\
1.0,25.0,2,0,x\n\
1.5,31.0,2,41.2,x\n";

    #[test]
    fn test_parse_session_sections() {
        let session = parse_session(EXPORT).unwrap();
        assert_eq!(session.header.len(), 3);
        assert_eq!(session.header.get("format"), Some("PDR"));
        assert_eq!(
            session.header.recorded_at(),
            NaiveDate::from_ymd_opt(2024, 5, 12).and_then(|d| d.and_hms_opt(14, 5, 30))
        );

        assert_eq!(session.info.len(), 4);
        let track = session.info.get("track").unwrap();
        assert_eq!(track.value, Some(Value::from("Laguna Seca, Monterey")));
        let ambient = session.info.get("ambient").unwrap();
        assert_eq!(ambient.to_string(), "Ambient: 21.5C");

        let frame = &session.frame;
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.row_count(), 4);
        assert_eq!(frame.field("gear").unwrap().indices(), &[0, 2]);
        assert_eq!(frame.field("sector_time").unwrap().len(), 2);
    }

    #[test]
    fn test_info_continuation_recovery() {
        let block = InfoBlock::new(
            vec!["Track".into(), "Laps".into()],
            vec!["".into(), "".into()],
            &["Laguna Seca".into(), " Monterey".into(), "12".into()],
        )
        .unwrap();
        assert_eq!(
            block.get("track").unwrap().value,
            Some(Value::from("Laguna Seca, Monterey"))
        );
        assert_eq!(block.get("laps").unwrap().value, Some(Value::number(12.0)));
    }

    #[test]
    fn test_info_count_mismatch() {
        let err = InfoBlock::new(
            vec!["Track".into(), "Laps".into()],
            vec!["".into(), "".into()],
            &["Laguna Seca".into()],
        )
        .unwrap_err();
        assert!(matches!(err, TelemetryError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_header_rows_must_be_pairs() {
        let text = EXPORT.replacen("Format,PDR", "Format,PDR,extra", 1);
        assert!(matches!(parse_session(&text), Err(TelemetryError::Import(_))));
    }

    #[test]
    fn test_missing_sections() {
        assert!(parse_session("Format,PDR\n\nA\n\n").is_err());
        let no_units = "k,v\n\nA\n\n1\n\nTime\n";
        assert!(parse_session(no_units).is_err());
    }

    #[test]
    fn test_asymmetric_data_row() {
        let text = format!("{}2.0,40.0,3\n", EXPORT);
        assert!(matches!(
            parse_session(&text),
            Err(TelemetryError::SchemaMismatch { values: 3, .. })
        ));
    }

    #[test]
    fn test_recorded_at_date_only() {
        let header = SessionHeader {
            entries: vec![("Date".into(), "12/05/2024".into())],
        };
        assert_eq!(
            header.recorded_at(),
            NaiveDate::from_ymd_opt(2024, 5, 12).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
    }
}
