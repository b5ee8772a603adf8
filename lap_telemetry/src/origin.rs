//! Origin calibration from two surveyed reference points.
//!
//! Each reference point is known both in the local track frame (`x`, `y` meters) and on the
//! globe. Back-projecting a point's offset from its own geodetic position yields the origin
//! that would reproduce the measurement exactly; the two candidates normally disagree by a
//! few meters, and that disagreement is reported as the calibration error.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geo::{
    cartesian_distance, gps_distance, unproject_from_plane, Coordinates, LocalFrame, Origin,
};
use crate::TelemetryError;

/// Discrepancy above which calibration logs a warning.
const CALIBRATION_WARN_M: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub x: f64,
    pub y: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl ReferencePoint {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            x: self.x,
            y: self.y,
            z: 0.0,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    fn is_complete(&self) -> bool {
        [self.x, self.y, self.latitude, self.longitude]
            .iter()
            .all(|v| v.is_finite())
    }

    /// The origin from which projecting this point gives back its `(x, y)` measurement.
    pub fn candidate_origin(&self, altitude_m: f64) -> Origin {
        // Solve y for the origin latitude first: the x term depends on cos(origin latitude).
        let (latitude, _) =
            unproject_from_plane(0.0, -self.y, &Origin::new(self.latitude, 0.0), altitude_m);
        let (_, longitude) =
            unproject_from_plane(-self.x, 0.0, &Origin::new(latitude, self.longitude), altitude_m);
        Origin::new(latitude, longitude)
    }
}

/// Which candidate origin calibration keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginPolicy {
    First,
    #[default]
    Second,
    Midpoint,
}

impl OriginPolicy {
    fn select(self, candidates: &[Origin; 2]) -> Origin {
        match self {
            OriginPolicy::First => candidates[0],
            OriginPolicy::Second => candidates[1],
            OriginPolicy::Midpoint => Origin::new(
                (candidates[0].latitude + candidates[1].latitude) / 2.0,
                (candidates[0].longitude + candidates[1].longitude) / 2.0,
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub candidates: [Origin; 2],
    /// Great-circle distance between the two candidates, in meters.
    pub discrepancy_m: f64,
    pub policy: OriginPolicy,
    pub origin: Origin,
    pub altitude_m: f64,
}

impl Calibration {
    pub fn frame(&self) -> LocalFrame {
        LocalFrame::with_altitude(self.origin, self.altitude_m)
    }

    /// Same candidates, different selection.
    pub fn with_policy(&self, policy: OriginPolicy) -> Calibration {
        Calibration {
            policy,
            origin: policy.select(&self.candidates),
            ..self.clone()
        }
    }
}

/// Derives the track origin from the first two reference points.
pub fn calibrate(
    points: &[ReferencePoint],
    policy: OriginPolicy,
    altitude_m: f64,
) -> Result<Calibration, TelemetryError> {
    if points.len() < 2 {
        return Err(TelemetryError::Import(format!(
            "calibration needs two reference points, got {}",
            points.len()
        )));
    }
    if points.len() > 2 {
        debug!("ignoring {} extra reference points", points.len() - 2);
    }
    for (idx, point) in points.iter().take(2).enumerate() {
        if !point.is_complete() {
            return Err(TelemetryError::Import(format!(
                "reference point {} lacks Cartesian or geodetic components",
                idx + 1
            )));
        }
    }
    let candidates = [
        points[0].candidate_origin(altitude_m),
        points[1].candidate_origin(altitude_m),
    ];
    let discrepancy_m = gps_distance(
        &candidates[0].coordinates(),
        &candidates[1].coordinates(),
        altitude_m,
    );
    let origin = policy.select(&candidates);
    info!(
        "Origin calibrated at ({:.7}, {:.7}), candidate discrepancy {:.3} m",
        origin.latitude, origin.longitude, discrepancy_m
    );
    if discrepancy_m > CALIBRATION_WARN_M {
        warn!(
            "Reference points disagree by {:.3} m; origin kept with {:?} policy",
            discrepancy_m, policy
        );
    }
    Ok(Calibration {
        candidates,
        discrepancy_m,
        policy,
        origin,
        altitude_m,
    })
}

/// Absolute difference between the surveyed and great-circle distances of the two
/// reference points, in meters.
pub fn validate_reference(
    points: &[ReferencePoint],
    altitude_m: f64,
) -> Result<f64, TelemetryError> {
    let [p1, p2] = match points {
        [a, b, ..] => [a.coordinates(), b.coordinates()],
        _ => {
            return Err(TelemetryError::Import(
                "validation needs two reference points".into(),
            ))
        }
    };
    Ok((cartesian_distance(&p1, &p2) - gps_distance(&p1, &p2, altitude_m)).abs())
}

/// Parses a latitude or longitude: `36.583778°N`, `-121.758089`, `36°35'1.6"N`, `36 35 1.6 N`.
pub fn parse_angle(text: &str) -> Result<f64, TelemetryError> {
    let invalid = || TelemetryError::Import(format!("invalid angle `{}`", text));
    let mut body = text.trim();
    let mut sign = 1.0;

    let hemisphere = body
        .chars()
        .last()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| (c, true))
        .or_else(|| {
            body.chars()
                .next()
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| (c, false))
        });
    if let Some((letter, trailing)) = hemisphere {
        match letter.to_ascii_uppercase() {
            'N' | 'E' => {}
            'S' | 'W' => sign = -1.0,
            _ => return Err(invalid()),
        }
        body = if trailing {
            &body[..body.len() - letter.len_utf8()]
        } else {
            &body[letter.len_utf8()..]
        };
    }

    let parts: Vec<&str> = body
        .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }
    let mut numbers = Vec::with_capacity(parts.len());
    for part in &parts {
        numbers.push(part.parse::<f64>().map_err(|_| invalid())?);
    }
    if numbers[0] < 0.0 {
        sign = -sign;
        numbers[0] = -numbers[0];
    }
    if numbers[1..].iter().any(|v| *v < 0.0 || *v >= 60.0) {
        return Err(invalid());
    }
    let magnitude = numbers
        .iter()
        .zip([1.0, 60.0, 3600.0])
        .map(|(value, scale)| value / scale)
        .sum::<f64>();
    Ok(sign * magnitude)
}

/// Parses a reference-points file: a header line, then two `x y latitude longitude` lines.
pub fn parse_reference_points(text: &str) -> Result<Vec<ReferencePoint>, TelemetryError> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    if lines.next().is_none() {
        return Err(TelemetryError::Import("reference file is empty".into()));
    }
    let mut points = Vec::with_capacity(2);
    for (idx, line) in lines.enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 4 {
            return Err(TelemetryError::Import(format!(
                "reference line {}: expected `x y latitude longitude`, got {} tokens",
                idx + 2,
                tokens.len()
            )));
        }
        let coordinate = |token: &str| {
            token.parse::<f64>().map_err(|_| {
                TelemetryError::Import(format!(
                    "reference line {}: invalid number `{}`",
                    idx + 2,
                    token
                ))
            })
        };
        points.push(ReferencePoint {
            x: coordinate(tokens[0])?,
            y: coordinate(tokens[1])?,
            latitude: parse_angle(tokens[2])?,
            longitude: parse_angle(tokens[3])?,
        });
    }
    if points.len() != 2 {
        return Err(TelemetryError::Import(format!(
            "expected exactly two reference points, found {}",
            points.len()
        )));
    }
    Ok(points)
}

pub fn read_reference_points(path: &Path) -> Result<Vec<ReferencePoint>, TelemetryError> {
    let text = fs::read_to_string(path)?;
    parse_reference_points(&text)
}
