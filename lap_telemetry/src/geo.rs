// Coordinate math for the track frame: great-circle distances and the small-angle
// equirectangular projection around a surveyed origin. The track is treated as planar,
// so `z` only takes part in Cartesian distances.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Elevation of the reference circuit, used when no altitude is supplied.
pub const DEFAULT_ALTITUDE_M: f64 = 254.0;

/// Earth radius corrected for the altitude above mean sea level.
pub fn earth_radius(altitude_m: f64) -> f64 {
    EARTH_RADIUS_M + altitude_m
}

/// A point carrying Cartesian components (meters, relative to an origin) and/or geodetic
/// components (degrees). Nothing keeps the two in sync; project or unproject after
/// changing one of them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn cartesian(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    pub fn geodetic(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }
}

/// Geodetic zero of the local track frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub latitude: f64,
    pub longitude: f64,
}

impl Origin {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// The origin as a point: Cartesian components are the frame's zero.
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::geodetic(self.latitude, self.longitude)
    }
}

pub fn cartesian_distance(p1: &Coordinates, p2: &Coordinates) -> f64 {
    ((p1.x - p2.x).powi(2) + (p1.y - p2.y).powi(2) + (p1.z - p2.z).powi(2)).sqrt()
}

/// Haversine distance in meters between the geodetic components of two points.
pub fn gps_distance(p1: &Coordinates, p2: &Coordinates, altitude_m: f64) -> f64 {
    let r = earth_radius(altitude_m);
    let dlat = (p1.latitude - p2.latitude).to_radians();
    let dlon = (p1.longitude - p2.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + p1.latitude.to_radians().cos()
            * p2.latitude.to_radians().cos()
            * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMethod {
    Cartesian,
    Gps,
}

/// Horizontal and vertical separation of two points, one axis at a time.
pub fn dx_dy(
    p1: &Coordinates,
    p2: &Coordinates,
    method: DistanceMethod,
    altitude_m: f64,
) -> (f64, f64) {
    let p1x = Coordinates {
        x: p1.x,
        longitude: p1.longitude,
        ..Coordinates::default()
    };
    let p1y = Coordinates {
        y: p1.y,
        latitude: p1.latitude,
        ..Coordinates::default()
    };
    let p2x = Coordinates {
        x: p2.x,
        longitude: p2.longitude,
        ..Coordinates::default()
    };
    let p2y = Coordinates {
        y: p2.y,
        latitude: p2.latitude,
        ..Coordinates::default()
    };
    match method {
        DistanceMethod::Cartesian => (
            cartesian_distance(&p1x, &p2x),
            cartesian_distance(&p1y, &p2y),
        ),
        DistanceMethod::Gps => (
            gps_distance(&p1x, &p2x, altitude_m),
            gps_distance(&p1y, &p2y, altitude_m),
        ),
    }
}

/// Forward projection of `(latitude, longitude)` to `(x, y)` meters around `origin`.
///
/// Only valid within a few kilometers of the origin; the error grows with distance and with
/// the latitude gap between the point and the origin.
pub fn project_to_plane(
    latitude: f64,
    longitude: f64,
    origin: &Origin,
    altitude_m: f64,
) -> (f64, f64) {
    let r = earth_radius(altitude_m);
    let x = r * (longitude - origin.longitude).to_radians() * origin.latitude.to_radians().cos();
    let y = r * (latitude - origin.latitude).to_radians();
    (x, y)
}

/// Exact inverse of [`project_to_plane`]: `(x, y)` meters back to `(latitude, longitude)`.
pub fn unproject_from_plane(x: f64, y: f64, origin: &Origin, altitude_m: f64) -> (f64, f64) {
    let r = earth_radius(altitude_m);
    let latitude = origin.latitude + (y / r).to_degrees();
    let longitude = origin.longitude + (x / (r * origin.latitude.to_radians().cos())).to_degrees();
    (latitude, longitude)
}

/// A calibrated track frame: the origin plus the altitude used for the Earth radius.
///
/// Passed explicitly to everything that projects, so sessions with different origins can
/// coexist.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    pub origin: Origin,
    pub altitude_m: f64,
}

impl LocalFrame {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            altitude_m: DEFAULT_ALTITUDE_M,
        }
    }

    pub fn with_altitude(origin: Origin, altitude_m: f64) -> Self {
        Self { origin, altitude_m }
    }

    /// Copy of `point` with `x`/`y` recomputed from its geodetic components.
    pub fn project(&self, point: &Coordinates) -> Coordinates {
        let (x, y) =
            project_to_plane(point.latitude, point.longitude, &self.origin, self.altitude_m);
        Coordinates { x, y, ..*point }
    }

    /// Copy of `point` with latitude/longitude recomputed from its Cartesian components.
    pub fn unproject(&self, point: &Coordinates) -> Coordinates {
        let (latitude, longitude) =
            unproject_from_plane(point.x, point.y, &self.origin, self.altitude_m);
        Coordinates {
            latitude,
            longitude,
            ..*point
        }
    }

    pub fn gps_distance(&self, p1: &Coordinates, p2: &Coordinates) -> f64 {
        gps_distance(p1, p2, self.altitude_m)
    }

    /// Projects parallel latitude/longitude series, e.g. two GPS channels sampled on one axis.
    pub fn project_track(&self, latitudes: &[f64], longitudes: &[f64]) -> Vec<(f64, f64)> {
        latitudes
            .iter()
            .zip(longitudes.iter())
            .map(|(&lat, &lon)| project_to_plane(lat, lon, &self.origin, self.altitude_m))
            .collect()
    }
}
