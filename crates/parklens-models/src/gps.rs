//! GPS coordinates and synthesized telemetry.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Offset (in degrees, applied to both axes) used to derive an end
/// coordinate when the caller only supplies a start coordinate.
pub const DEFAULT_END_OFFSET_DEG: f64 = 0.005;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GpsPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GpsPoint {
    /// Create a validated point.
    pub fn new(lat: f64, lon: f64) -> ModelResult<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(ModelError::invalid_coordinates("coordinates must be finite numbers"));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ModelError::invalid_coordinates(format!(
                "latitude {} out of range [-90, 90]",
                lat
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ModelError::invalid_coordinates(format!(
                "longitude {} out of range [-180, 180]",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Shift both axes by `delta` degrees.
    ///
    /// Used to derive the end of the travel segment from its start. Latitude
    /// is clamped at the poles and longitude wraps across the antimeridian,
    /// so the result always parses back.
    pub fn offset(&self, delta: f64) -> Self {
        Self {
            lat: (self.lat + delta).clamp(-90.0, 90.0),
            lon: wrap_longitude(self.lon + delta),
        }
    }

    /// Linear interpolation towards `other`, `t` in `[0, 1]`.
    pub fn lerp(&self, other: &GpsPoint, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

impl FromStr for GpsPoint {
    type Err = ModelError;

    /// Parse `"<lat>,<lon>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ModelError::invalid_coordinates("empty coordinate string"));
        }

        let mut parts = s.split(',');
        let (lat, lon) = match (parts.next(), parts.next(), parts.next()) {
            (Some(lat), Some(lon), None) => (lat.trim(), lon.trim()),
            _ => {
                return Err(ModelError::invalid_coordinates(format!(
                    "expected 'lat,lon', got '{}'",
                    s
                )))
            }
        };

        let lat: f64 = lat
            .parse()
            .map_err(|_| ModelError::invalid_coordinates(format!("invalid latitude '{}'", lat)))?;
        let lon: f64 = lon
            .parse()
            .map_err(|_| ModelError::invalid_coordinates(format!("invalid longitude '{}'", lon)))?;

        Self::new(lat, lon)
    }
}

impl fmt::Display for GpsPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

/// Build a per-second GPS telemetry log for a video of `duration_secs`,
/// interpolating linearly from `start` to `end`.
///
/// The log is appended to the inference prompt so detections can be
/// georeferenced by timestamp.
pub fn generate_telemetry(duration_secs: f64, start: &GpsPoint, end: &GpsPoint) -> String {
    let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
        duration_secs
    } else {
        0.0
    };

    let mut telemetry = String::from("Timestamp (sec), Latitude, Longitude\n");
    let steps = duration as u64 + 1;
    let denom = duration.max(1.0);

    for i in 0..steps {
        let point = start.lerp(end, i as f64 / denom);
        telemetry.push_str(&format!("{}, {:.6}, {:.6}\n", i, point.lat, point.lon));
    }

    telemetry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gps_point() {
        let p: GpsPoint = "37.0,-122.0".parse().unwrap();
        assert_eq!(p, GpsPoint { lat: 37.0, lon: -122.0 });

        let p: GpsPoint = " 37.7749 , -122.4194 ".parse().unwrap();
        assert!((p.lat - 37.7749).abs() < 1e-9);
        assert!((p.lon + 122.4194).abs() < 1e-9);
    }

    #[test]
    fn test_parse_gps_point_rejects_malformed() {
        for bad in ["", "37.0", "37.0,", "a,b", "1,2,3", "91,0", "0,181", "NaN,0", "inf,0"] {
            assert!(bad.parse::<GpsPoint>().is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_offset_and_display() {
        let start: GpsPoint = "37.0,-122.0".parse().unwrap();
        let end = start.offset(DEFAULT_END_OFFSET_DEG);
        assert!((end.lat - 37.005).abs() < 1e-9);
        assert!((end.lon + 121.995).abs() < 1e-9);
        assert_eq!(start.to_string(), "37,-122");
        assert_eq!(start.to_string().parse::<GpsPoint>().unwrap(), start);
    }

    #[test]
    fn test_offset_stays_in_range() {
        let near_pole = GpsPoint::new(89.998, 10.0).unwrap().offset(DEFAULT_END_OFFSET_DEG);
        assert_eq!(near_pole.lat, 90.0);
        assert!(near_pole.to_string().parse::<GpsPoint>().is_ok());

        let near_south_pole = GpsPoint::new(-89.999, 0.0).unwrap().offset(-0.005);
        assert_eq!(near_south_pole.lat, -90.0);

        let near_antimeridian = GpsPoint::new(10.0, 179.999).unwrap().offset(DEFAULT_END_OFFSET_DEG);
        assert!((near_antimeridian.lon + 179.996).abs() < 1e-9);
        assert!(near_antimeridian.to_string().parse::<GpsPoint>().is_ok());

        let west = GpsPoint::new(0.0, -179.999).unwrap().offset(-0.005);
        assert!((west.lon - 179.996).abs() < 1e-9);
    }

    #[test]
    fn test_generate_telemetry() {
        let start = GpsPoint::new(10.0, 20.0).unwrap();
        let end = GpsPoint::new(11.0, 22.0).unwrap();
        let log = generate_telemetry(2.0, &start, &end);
        let lines: Vec<&str> = log.lines().collect();

        assert_eq!(lines[0], "Timestamp (sec), Latitude, Longitude");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "0, 10.000000, 20.000000");
        assert_eq!(lines[2], "1, 10.500000, 21.000000");
        assert_eq!(lines[3], "2, 11.000000, 22.000000");
    }

    #[test]
    fn test_generate_telemetry_short_video() {
        let start = GpsPoint::new(1.0, 1.0).unwrap();
        let end = GpsPoint::new(2.0, 2.0).unwrap();
        let log = generate_telemetry(0.4, &start, &end);
        assert_eq!(log.lines().count(), 2);
        assert!(log.ends_with("0, 1.000000, 1.000000\n"));
    }
}
