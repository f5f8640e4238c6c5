//! Reprojection of ingested tract geometry to longitude/latitude.
//!
//! TIGER/Line tracts ship in NAD83 (EPSG:4269); at map scale NAD83 and WGS84
//! differ by well under a meter, so both pass through unchanged.

use geo::{MapCoords, MultiPolygon};
use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const EARTH_RADIUS: f64 = 6_378_137.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrsError {
    #[error("unrecognized CRS {0:?}, expected EPSG:<code>")]
    Malformed(String),
    #[error("unsupported CRS EPSG:{0}")]
    Unsupported(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Crs {
    /// EPSG:4326
    Wgs84,
    /// EPSG:4269
    #[default]
    Nad83,
    /// EPSG:3857
    WebMercator,
}

impl Crs {
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Nad83 => 4269,
            Crs::WebMercator => 3857,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84 | Crs::Nad83)
    }

    /// Converts one coordinate to (lon, lat) degrees.
    pub fn to_lon_lat(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 | Crs::Nad83 => (x, y),
            Crs::WebMercator => {
                let lon = (x / EARTH_RADIUS).to_degrees();
                let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
                (lon, lat)
            }
        }
    }

    pub fn reproject(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if self.is_geographic() {
            return geometry.clone();
        }
        geometry.map_coords(|c| {
            let (x, y) = self.to_lon_lat(c.x, c.y);
            geo::Coord { x, y }
        })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s
            .trim()
            .to_ascii_uppercase()
            .strip_prefix("EPSG:")
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| CrsError::Malformed(s.to_string()))?;
        match code {
            4326 => Ok(Crs::Wgs84),
            4269 => Ok(Crs::Nad83),
            3857 | 900913 => Ok(Crs::WebMercator),
            other => Err(CrsError::Unsupported(other)),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{} vs {}", a, b);
    }

    #[test]
    fn parses_epsg_codes() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("epsg:4269".parse::<Crs>().unwrap(), Crs::Nad83);
        assert_eq!("EPSG:3857".parse::<Crs>().unwrap(), Crs::WebMercator);
        assert_eq!("EPSG:32610".parse::<Crs>(), Err(CrsError::Unsupported(32610)));
        assert!(matches!("WGS84".parse::<Crs>(), Err(CrsError::Malformed(_))));
        assert_eq!(Crs::default(), Crs::Nad83);
    }

    #[test]
    fn web_mercator_inverse() {
        let (lon, lat) = Crs::WebMercator.to_lon_lat(0.0, 0.0);
        assert_close(lon, 0.0, 1e-12);
        assert_close(lat, 0.0, 1e-12);

        // Seattle, roughly
        let (lon, lat) = Crs::WebMercator.to_lon_lat(-13_617_760.0, 6_042_462.0);
        assert_close(lon, -122.33, 0.01);
        assert_close(lat, 47.61, 0.01);
    }

    #[test]
    fn geographic_input_is_unchanged() {
        let mp = MultiPolygon::new(vec![polygon![
            (x: -122.0, y: 47.0),
            (x: -121.0, y: 47.0),
            (x: -121.0, y: 48.0),
            (x: -122.0, y: 47.0),
        ]]);
        assert_eq!(Crs::Nad83.reproject(&mp), mp);
    }
}
