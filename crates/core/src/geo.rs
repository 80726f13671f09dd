//! Geographic primitives: coordinates, great-circle distance and geocells.
//!
//! Geocells are a coarse spatial index used only to pick relay subscription
//! filters. Authoritative distance checks always use [`GeoPoint::haversine_km`].

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Cells per degree. 10 gives 0.1° cells (about 11 km at the equator).
pub const GEOCELL_SCALE: f64 = 10.0;

const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a coordinate, rejecting out-of-range or non-finite values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, Error> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::Validation(format!(
                "latitude {} out of range",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::Validation(format!(
                "longitude {} out of range",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance in kilometres using the haversine formula.
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }

    /// Point displaced by the given kilometres north and east.
    ///
    /// Uses a local flat-earth approximation, accurate for city-scale offsets.
    pub fn offset_km(&self, north_km: f64, east_km: f64) -> GeoPoint {
        let latitude = (self.latitude + north_km / KM_PER_DEGREE).clamp(-90.0, 90.0);
        let cos_lat = self.latitude.to_radians().cos().max(1e-9);
        let mut longitude = self.longitude + east_km / (KM_PER_DEGREE * cos_lat);
        if longitude > 180.0 {
            longitude -= 360.0;
        } else if longitude < -180.0 {
            longitude += 360.0;
        }
        GeoPoint {
            latitude,
            longitude,
        }
    }

    /// The geocell containing this point.
    pub fn geocell(&self) -> GeoCell {
        GeoCell::from_point(self)
    }
}

/// Fixed-precision spatial bucket derived by flooring scaled coordinates.
///
/// Flooring (rather than truncating toward zero) keeps every cell the same
/// size on both sides of the equator and the prime meridian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoCell {
    pub lat_index: i32,
    pub lon_index: i32,
}

const LAT_INDEX_MIN: i32 = -90 * GEOCELL_SCALE as i32;
const LAT_INDEX_MAX: i32 = 90 * GEOCELL_SCALE as i32 - 1;
const LON_INDEX_MIN: i32 = -180 * GEOCELL_SCALE as i32;
const LON_SPAN: i32 = 360 * GEOCELL_SCALE as i32;

impl GeoCell {
    pub fn from_point(point: &GeoPoint) -> Self {
        let lat_index = ((point.latitude * GEOCELL_SCALE).floor() as i32)
            .clamp(LAT_INDEX_MIN, LAT_INDEX_MAX);
        let lon_index = wrap_lon_index((point.longitude * GEOCELL_SCALE).floor() as i32);
        Self {
            lat_index,
            lon_index,
        }
    }

    /// This cell and its eight neighbours, deduplicated.
    ///
    /// Longitude wraps at the antimeridian; rows beyond the poles are skipped.
    pub fn with_neighbors(&self) -> Vec<GeoCell> {
        let mut cells = Vec::with_capacity(9);
        for d_lat in -1..=1 {
            let lat_index = self.lat_index + d_lat;
            if !(LAT_INDEX_MIN..=LAT_INDEX_MAX).contains(&lat_index) {
                continue;
            }
            for d_lon in -1..=1 {
                let cell = GeoCell {
                    lat_index,
                    lon_index: wrap_lon_index(self.lon_index + d_lon),
                };
                if !cells.contains(&cell) {
                    cells.push(cell);
                }
            }
        }
        cells
    }

    /// Tag value used on relay events, e.g. `-236:-467`.
    pub fn tag_value(&self) -> String {
        self.to_string()
    }
}

fn wrap_lon_index(index: i32) -> i32 {
    (index - LON_INDEX_MIN).rem_euclid(LON_SPAN) + LON_INDEX_MIN
}

impl fmt::Display for GeoCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lat_index, self.lon_index)
    }
}

impl FromStr for GeoCell {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(':')
            .ok_or_else(|| Error::Validation(format!("malformed geocell '{}'", s)))?;
        let lat_index = lat
            .parse::<i32>()
            .map_err(|_| Error::Validation(format!("malformed geocell '{}'", s)))?;
        let lon_index = lon
            .parse::<i32>()
            .map_err(|_| Error::Validation(format!("malformed geocell '{}'", s)))?;
        Ok(Self {
            lat_index,
            lon_index,
        })
    }
}
