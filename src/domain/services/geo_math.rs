//! Geo Math
//!
//! Pure distance logic for nearby-point search. No external dependencies.

use std::f64::consts::PI;

/// Mean earth radius used by the Haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Linear degree-to-km ratio of the coarse window. Not corrected for
/// latitude.
pub const KM_PER_DEGREE: f64 = 111.0;

pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

/// Great-circle distance in km between two (lat, lon) pairs in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = degrees_to_radians(lat2 - lat1);
    let d_lon = degrees_to_radians(lon2 - lon1);

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + degrees_to_radians(lat1).cos()
            * degrees_to_radians(lat2).cos()
            * (d_lon / 2.0).sin()
            * (d_lon / 2.0).sin();

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Square degree window used to bound the candidate set before the exact
/// distance check.
///
/// The window may over-select (corners of the square) and, away from the
/// equator, under-select along the longitude axis. Callers must re-check the
/// true distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarseWindow {
    pub center_lng: f64,
    pub center_lat: f64,
    /// Half side of the square, in degrees
    pub delta_deg: f64,
}

impl CoarseWindow {
    pub fn around(lng: f64, lat: f64, radius_km: f64) -> Self {
        Self {
            center_lng: lng,
            center_lat: lat,
            delta_deg: radius_km / KM_PER_DEGREE,
        }
    }

    /// Strict containment, matching `ABS(lng - x) < delta AND ABS(lat - y) < delta`.
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        (lng - self.center_lng).abs() < self.delta_deg
            && (lat - self.center_lat).abs() < self.delta_deg
    }
}
