//! Great-circle geometry for warehouse selection.

use serde::{Deserialize, Serialize};

use stockflow_core::{EngineError, EngineResult, ValueObject};

/// Mean Earth radius used by the Haversine formula, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Two distances closer than this are treated as equal when ranking warehouses.
pub const DISTANCE_EPSILON_KM: f64 = 1e-6;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl ValueObject for GeoPoint {}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> EngineResult<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(EngineError::invalid(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(EngineError::invalid(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Haversine distance to `other` in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine great-circle distance between two decimal-degree coordinates, in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points.
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Compare two distances with [`DISTANCE_EPSILON_KM`] tolerance.
pub fn compare_distance(a: f64, b: f64) -> core::cmp::Ordering {
    if (a - b).abs() < DISTANCE_EPSILON_KM {
        core::cmp::Ordering::Equal
    } else if a < b {
        core::cmp::Ordering::Less
    } else {
        core::cmp::Ordering::Greater
    }
}
