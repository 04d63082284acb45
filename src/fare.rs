//! Straight-line fare estimation.
//!
//! `fare = base + distance_km * per_km + minutes * per_minute`, where the trip
//! time is synthesised as two minutes per kilometre. Pure and deterministic, so a
//! historical estimate can always be reproduced from its coordinates.

use crate::ride::{Coordinate, Fare};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distance.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Synthetic travel time per kilometre.
pub const MINUTES_PER_KM: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FarePolicy {
    pub base: f64,
    pub per_km: f64,
    pub per_minute: f64,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            base: 2.50,
            per_km: 1.50,
            per_minute: 0.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub fare: Fare,
}

impl FarePolicy {
    pub fn estimate(&self, pickup: &Coordinate, destination: &Coordinate) -> FareEstimate {
        let distance_km = haversine_km(pickup, destination);
        let duration_minutes = distance_km * MINUTES_PER_KM;
        let raw = self.base + distance_km * self.per_km + duration_minutes * self.per_minute;

        FareEstimate {
            distance_km,
            duration_minutes,
            fare: Fare::from_amount(raw),
        }
    }
}

/// Great-circle distance between two points.
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    // rounding can push h just past 1 for near-antipodal points
    let h = (sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon).clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}
