// src/waypoint.rs
//! Waypoints: accepted GPS fixes stored as part of a track

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in meters used for great-circle distances
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Location provider that produced a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gps,
    Network,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gps => write!(f, "gps"),
            Provider::Network => write!(f, "network"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WayPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f32,   // meters, radius of 68% confidence
    pub time: DateTime<Utc>,
    pub provider: Provider,
    #[serde(default)]
    pub starred: bool,
}

impl WayPoint {
    /// Great-circle distance to another waypoint in meters
    pub fn distance_to(&self, other: &WayPoint) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Distance from this waypoint to an arbitrary coordinate in meters
    pub fn distance_to_coordinate(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_distance(self.latitude, self.longitude, latitude, longitude)
    }

    pub fn toggle_starred(&mut self) {
        self.starred = !self.starred;
    }
}

/// Haversine distance between two coordinates given in degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
