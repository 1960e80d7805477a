// src/gps/data.rs
//! Location fixes as delivered by a location source

use crate::waypoint::{haversine_distance, Provider, WayPoint};
use chrono::{DateTime, Duration, Utc};

/// Two fixes further apart than this are compared by time alone
const SIGNIFICANT_TIME_DIFFERENCE_SECS: i64 = 120;

/// Accuracy loss that disqualifies a newer fix within the significant window
const SIGNIFICANT_ACCURACY_LOSS_M: f32 = 200.0;

/// A single location estimate from a GPS or network provider
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f32,
    pub time: DateTime<Utc>,
    pub provider: Provider,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, time: DateTime<Utc>, provider: Provider) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            accuracy: 0.0,
            time,
            provider,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Create the waypoint stored when this fix is accepted
    pub fn to_waypoint(&self) -> WayPoint {
        WayPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            accuracy: self.accuracy,
            time: self.time,
            provider: self.provider,
            starred: false,
        }
    }

    /// Great-circle distance to a stored waypoint in meters
    pub fn distance_to(&self, waypoint: &WayPoint) -> f64 {
        haversine_distance(self.latitude, self.longitude, waypoint.latitude, waypoint.longitude)
    }

    /// Accuracy must be a finite, non-negative radius
    pub fn has_valid_accuracy(&self) -> bool {
        self.accuracy.is_finite() && self.accuracy >= 0.0
    }

    /// Get the age of the fix in seconds
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.time).num_seconds()
    }

    /// Check if the fix is recent (within 10 seconds)
    pub fn is_recent(&self) -> bool {
        self.age_seconds() < 10
    }

    /// Decide whether this fix should replace `current` as the best known location
    pub fn is_better_than(&self, current: &LocationFix) -> bool {
        let time_delta = self.time.signed_duration_since(current.time);
        let significant = Duration::seconds(SIGNIFICANT_TIME_DIFFERENCE_SECS);

        if time_delta > significant {
            return true;
        }
        if time_delta < -significant {
            return false;
        }

        let accuracy_delta = self.accuracy - current.accuracy;
        let is_newer = time_delta > Duration::zero();

        if accuracy_delta < 0.0 {
            return true;
        }
        if is_newer && accuracy_delta == 0.0 {
            return true;
        }
        if is_newer && accuracy_delta <= SIGNIFICANT_ACCURACY_LOSS_M && self.provider == current.provider {
            return true;
        }
        false
    }

    /// Format coordinate for display
    pub fn format_coordinate(coord: f64) -> String {
        format!("{:>12.6}°", coord)
    }
}
