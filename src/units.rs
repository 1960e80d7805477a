// src/units.rs
//! Human readable distances, speeds, durations and dates

use crate::preferences::UnitSystem;
use chrono::{DateTime, Local, Utc};

const METERS_PER_FOOT: f64 = 0.3048;
const METERS_PER_MILE: f64 = 1609.344;

pub fn distance_to_string(meters: f64, units: UnitSystem) -> String {
    match units {
        UnitSystem::Metric => {
            if meters.abs() >= 1000.0 {
                format!("{:.2} km", meters / 1000.0)
            } else {
                format!("{:.0} m", meters)
            }
        }
        UnitSystem::Imperial => {
            let feet = meters / METERS_PER_FOOT;
            if feet.abs() >= 5280.0 {
                format!("{:.2} mi", meters / METERS_PER_MILE)
            } else {
                format!("{:.0} ft", feet)
            }
        }
    }
}

/// Average speed over a distance, `-` for zero duration
pub fn velocity_to_string(distance_m: f64, duration_ms: i64, units: UnitSystem) -> String {
    let unit = match units {
        UnitSystem::Metric => "km/h",
        UnitSystem::Imperial => "mph",
    };
    if duration_ms <= 0 {
        return format!("- {}", unit);
    }
    let mps = distance_m / (duration_ms as f64 / 1000.0);
    let value = match units {
        UnitSystem::Metric => mps * 3.6,
        UnitSystem::Imperial => mps * 3600.0 / METERS_PER_MILE,
    };
    format!("{:.1} {}", value, unit)
}

pub fn duration_to_string(duration_ms: i64) -> String {
    let total = duration_ms.max(0) / 1000;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Date used for default track names, e.g. `Nov 14, 2023`
pub fn readable_date(time: &DateTime<Utc>) -> String {
    time.format("%b %-d, %Y").to_string()
}

pub fn readable_date_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%b %-d, %Y %H:%M").to_string()
}
