// src/gps/nmea.rs
//! NMEA sentence decoding into location fixes

use super::data::LocationFix;
use crate::waypoint::Provider;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// User equivalent range error used to turn HDOP into meters
const UERE_M: f64 = 5.0;

/// A time of day this far behind the previous one means the UTC date rolled over
const DATE_ROLLOVER_HOURS: i64 = 12;

/// Stateful decoder: RMC supplies the date, GGA supplies position, altitude and HDOP
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    date: Option<NaiveDate>,
    last_time: Option<NaiveTime>,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one sentence; returns a fix when a GGA sentence reports a valid position
    pub fn decode(&mut self, line: &str) -> Option<LocationFix> {
        let line = line.split('*').next().unwrap_or(line);
        let parts: Vec<&str> = line.split(',').collect();

        if line.starts_with("$GPGGA") || line.starts_with("$GNGGA") {
            self.parse_gga(&parts)
        } else {
            if line.starts_with("$GPRMC") || line.starts_with("$GNRMC") {
                self.parse_rmc(&parts);
            }
            None
        }
    }

    /// Parse GGA (Global Positioning System Fix Data) sentence
    fn parse_gga(&mut self, parts: &[&str]) -> Option<LocationFix> {
        if parts.len() < 10 {
            return None;
        }

        let quality = parts[6].parse::<u8>().ok()?;
        if quality == 0 {
            return None;
        }

        let latitude = parse_coordinate(parts[2], parts[3], "S")?;
        let longitude = parse_coordinate(parts[4], parts[5], "W")?;
        let hdop = parts[8].parse::<f64>().ok()?;
        let altitude = parts[9].parse::<f64>().unwrap_or(0.0);

        let time = parse_time(parts[1])?;
        let mut date = self.date.unwrap_or_else(|| Utc::now().date_naive());
        if let Some(last) = self.last_time {
            // GGA crossed midnight before the next RMC
            if last.signed_duration_since(time) > Duration::hours(DATE_ROLLOVER_HOURS) {
                if let Some(next) = date.succ_opt() {
                    date = next;
                    self.date = Some(next);
                }
            }
        }
        self.last_time = Some(time);
        let timestamp = Utc.from_utc_datetime(&date.and_time(time));

        Some(
            LocationFix::new(latitude, longitude, timestamp, Provider::Gps)
                .with_altitude(altitude)
                .with_accuracy((hdop * UERE_M) as f32),
        )
    }

    /// Parse RMC (Recommended Minimum) sentence; only the date is kept
    fn parse_rmc(&mut self, parts: &[&str]) {
        if parts.len() < 10 {
            return;
        }
        if let Ok(date) = NaiveDate::parse_from_str(parts[9], "%d%m%y") {
            self.date = Some(date);
            if let Some(time) = parse_time(parts[1]) {
                self.last_time = Some(time);
            }
        }
    }
}

/// Convert ddmm.mmmm / dddmm.mmmm to signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    Some(if hemisphere == negative { -decimal } else { decimal })
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let whole = value.split('.').next()?;
    NaiveTime::parse_from_str(whole, "%H%M%S").ok()
}
