// src/gps/gpsd.rs
//! GPSD client: turns TPV reports into location fixes

use super::data::LocationFix;
use crate::error::{Result, TrackbookError};
use crate::waypoint::Provider;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            TrackbookError::ProviderUnavailable(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e))
        })?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| TrackbookError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON data; only TPV reports with a 2D/3D fix yield a fix
pub fn parse_gpsd_json(line: &str) -> Result<Option<LocationFix>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| TrackbookError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    match msg.class.as_str() {
        "TPV" => Ok(parse_tpv_message(&msg.data)),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                tracing::info!("Connected to gpsd version {}", version);
            }
            Ok(None)
        }
        "DEVICES" => {
            if let Some(devices) = msg.data.get("devices").and_then(|v| v.as_array()) {
                let paths: Vec<&str> = devices
                    .iter()
                    .filter_map(|d| d.get("path").and_then(|p| p.as_str()))
                    .collect();
                tracing::info!("gpsd managing {} device(s): {:?}", devices.len(), paths);
            }
            Ok(None)
        }
        // Ignore SKY and other message types
        _ => Ok(None),
    }
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> Option<LocationFix> {
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let lat = msg_data.get("lat").and_then(|v| v.as_f64())?;
    let lon = msg_data.get("lon").and_then(|v| v.as_f64())?;
    let accuracy = tpv_accuracy(msg_data)?;

    let time = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);

    let altitude = msg_data
        .get("altMSL")
        .or_else(|| msg_data.get("alt"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    Some(
        LocationFix::new(lat, lon, time, Provider::Gps)
            .with_altitude(altitude)
            .with_accuracy(accuracy as f32),
    )
}

/// Horizontal accuracy: eph when reported, otherwise the larger of epx/epy
fn tpv_accuracy(msg_data: &HashMap<String, serde_json::Value>) -> Option<f64> {
    if let Some(eph) = msg_data.get("eph").and_then(|v| v.as_f64()) {
        return Some(eph);
    }
    let epx = msg_data.get("epx").and_then(|v| v.as_f64());
    let epy = msg_data.get("epy").and_then(|v| v.as_f64());
    match (epx, epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}
