// src/track.rs
//! Track aggregate: waypoints plus accumulated statistics

use crate::tracklist::TracklistElement;
use crate::units;
use crate::waypoint::WayPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Version written into every persisted track record
pub const CURRENT_TRACK_FORMAT_VERSION: u32 = 1;

/// Step count value meaning "no pedometer available"
pub const NO_STEP_COUNT: f32 = -1.0;

pub const DEFAULT_LATITUDE: f64 = 49.1;
pub const DEFAULT_LONGITUDE: f64 = 8.4;
pub const DEFAULT_ZOOM_LEVEL: f64 = 16.0;

/// Last map view of a track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCenter {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom_level: f64,
}

impl Default for MapCenter {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            zoom_level: DEFAULT_ZOOM_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub way_points: Vec<WayPoint>,
    #[serde(default)]
    pub distance: f32,          // meters
    #[serde(default)]
    pub duration: i64,          // milliseconds, excluding pauses
    #[serde(default)]
    pub recording_paused: i64,  // milliseconds spent paused
    #[serde(default = "default_step_count")]
    pub step_count: f32,
    pub recording_start: DateTime<Utc>,
    pub recording_stop: DateTime<Utc>,
    #[serde(default)]
    pub max_altitude: f64,
    #[serde(default)]
    pub min_altitude: f64,
    #[serde(default)]
    pub positive_elevation: f64,
    #[serde(default)]
    pub negative_elevation: f64,
    #[serde(default)]
    pub map_center: MapCenter,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub storage_location: Option<PathBuf>,
    #[serde(default)]
    pub export_location: Option<PathBuf>,
}

fn default_step_count() -> f32 {
    NO_STEP_COUNT
}

/// Random identifier restricted to 63 bits so it stays a non-negative i64
pub fn make_random_id() -> i64 {
    let (high, _) = Uuid::new_v4().as_u64_pair();
    (high >> 1) as i64
}

impl Track {
    /// Create an empty track whose recording starts at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            id: make_random_id(),
            format_version: CURRENT_TRACK_FORMAT_VERSION,
            way_points: Vec::new(),
            distance: 0.0,
            duration: 0,
            recording_paused: 0,
            step_count: NO_STEP_COUNT,
            recording_start: start,
            recording_stop: start,
            max_altitude: 0.0,
            min_altitude: 0.0,
            positive_elevation: 0.0,
            negative_elevation: 0.0,
            map_center: MapCenter::default(),
            name: units::readable_date(&start),
            storage_location: None,
            export_location: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.way_points.is_empty()
    }

    pub fn last_way_point(&self) -> Option<&WayPoint> {
        self.way_points.last()
    }

    /// Append an accepted waypoint and fold it into the running statistics
    pub(crate) fn push_way_point(&mut self, way_point: WayPoint) {
        match self.way_points.last() {
            Some(previous) => {
                self.distance += previous.distance_to(&way_point) as f32;
                let delta = way_point.altitude - previous.altitude;
                if delta > 0.0 {
                    self.positive_elevation += delta;
                } else {
                    self.negative_elevation += delta.abs();
                }
                self.max_altitude = self.max_altitude.max(way_point.altitude);
                self.min_altitude = self.min_altitude.min(way_point.altitude);
            }
            None => {
                self.max_altitude = way_point.altitude;
                self.min_altitude = way_point.altitude;
            }
        }
        self.way_points.push(way_point);
    }

    /// Rebuild distance and elevation statistics from the waypoint list
    pub fn recompute_statistics(&mut self) {
        let way_points = std::mem::take(&mut self.way_points);
        self.distance = 0.0;
        self.positive_elevation = 0.0;
        self.negative_elevation = 0.0;
        self.max_altitude = 0.0;
        self.min_altitude = 0.0;
        for way_point in way_points {
            self.push_way_point(way_point);
        }
    }

    /// Upgrade a record written by an older format version
    pub fn migrate(&mut self) -> bool {
        if self.format_version >= CURRENT_TRACK_FORMAT_VERSION {
            return false;
        }
        tracing::info!(
            "Migrating track {} from format version {} to {}",
            self.id,
            self.format_version,
            CURRENT_TRACK_FORMAT_VERSION
        );
        // Version 0 records carried no reliable statistics
        self.recompute_statistics();
        if self.recording_stop < self.recording_start {
            self.recording_stop = self.recording_start;
        }
        self.format_version = CURRENT_TRACK_FORMAT_VERSION;
        true
    }

    /// Flip the starred flag of the waypoint nearest to the coordinate.
    /// Returns false (and changes nothing) when no waypoint lies within `tolerance_m`.
    pub fn toggle_starred(&mut self, latitude: f64, longitude: f64, tolerance_m: f64) -> bool {
        let nearest = self
            .way_points
            .iter()
            .enumerate()
            .map(|(i, wp)| (i, wp.distance_to_coordinate(latitude, longitude)))
            .filter(|(_, d)| *d <= tolerance_m)
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((index, _)) => {
                self.way_points[index].toggle_starred();
                true
            }
            None => false,
        }
    }

    pub fn starred_way_points(&self) -> impl Iterator<Item = &WayPoint> {
        self.way_points.iter().filter(|wp| wp.starred)
    }

    /// Average velocity over the moving time in m/s
    pub fn average_velocity(&self) -> Option<f64> {
        if self.duration <= 0 {
            return None;
        }
        Some(self.distance as f64 / (self.duration as f64 / 1000.0))
    }

    /// Project this track onto its list entry
    pub fn to_tracklist_element(&self) -> TracklistElement {
        TracklistElement {
            id: self.id,
            name: self.name.clone(),
            date: self.recording_start,
            date_string: units::readable_date(&self.recording_start),
            distance: self.distance,
            duration: self.duration,
            storage_location: self.storage_location.clone(),
            export_location: self.export_location.clone(),
            starred: false,
        }
    }
}
