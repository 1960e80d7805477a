// src/lib.rs
//! Trackbook Library
//!
//! Records movement as GPS tracks, derives distance, elevation and duration
//! statistics, keeps a tracklist of finished recordings and exports GPX.

pub mod config;
pub mod display;
pub mod error;
pub mod gps;
pub mod gpx;
pub mod preferences;
pub mod recorder;
pub mod refresh;
pub mod service;
pub mod storage;
pub mod track;
pub mod tracklist;
pub mod units;
pub mod waypoint;

// Re-export main types for convenience
pub use error::{Result, TrackbookError};
pub use gps::LocationFix;
pub use recorder::{FixDecision, RecordingSession, TrackingState};
pub use service::{LocationSource, TrackerClient, TrackerService};
pub use track::Track;
pub use tracklist::{Tracklist, TracklistElement};
pub use waypoint::{Provider, WayPoint};
