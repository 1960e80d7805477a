// src/recorder.rs
//! Recording session: tracking state machine and fix acceptance policy

use crate::error::{Result, TrackbookError};
use crate::gps::LocationFix;
use crate::track::{MapCenter, Track, DEFAULT_ZOOM_LEVEL};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    Stopped,
    Active,
    Paused,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingState::Stopped => write!(f, "stopped"),
            TrackingState::Active => write!(f, "recording"),
            TrackingState::Paused => write!(f, "paused"),
        }
    }
}

/// Thresholds deciding which fixes become waypoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fixes with a larger accuracy radius (meters) are not recorded
    pub max_accuracy_m: f32,
    /// Minimum time between two recorded waypoints
    pub min_interval_ms: i64,
    /// Implied speed above which a fix is treated as a GPS jump (m/s)
    pub max_speed_mps: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 30.0,
            min_interval_ms: 1000,
            max_speed_mps: 55.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Inaccurate,
    OutOfOrder,
    TooSoon,
    ImplausibleSpeed,
}

/// What happened to a fix handed to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixDecision {
    Accepted,
    Rejected(RejectReason),
    /// Not recording; the fix only updated the current location
    Ignored,
}

/// Immutable copy of the session handed to readers
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: TrackingState,
    pub current_best_location: Option<LocationFix>,
    pub track: Option<Track>,
}

pub struct RecordingSession {
    state: TrackingState,
    track: Option<Track>,
    pause_started: Option<DateTime<Utc>>,
    current_best: Option<LocationFix>,
    filter: FilterConfig,
    star_tolerance_m: f64,
}

impl RecordingSession {
    pub fn new(filter: FilterConfig, star_tolerance_m: f64) -> Self {
        Self {
            state: TrackingState::Stopped,
            track: None,
            pause_started: None,
            current_best: None,
            filter,
            star_tolerance_m,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn current_best_location(&self) -> Option<&LocationFix> {
        self.current_best.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            current_best_location: self.current_best.clone(),
            track: self.track.clone(),
        }
    }

    /// Begin a new track; only valid while stopped
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<&Track> {
        if self.state != TrackingState::Stopped {
            return Err(TrackbookError::InvalidState(format!("cannot start while {}", self.state)));
        }
        self.state = TrackingState::Active;
        self.pause_started = None;
        let track = self.track.insert(Track::new(now));
        tracing::info!("Recording started: track {}", track.id);
        Ok(track)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != TrackingState::Active {
            return Err(TrackbookError::InvalidState(format!("cannot pause while {}", self.state)));
        }
        self.state = TrackingState::Paused;
        self.pause_started = Some(now);
        tracing::info!("Recording paused");
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != TrackingState::Paused {
            return Err(TrackbookError::InvalidState(format!("cannot resume while {}", self.state)));
        }
        self.close_pause(now);
        self.state = TrackingState::Active;
        tracing::info!("Recording resumed");
        Ok(())
    }

    /// Fold an open pause interval into `recording_paused`
    fn close_pause(&mut self, now: DateTime<Utc>) {
        if let Some(pause_start) = self.pause_started.take() {
            let paused = now.signed_duration_since(pause_start).num_milliseconds().max(0);
            if let Some(track) = self.track.as_mut() {
                track.recording_paused += paused;
            }
        }
    }

    /// Finish the current track and hand it over; `None` when already stopped
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<Track> {
        if self.state == TrackingState::Stopped {
            return None;
        }
        self.close_pause(now);
        self.state = TrackingState::Stopped;

        let mut track = self.track.take()?;
        let stop = now.max(track.recording_start);
        track.recording_stop = stop;
        track.duration = (stop.signed_duration_since(track.recording_start).num_milliseconds()
            - track.recording_paused)
            .max(0);
        if let Some(last) = track.last_way_point() {
            track.map_center = MapCenter {
                latitude: last.latitude,
                longitude: last.longitude,
                zoom_level: DEFAULT_ZOOM_LEVEL,
            };
        }
        tracing::info!(
            "Recording stopped: track {} with {} waypoints, {:.0} m",
            track.id,
            track.way_points.len(),
            track.distance
        );
        Some(track)
    }

    /// Throw away the current recording without returning it
    pub fn discard(&mut self) {
        if let Some(track) = self.track.take() {
            tracing::info!("Recording discarded: track {}", track.id);
        }
        self.pause_started = None;
        self.state = TrackingState::Stopped;
    }

    /// Total steps since the recording started, as reported by a pedometer
    pub fn record_steps(&mut self, steps: f32) {
        if self.state == TrackingState::Active {
            if let Some(track) = self.track.as_mut() {
                track.step_count = steps;
            }
        }
    }

    pub fn toggle_starred(&mut self, latitude: f64, longitude: f64) -> bool {
        let tolerance = self.star_tolerance_m;
        self.track
            .as_mut()
            .map_or(false, |track| track.toggle_starred(latitude, longitude, tolerance))
    }

    fn update_current_best(&mut self, fix: &LocationFix) {
        let replace = match self.current_best {
            Some(ref current) => fix.is_better_than(current),
            None => true,
        };
        if replace {
            self.current_best = Some(fix.clone());
        }
    }

    /// Offer a new location estimate to the session
    pub fn on_location_update(&mut self, fix: LocationFix) -> FixDecision {
        self.update_current_best(&fix);

        if self.state != TrackingState::Active {
            return FixDecision::Ignored;
        }
        let filter = self.filter;
        let Some(track) = self.track.as_mut() else {
            return FixDecision::Ignored;
        };

        if !fix.has_valid_accuracy() || fix.accuracy > filter.max_accuracy_m {
            tracing::debug!("Fix rejected: accuracy {:.1} m", fix.accuracy);
            return FixDecision::Rejected(RejectReason::Inaccurate);
        }

        if let Some(last) = track.last_way_point() {
            let elapsed_ms = fix.time.signed_duration_since(last.time).num_milliseconds();
            if elapsed_ms <= 0 {
                tracing::debug!("Fix rejected: not newer than last waypoint");
                return FixDecision::Rejected(RejectReason::OutOfOrder);
            }
            if elapsed_ms < filter.min_interval_ms {
                return FixDecision::Rejected(RejectReason::TooSoon);
            }
            let speed = fix.distance_to(last) / (elapsed_ms as f64 / 1000.0);
            if speed > filter.max_speed_mps {
                tracing::debug!("Fix rejected: implied speed {:.1} m/s", speed);
                return FixDecision::Rejected(RejectReason::ImplausibleSpeed);
            }
        }

        track.push_way_point(fix.to_waypoint());
        track.duration = (fix.time.signed_duration_since(track.recording_start).num_milliseconds()
            - track.recording_paused)
            .max(0);
        FixDecision::Accepted
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new(FilterConfig::default(), 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waypoint::{haversine_distance, Provider};
    use chrono::Duration;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn fix(lat: f64, lon: f64, ms: i64) -> LocationFix {
        LocationFix::new(lat, lon, at(ms), Provider::Gps).with_accuracy(5.0)
    }

    #[test]
    fn test_three_fix_scenario() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();

        assert_eq!(session.on_location_update(fix(0.0, 0.0, 0)), FixDecision::Accepted);
        assert_eq!(session.on_location_update(fix(0.0, 0.001, 5000)), FixDecision::Accepted);
        assert_eq!(session.on_location_update(fix(0.0, 0.002, 11000)), FixDecision::Accepted);

        let track = session.track().unwrap();
        assert_eq!(track.way_points.len(), 3);
        let expected = 2.0 * haversine_distance(0.0, 0.0, 0.0, 0.001);
        assert!((track.distance as f64 - expected).abs() < 0.01);
        assert_eq!(track.duration, 11000);
    }

    #[test]
    fn test_inaccurate_fix_never_recorded() {
        let mut session = RecordingSession::default();
        let coarse = fix(0.0, 0.0, 0).with_accuracy(120.0);

        assert_eq!(session.on_location_update(coarse.clone()), FixDecision::Ignored);
        session.start(at(0)).unwrap();
        assert_eq!(
            session.on_location_update(coarse.clone()),
            FixDecision::Rejected(RejectReason::Inaccurate)
        );
        assert!(session.track().unwrap().is_empty());
        // Still shown as current location
        assert_eq!(session.current_best_location(), Some(&coarse));
    }

    #[test]
    fn test_negative_accuracy_rejected() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        let bad = fix(0.0, 0.0, 0).with_accuracy(-1.0);
        assert_eq!(session.on_location_update(bad), FixDecision::Rejected(RejectReason::Inaccurate));
    }

    #[test]
    fn test_debounce_and_ordering() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.on_location_update(fix(0.0, 0.0, 1000));

        assert_eq!(
            session.on_location_update(fix(0.0, 0.00001, 1500)),
            FixDecision::Rejected(RejectReason::TooSoon)
        );
        assert_eq!(
            session.on_location_update(fix(0.0, 0.00001, 500)),
            FixDecision::Rejected(RejectReason::OutOfOrder)
        );
        assert_eq!(session.track().unwrap().way_points.len(), 1);
    }

    #[test]
    fn test_jump_filter() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.on_location_update(fix(0.0, 0.0, 0));

        // ~1.1 km in 2 seconds
        assert_eq!(
            session.on_location_update(fix(0.0, 0.01, 2000)),
            FixDecision::Rejected(RejectReason::ImplausibleSpeed)
        );
        assert_eq!(session.track().unwrap().distance, 0.0);
    }

    #[test]
    fn test_paused_session_ignores_fixes() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.pause(at(100)).unwrap();
        assert_eq!(session.on_location_update(fix(0.0, 0.0, 200)), FixDecision::Ignored);
        assert!(session.track().unwrap().is_empty());
        assert!(session.current_best_location().is_some());
    }

    #[test]
    fn test_pause_resume_without_elapsed_time() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.pause(at(5000)).unwrap();
        session.resume(at(5000)).unwrap();
        assert_eq!(session.track().unwrap().recording_paused, 0);
    }

    #[test]
    fn test_duration_excludes_pauses() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.on_location_update(fix(0.0, 0.0, 0));
        session.pause(at(2000)).unwrap();
        session.resume(at(12000)).unwrap();
        session.on_location_update(fix(0.0, 0.0001, 15000));

        let track = session.track().unwrap();
        assert_eq!(track.recording_paused, 10000);
        assert_eq!(track.duration, 5000);

        // Stopping while paused closes the open pause
        session.pause(at(16000)).unwrap();
        let track = session.stop(at(20000)).unwrap();
        assert_eq!(track.recording_paused, 14000);
        assert_eq!(track.duration, 6000);
        assert_eq!(track.recording_stop, at(20000));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.on_location_update(fix(1.0, 2.0, 0));

        let track = session.stop(at(1000)).unwrap();
        assert_eq!(track.map_center.latitude, 1.0);
        assert_eq!(track.map_center.longitude, 2.0);
        assert!(session.stop(at(2000)).is_none());
        assert_eq!(session.state(), TrackingState::Stopped);
        assert!(session.track().is_none());
    }

    #[test]
    fn test_new_start_creates_new_track() {
        let mut session = RecordingSession::default();
        let first = session.start(at(0)).unwrap().id;
        session.stop(at(10));
        let second = session.start(at(20)).unwrap().id;
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = RecordingSession::default();
        assert!(matches!(session.pause(at(0)), Err(TrackbookError::InvalidState(_))));
        assert!(matches!(session.resume(at(0)), Err(TrackbookError::InvalidState(_))));
        session.start(at(0)).unwrap();
        assert!(session.start(at(1)).is_err());
        assert!(session.resume(at(1)).is_err());
    }

    #[test]
    fn test_stop_before_start_time_clamps() {
        let mut session = RecordingSession::default();
        session.start(at(5000)).unwrap();
        let track = session.stop(at(1000)).unwrap();
        assert!(track.recording_stop >= track.recording_start);
        assert_eq!(track.duration, 0);
    }

    #[test]
    fn test_toggle_starred_no_match() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.on_location_update(fix(0.0, 0.0, 0));
        session.on_location_update(fix(0.0, 0.001, 5000));

        assert!(!session.toggle_starred(10.0, 10.0));
        assert!(session.track().unwrap().way_points.iter().all(|wp| !wp.starred));

        assert!(session.toggle_starred(0.0, 0.001));
        assert!(session.track().unwrap().way_points[1].starred);
    }

    #[test]
    fn test_discard_and_steps() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        session.record_steps(120.0);
        assert_eq!(session.track().unwrap().step_count, 120.0);
        session.discard();
        assert_eq!(session.state(), TrackingState::Stopped);
        assert!(session.stop(at(10)).is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut session = RecordingSession::default();
        session.start(at(0)).unwrap();
        let snapshot = session.snapshot();
        session.on_location_update(fix(0.0, 0.0, 0));
        assert!(snapshot.track.unwrap().is_empty());
        assert_eq!(session.track().unwrap().way_points.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_distance_is_sum_of_segments(
            steps in prop::collection::vec((-0.0002f64..0.0002, -0.0002f64..0.0002, 1000i64..10_000), 1..40)
        ) {
            let mut session = RecordingSession::default();
            session.start(at(0)).unwrap();

            let (mut lat, mut lon, mut ms) = (45.0, 7.0, 0i64);
            session.on_location_update(fix(lat, lon, ms));
            for (d_lat, d_lon, dt) in &steps {
                lat += d_lat;
                lon += d_lon;
                ms += dt;
                prop_assert_eq!(session.on_location_update(fix(lat, lon, ms)), FixDecision::Accepted);
            }

            let track = session.track().unwrap();
            prop_assert_eq!(track.way_points.len(), steps.len() + 1);
            let expected: f64 = track
                .way_points
                .windows(2)
                .map(|pair| pair[0].distance_to(&pair[1]))
                .sum();
            prop_assert!((track.distance as f64 - expected).abs() <= expected * 1e-4 + 1e-3);
            prop_assert!(track.way_points.windows(2).all(|pair| pair[0].time < pair[1].time));
        }
    }
}
