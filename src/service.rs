// src/service.rs
//! Tracker service: owns the recording session and feeds it from location sources

use crate::{
    error::{Result, TrackbookError},
    gps::{gpsd, nmea::NmeaDecoder, LocationFix},
    recorder::{FixDecision, RecordingSession, SessionSnapshot, TrackingState},
    storage::PersistenceHandle,
    track::Track,
    waypoint::Provider,
};
use chrono::Utc;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::watch,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

/// Where location fixes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationSource {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
}

struct Shared {
    session: RwLock<RecordingSession>,
    state_tx: watch::Sender<TrackingState>,
    gps_active: AtomicBool,
    network_active: AtomicBool,
    running: AtomicBool,
    connections: AtomicUsize,
    /// A stopped track is being saved and `Stopped` is not yet published
    stopping: AtomicBool,
    /// Finalized tracks whose save failed, oldest first
    unsaved: Mutex<Vec<Track>>,
    persistence: PersistenceHandle,
}

impl Shared {
    fn read_session(&self) -> RwLockReadGuard<'_, RecordingSession> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, RecordingSession> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: TrackingState) {
        self.state_tx.send_replace(state);
    }

    fn feed_fix(&self, fix: LocationFix) -> FixDecision {
        // Append and statistics update happen under one write lock
        self.write_session().on_location_update(fix)
    }

    fn set_provider_active(&self, provider: Provider, active: bool) {
        let flag = match provider {
            Provider::Gps => &self.gps_active,
            Provider::Network => &self.network_active,
        };
        if flag.swap(active, Ordering::Relaxed) != active {
            tracing::info!("{} provider {}", provider, if active { "active" } else { "inactive" });
        }
    }

    fn take_unsaved(&self) -> Vec<Track> {
        std::mem::take(&mut *self.unsaved.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn keep_unsaved(&self, track: Track) {
        self.unsaved.lock().unwrap_or_else(PoisonError::into_inner).push(track);
    }

    fn unsaved_count(&self) -> usize {
        self.unsaved.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Publishes `Stopped` and reopens the session for `start` when dropped
struct StopGuard<'a> {
    shared: &'a Shared,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        let _session = self.shared.write_session();
        self.shared.publish(TrackingState::Stopped);
        self.shared.stopping.store(false, Ordering::Release);
    }
}

/// Long-lived owner of the recording session
pub struct TrackerService {
    shared: Arc<Shared>,
}

impl TrackerService {
    pub fn new(session: RecordingSession, persistence: PersistenceHandle) -> Self {
        let (state_tx, _) = watch::channel(session.state());
        Self {
            shared: Arc::new(Shared {
                session: RwLock::new(session),
                state_tx,
                gps_active: AtomicBool::new(false),
                network_active: AtomicBool::new(false),
                running: AtomicBool::new(true),
                connections: AtomicUsize::new(0),
                stopping: AtomicBool::new(false),
                unsaved: Mutex::new(Vec::new()),
                persistence,
            }),
        }
    }

    /// Bind a client to the service
    pub fn connect(&self) -> TrackerClient {
        let count = self.shared.connections.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("Client connected ({} connected)", count);
        TrackerClient {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    /// Stop all source reader tasks after their next line
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
    }

    /// Connect to a location source and spawn a task feeding its fixes into the session
    pub async fn spawn_source(&self, source: LocationSource) -> Result<JoinHandle<()>> {
        match source {
            LocationSource::Gpsd { host, port } => {
                tracing::info!("Connecting to gpsd at {}:{}", host, port);
                let reader = gpsd::connect_gpsd(&host, port).await?;
                Ok(self.spawn_reader(reader, "gpsd", |line| match gpsd::parse_gpsd_json(line) {
                    Ok(fix) => fix,
                    Err(e) => {
                        tracing::warn!("Error parsing gpsd JSON: {}", e);
                        None
                    }
                }))
            }
            LocationSource::Serial { port, baudrate } => {
                tracing::info!("Opening {} at {} baud", port, baudrate);
                let serial = tokio_serial::new(&port, baudrate)
                    .timeout(Duration::from_millis(1000))
                    .open_native_async()
                    .map_err(|e| serial_open_error(&port, e))?;
                let mut decoder = NmeaDecoder::new();
                Ok(self.spawn_reader(BufReader::new(serial), "serial", move |line| decoder.decode(line)))
            }
        }
    }

    fn spawn_reader<R, F>(&self, mut reader: R, name: &'static str, mut parse: F) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        F: FnMut(&str) -> Option<LocationFix> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        shared.set_provider_active(Provider::Gps, true);

        tokio::spawn(async move {
            let mut buf = Vec::new();

            while shared.running.load(Ordering::Relaxed) {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        tracing::warn!("{} stream closed", name);
                        break;
                    }
                    Ok(_) => {
                        // Line noise is not valid UTF-8; the parser rejects what is left of it
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(fix) = parse(line) {
                            shared.feed_fix(fix);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading from {}: {}", name, e);
                        break;
                    }
                }
            }

            shared.set_provider_active(Provider::Gps, false);
        })
    }
}

fn serial_open_error(port: &str, error: tokio_serial::Error) -> TrackbookError {
    match error.kind {
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TrackbookError::PermissionDenied(format!("Access to serial port {} denied: {}", port, error))
        }
        _ => TrackbookError::ProviderUnavailable(format!("Failed to open serial port {}: {}", port, error)),
    }
}

/// Handle used by views and the CLI to drive the recording
pub struct TrackerClient {
    shared: Arc<Shared>,
}

impl Clone for TrackerClient {
    fn clone(&self) -> Self {
        self.shared.connections.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for TrackerClient {
    fn drop(&mut self) {
        self.shared.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

impl TrackerClient {
    /// Unbind from the service
    pub fn disconnect(self) {
        tracing::debug!("Client disconnected");
    }

    /// Returns the id of the new track
    pub fn start_tracking(&self) -> Result<i64> {
        let mut session = self.shared.write_session();
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(TrackbookError::InvalidState(
                "cannot start while the last track is being saved".to_string(),
            ));
        }
        let id = session.start(Utc::now())?.id;
        self.shared.publish(TrackingState::Active);
        Ok(id)
    }

    pub fn pause_tracking(&self) -> Result<()> {
        self.shared.write_session().pause(Utc::now())?;
        self.shared.publish(TrackingState::Paused);
        Ok(())
    }

    pub fn resume_tracking(&self) -> Result<()> {
        self.shared.write_session().resume(Utc::now())?;
        self.shared.publish(TrackingState::Active);
        Ok(())
    }

    /// Finish the recording and wait for it to be saved before reporting `Stopped`.
    ///
    /// Returns `Ok(None)` when nothing was recording or the track had no waypoints.
    /// On a failed save the track is kept for [`TrackerClient::retry_save`].
    pub async fn stop_tracking(&self) -> Result<Option<Track>> {
        let (track, _guard) = {
            let mut session = self.shared.write_session();
            let Some(track) = session.stop(Utc::now()) else {
                return Ok(None);
            };
            self.shared.stopping.store(true, Ordering::Release);
            (track, StopGuard { shared: &self.shared })
        };

        if track.is_empty() {
            tracing::info!("Track {} has no waypoints, not saving", track.id);
            return Ok(None);
        }

        self.save_finished(track).await.map(Some)
    }

    /// Save every track whose earlier save failed.
    ///
    /// Tracks that fail again stay queued and the first error is returned.
    pub async fn retry_save(&self) -> Result<Vec<Track>> {
        let mut saved = Vec::new();
        let mut first_error = None;
        for track in self.shared.take_unsaved() {
            match self.save_finished(track).await {
                Ok(track) => saved.push(track),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    pub fn has_unsaved_track(&self) -> bool {
        self.unsaved_count() > 0
    }

    pub fn unsaved_count(&self) -> usize {
        self.shared.unsaved_count()
    }

    async fn save_finished(&self, track: Track) -> Result<Track> {
        match self.shared.persistence.save(track.clone()).await {
            Ok(saved) => {
                tracing::info!("Saved track {} to {:?}", saved.id, saved.storage_location);
                Ok(saved)
            }
            Err(e) => {
                tracing::error!("Failed to save track {}: {}", track.id, e);
                self.shared.keep_unsaved(track);
                Err(e)
            }
        }
    }

    pub fn discard_tracking(&self) {
        self.shared.write_session().discard();
        self.shared.publish(TrackingState::Stopped);
    }

    pub fn toggle_starred(&self, latitude: f64, longitude: f64) -> bool {
        self.shared.write_session().toggle_starred(latitude, longitude)
    }

    pub fn record_steps(&self, steps: f32) {
        self.shared.write_session().record_steps(steps);
    }

    pub fn feed_fix(&self, fix: LocationFix) -> FixDecision {
        self.shared.feed_fix(fix)
    }

    pub fn set_provider_active(&self, provider: Provider, active: bool) {
        self.shared.set_provider_active(provider, active);
    }

    pub fn gps_active(&self) -> bool {
        self.shared.gps_active.load(Ordering::Relaxed)
    }

    pub fn network_active(&self) -> bool {
        self.shared.network_active.load(Ordering::Relaxed)
    }

    /// State as last published to subscribers
    pub fn tracking_state(&self) -> TrackingState {
        *self.shared.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<TrackingState> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.shared.read_session().snapshot();
        snapshot.state = self.tracking_state();
        snapshot
    }

    pub fn persistence(&self) -> &PersistenceHandle {
        &self.shared.persistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileTrackStore, PersistenceWorker, TrackStore};
    use crate::track::MapCenter;
    use crate::tracklist::TracklistElement;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn fix(lon: f64, seconds: i64) -> LocationFix {
        LocationFix::new(0.0, lon, Utc::now() + ChronoDuration::seconds(seconds), Provider::Gps)
            .with_accuracy(5.0)
    }

    fn file_service(dir: &TempDir) -> (PersistenceWorker, TrackerService) {
        let worker = PersistenceWorker::spawn(FileTrackStore::new(dir.path().to_path_buf()).unwrap());
        let service = TrackerService::new(RecordingSession::default(), worker.handle());
        (worker, service)
    }

    /// Store whose writes can be made to fail
    struct FlakyStore {
        fail: Arc<AtomicBool>,
    }

    impl TrackStore for FlakyStore {
        fn save(&mut self, _track: &Track) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                Err(TrackbookError::StorageFailure("disk full".to_string()))
            } else {
                Ok(())
            }
        }
        fn load(&self, id: i64) -> Result<Track> {
            Err(TrackbookError::NotFound(id))
        }
        fn delete(&mut self, id: i64) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn rename(&mut self, id: i64, _name: &str) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn set_starred(&mut self, id: i64, _starred: bool) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn update_map_center(&mut self, id: i64, _center: MapCenter) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn export_gpx(&mut self, _track: &Track, destination: &Path) -> Result<PathBuf> {
            Ok(destination.to_path_buf())
        }
        fn list_summaries(&self) -> Result<Vec<TracklistElement>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_stop_saves_before_reporting_stopped() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();
        let mut states = client.state_changes();

        let id = client.start_tracking().unwrap();
        assert_eq!(client.tracking_state(), TrackingState::Active);
        client.feed_fix(fix(0.0, 0));
        client.feed_fix(fix(0.001, 5));

        let saved = client.stop_tracking().await.unwrap().unwrap();
        assert_eq!(saved.id, id);
        assert_eq!(client.tracking_state(), TrackingState::Stopped);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), TrackingState::Stopped);

        // Already persisted when Stopped was observed
        let loaded = client.persistence().load(id).await.unwrap();
        assert_eq!(loaded.way_points.len(), 2);
    }

    #[tokio::test]
    async fn test_second_stop_is_noop() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();

        client.start_tracking().unwrap();
        client.feed_fix(fix(0.0, 0));
        assert!(client.stop_tracking().await.unwrap().is_some());
        assert!(client.stop_tracking().await.unwrap().is_none());
        assert_eq!(client.persistence().list_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_track_not_saved() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();

        client.start_tracking().unwrap();
        assert!(client.stop_tracking().await.unwrap().is_none());
        assert_eq!(client.tracking_state(), TrackingState::Stopped);
        assert!(client.persistence().list_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_track() {
        let fail = Arc::new(AtomicBool::new(true));
        let worker = PersistenceWorker::spawn(FlakyStore { fail: Arc::clone(&fail) });
        let service = TrackerService::new(RecordingSession::default(), worker.handle());
        let client = service.connect();

        client.start_tracking().unwrap();
        client.feed_fix(fix(0.0, 0));
        let err = client.stop_tracking().await.unwrap_err();
        assert!(matches!(err, TrackbookError::StorageFailure(_)));
        assert!(client.has_unsaved_track());

        fail.store(false, Ordering::Relaxed);
        let saved = client.retry_save().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].way_points.len(), 1);
        assert!(!client.has_unsaved_track());
        assert!(client.retry_save().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_failed_saves_both_kept() {
        let fail = Arc::new(AtomicBool::new(true));
        let worker = PersistenceWorker::spawn(FlakyStore { fail: Arc::clone(&fail) });
        let service = TrackerService::new(RecordingSession::default(), worker.handle());
        let client = service.connect();

        let mut ids = Vec::new();
        for _ in 0..2 {
            ids.push(client.start_tracking().unwrap());
            client.feed_fix(fix(0.0, 0));
            assert!(client.stop_tracking().await.is_err());
        }
        assert_eq!(client.unsaved_count(), 2);

        // Still failing: nothing is lost
        assert!(client.retry_save().await.is_err());
        assert_eq!(client.unsaved_count(), 2);

        fail.store(false, Ordering::Relaxed);
        let recovered: Vec<i64> = client.retry_save().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(recovered, ids);
        assert!(!client.has_unsaved_track());
    }

    /// Store whose saves take a while
    struct SlowStore {
        delay: std::time::Duration,
    }

    impl TrackStore for SlowStore {
        fn save(&mut self, _track: &Track) -> Result<()> {
            std::thread::sleep(self.delay);
            Ok(())
        }
        fn load(&self, id: i64) -> Result<Track> {
            Err(TrackbookError::NotFound(id))
        }
        fn delete(&mut self, id: i64) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn rename(&mut self, id: i64, _name: &str) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn set_starred(&mut self, id: i64, _starred: bool) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn update_map_center(&mut self, id: i64, _center: MapCenter) -> Result<()> {
            Err(TrackbookError::NotFound(id))
        }
        fn export_gpx(&mut self, _track: &Track, destination: &Path) -> Result<PathBuf> {
            Ok(destination.to_path_buf())
        }
        fn list_summaries(&self) -> Result<Vec<TracklistElement>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_start_rejected_while_stop_is_saving() {
        let worker = PersistenceWorker::spawn(SlowStore { delay: Duration::from_millis(300) });
        let service = TrackerService::new(RecordingSession::default(), worker.handle());
        let stopper = service.connect();
        let starter = service.connect();

        stopper.start_tracking().unwrap();
        stopper.feed_fix(fix(0.0, 0));

        let (stopped, started) = tokio::join!(stopper.stop_tracking(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            starter.start_tracking()
        });
        assert!(stopped.unwrap().is_some());
        assert!(matches!(started, Err(TrackbookError::InvalidState(_))));

        // Published state and session agree once the save finished
        let snapshot = starter.snapshot();
        assert_eq!(snapshot.state, TrackingState::Stopped);
        assert!(snapshot.track.is_none());

        starter.start_tracking().unwrap();
        assert_eq!(stopper.tracking_state(), TrackingState::Active);
        assert!(starter.snapshot().track.is_some());
    }

    #[tokio::test]
    async fn test_garbled_line_does_not_end_reader() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();
        client.start_tracking().unwrap();

        let input = b"\xff\xfe garbage\n$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n".to_vec();
        let mut decoder = NmeaDecoder::new();
        let reader = service.spawn_reader(std::io::Cursor::new(input), "serial", move |line| decoder.decode(line));
        reader.await.unwrap();

        assert_eq!(client.snapshot().track.unwrap().way_points.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_serial_port_is_provider_unavailable() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let err = service
            .spawn_source(LocationSource::Serial { port: "/dev/trackbook-missing-port".to_string(), baudrate: 4800 })
            .await
            .unwrap_err();
        assert!(matches!(err, TrackbookError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_connection_counting_and_flags() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();
        let second = client.clone();
        assert_eq!(service.connection_count(), 2);
        second.disconnect();
        assert_eq!(service.connection_count(), 1);

        assert!(!client.gps_active());
        client.set_provider_active(Provider::Network, true);
        assert!(client.network_active());
    }

    #[tokio::test]
    async fn test_snapshot_while_paused() {
        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();

        client.start_tracking().unwrap();
        client.feed_fix(fix(0.0, 0));
        client.pause_tracking().unwrap();
        assert_eq!(client.feed_fix(fix(0.001, 5)), FixDecision::Ignored);

        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, TrackingState::Paused);
        assert_eq!(snapshot.track.unwrap().way_points.len(), 1);
        assert!(client.pause_tracking().is_err());
        client.resume_tracking().unwrap();
        client.discard_tracking();
        assert!(client.snapshot().track.is_none());
    }

    #[tokio::test]
    async fn test_gpsd_source_feeds_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut watch = String::new();
            socket.read_line(&mut watch).await.unwrap();
            assert!(watch.starts_with("?WATCH"));

            let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
            let mut lines = String::from("{\"class\":\"VERSION\",\"release\":\"3.25\"}\n");
            for i in 0..3 {
                let time = (start + ChronoDuration::seconds(i * 5)).to_rfc3339();
                lines.push_str(&format!(
                    "{{\"class\":\"TPV\",\"mode\":3,\"time\":\"{}\",\"lat\":0.0,\"lon\":{},\"eph\":4.0}}\n",
                    time,
                    i as f64 * 0.001
                ));
            }
            socket.get_mut().write_all(lines.as_bytes()).await.unwrap();
            socket.get_mut().shutdown().await.unwrap();
        });

        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let client = service.connect();
        client.start_tracking().unwrap();

        let reader = service
            .spawn_source(LocationSource::Gpsd { host: "127.0.0.1".to_string(), port })
            .await
            .unwrap();
        server.await.unwrap();
        reader.await.unwrap();

        let snapshot = client.snapshot();
        assert_eq!(snapshot.track.unwrap().way_points.len(), 3);
        assert!(snapshot.current_best_location.is_some());
        assert!(!client.gps_active());
    }

    #[tokio::test]
    async fn test_unreachable_gpsd_is_provider_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = TempDir::new().unwrap();
        let (_worker, service) = file_service(&dir);
        let err = service
            .spawn_source(LocationSource::Gpsd { host: "127.0.0.1".to_string(), port })
            .await
            .unwrap_err();
        assert!(matches!(err, TrackbookError::ProviderUnavailable(_)));
    }
}
