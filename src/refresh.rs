// src/refresh.rs
//! Periodic refresh of presentation sinks from the tracker

use crate::{
    error::Result,
    gps::LocationFix,
    recorder::TrackingState,
    service::TrackerClient,
    track::Track,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);

/// Everything a view needs for one redraw
#[derive(Debug, Clone)]
pub struct RefreshFrame {
    pub state: TrackingState,
    pub current_best_location: Option<LocationFix>,
    pub track: Option<Track>,
    pub gps_active: bool,
    pub network_active: bool,
    /// No provider is delivering fixes
    pub location_error: bool,
}

/// A presentation target for refresh frames
pub trait RefreshSink {
    /// Called once before the first frame
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, frame: &RefreshFrame) -> Result<()>;

    /// Called once after the last frame, also when rendering failed
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct RefreshLoop {
    client: TrackerClient,
    period: Duration,
}

impl RefreshLoop {
    pub fn new(client: TrackerClient, period: Duration) -> Self {
        Self { client, period }
    }

    pub fn frame(&self) -> RefreshFrame {
        let snapshot = self.client.snapshot();
        let gps_active = self.client.gps_active();
        let network_active = self.client.network_active();
        RefreshFrame {
            state: snapshot.state,
            current_best_location: snapshot.current_best_location,
            track: snapshot.track,
            gps_active,
            network_active,
            location_error: !gps_active && !network_active,
        }
    }

    /// Render a frame every period until `running` is cleared or the sink fails
    pub async fn run<S: RefreshSink>(self, sink: &mut S, running: Arc<AtomicBool>) -> Result<()> {
        let rendered = match sink.open() {
            Ok(()) => self.render_while(sink, &running).await,
            Err(e) => Err(e),
        };
        let closed = sink.close();
        self.client.disconnect();
        rendered.and(closed)
    }

    /// Like [`RefreshLoop::run`], then stop and save the recording even if the sink failed.
    ///
    /// Returns the sink outcome and the outcome of the stop.
    pub async fn run_then_stop<S: RefreshSink>(
        self,
        sink: &mut S,
        running: Arc<AtomicBool>,
    ) -> (Result<()>, Result<Option<Track>>) {
        let client = self.client.clone();
        let shown = self.run(sink, running).await;
        if let Err(e) = &shown {
            tracing::error!("Display stopped: {}", e);
        }
        let stopped = client.stop_tracking().await;
        (shown, stopped)
    }

    async fn render_while<S: RefreshSink>(&self, sink: &mut S, running: &AtomicBool) -> Result<()> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while running.load(Ordering::Relaxed) {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let frame = self.frame();
            sink.render(&frame)?;
        }
        Ok(())
    }
}
