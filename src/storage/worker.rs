// src/storage/worker.rs
//! Serialized persistence queue in front of a `TrackStore`

use super::TrackStore;
use crate::error::{Result, TrackbookError};
use crate::track::Track;
use crate::tracklist::TracklistElement;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A failed background write that nobody awaited
#[derive(Debug)]
pub struct StorageErrorReport {
    pub track_id: i64,
    pub operation: &'static str,
    pub error: TrackbookError,
    pub time: DateTime<Utc>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Save { track: Box<Track>, reply: Option<Reply<Track>> },
    Load { id: i64, reply: Reply<Track> },
    Delete { id: i64, reply: Reply<()> },
    Rename { id: i64, name: String, reply: Reply<()> },
    SetStarred { id: i64, starred: bool, reply: Reply<()> },
    ExportGpx { track: Box<Track>, destination: PathBuf, reply: Reply<PathBuf> },
    ListSummaries { reply: Reply<Vec<TracklistElement>> },
}

/// Owns the store on a dedicated blocking thread and applies commands one at a time.
///
/// Commands run strictly in submission order, so there is never more than one
/// in-flight mutation per track id and a load queued after a save observes it.
pub struct PersistenceWorker {
    handle: PersistenceHandle,
    errors: Option<mpsc::UnboundedReceiver<StorageErrorReport>>,
    join: JoinHandle<()>,
}

impl PersistenceWorker {
    /// Start the worker; must be called from within a tokio runtime
    pub fn spawn<S: TrackStore + 'static>(mut store: S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let worker_errors = error_tx.clone();
        let join = tokio::task::spawn_blocking(move || {
            while let Some(command) = rx.blocking_recv() {
                Self::apply(&mut store, command, &worker_errors);
            }
            tracing::debug!("Persistence worker stopped");
        });

        Self {
            handle: PersistenceHandle { tx },
            errors: Some(error_rx),
            join,
        }
    }

    fn apply<S: TrackStore>(store: &mut S, command: Command, errors: &mpsc::UnboundedSender<StorageErrorReport>) {
        match command {
            Command::Save { mut track, reply } => {
                store.assign_locations(&mut track);
                let result = store.save(&track).map(|_| *track.clone());
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(error) = result {
                            tracing::error!("Background save of track {} failed: {}", track.id, error);
                            let _ = errors.send(StorageErrorReport {
                                track_id: track.id,
                                operation: "save",
                                error,
                                time: Utc::now(),
                            });
                        }
                    }
                }
            }
            Command::Load { id, reply } => {
                let _ = reply.send(store.load(id));
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(store.delete(id));
            }
            Command::Rename { id, name, reply } => {
                let _ = reply.send(store.rename(id, &name));
            }
            Command::SetStarred { id, starred, reply } => {
                let _ = reply.send(store.set_starred(id, starred));
            }
            Command::ExportGpx { track, destination, reply } => {
                let _ = reply.send(store.export_gpx(&track, &destination));
            }
            Command::ListSummaries { reply } => {
                let _ = reply.send(store.list_summaries());
            }
        }
    }

    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }

    /// Receiver for failures of writes submitted with `submit_save`; can be taken once
    pub fn take_error_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<StorageErrorReport>> {
        self.errors.take()
    }

    /// Wait until every queued command has been applied.
    /// The worker exits once all handles (including clones) are dropped.
    pub async fn shutdown(self) {
        drop(self.handle);
        if let Err(e) = self.join.await {
            tracing::error!("Persistence worker panicked: {}", e);
        }
    }
}

/// Cloneable client side of the persistence queue
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<Command>,
}

fn worker_gone() -> TrackbookError {
    TrackbookError::StorageFailure("persistence worker is not running".to_string())
}

impl PersistenceHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }

    /// Save and wait for the write; returns the track with its storage locations filled in
    pub async fn save(&self, track: Track) -> Result<Track> {
        self.request(|reply| Command::Save { track: Box::new(track), reply: Some(reply) })
            .await
    }

    /// Queue a save without waiting; failures arrive on the worker's error channel
    pub fn submit_save(&self, track: Track) -> Result<()> {
        self.tx
            .send(Command::Save { track: Box::new(track), reply: None })
            .map_err(|_| worker_gone())
    }

    pub async fn load(&self, id: i64) -> Result<Track> {
        self.request(|reply| Command::Load { id, reply }).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.request(|reply| Command::Delete { id, reply }).await
    }

    pub async fn rename(&self, id: i64, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| Command::Rename { id, name, reply }).await
    }

    pub async fn set_starred(&self, id: i64, starred: bool) -> Result<()> {
        self.request(|reply| Command::SetStarred { id, starred, reply }).await
    }

    pub async fn export_gpx(&self, track: Track, destination: PathBuf) -> Result<PathBuf> {
        self.request(|reply| Command::ExportGpx { track: Box::new(track), destination, reply })
            .await
    }

    pub async fn list_summaries(&self) -> Result<Vec<TracklistElement>> {
        self.request(|reply| Command::ListSummaries { reply }).await
    }
}
