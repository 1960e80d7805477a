// src/storage/mod.rs
//! Persistence boundary for tracks and the tracklist index

mod file;
mod worker;

pub use file::FileTrackStore;
pub use worker::{PersistenceHandle, PersistenceWorker, StorageErrorReport};

use crate::error::Result;
use crate::track::{MapCenter, Track};
use crate::tracklist::TracklistElement;
use std::path::{Path, PathBuf};

/// Durable storage for track records.
///
/// Implementations may assume callers never run two mutations for the same id
/// concurrently; `PersistenceWorker` provides that guarantee.
pub trait TrackStore: Send {
    /// Fill in storage and export locations before a first save
    fn assign_locations(&self, _track: &mut Track) {}

    /// Persist the full track record and upsert its tracklist element
    fn save(&mut self, track: &Track) -> Result<()>;

    /// Load a track record, migrating older formats
    fn load(&self, id: i64) -> Result<Track>;

    /// Remove the track record, its GPX export and its tracklist element
    fn delete(&mut self, id: i64) -> Result<()>;

    fn rename(&mut self, id: i64, name: &str) -> Result<()>;

    fn set_starred(&mut self, id: i64, starred: bool) -> Result<()>;

    fn update_map_center(&mut self, id: i64, center: MapCenter) -> Result<()>;

    /// Write GPX into a directory (conventional file name) or to a file path.
    /// Returns the path written.
    fn export_gpx(&mut self, track: &Track, destination: &Path) -> Result<PathBuf>;

    /// Summaries of all persisted tracks
    fn list_summaries(&self) -> Result<Vec<TracklistElement>>;
}
