// src/storage/file.rs
//! JSON file storage for tracks and the tracklist index

use super::TrackStore;
use crate::error::{Result, TrackbookError};
use crate::gpx::{self, GPX_FILE_EXTENSION};
use crate::track::{MapCenter, Track};
use crate::tracklist::{Tracklist, TracklistElement};
use std::fs;
use std::path::{Path, PathBuf};

const TRACKS_FOLDER: &str = "tracks";
const GPX_FOLDER: &str = "gpx";
const TRACKLIST_FILE: &str = "tracklist.json";

/// Stores `tracks/<id>.json`, `gpx/<date>.gpx` and `tracklist.json` under one root
#[derive(Debug, Clone)]
pub struct FileTrackStore {
    root: PathBuf,
}

fn storage_error(operation: &str, path: &Path, error: impl std::fmt::Display) -> TrackbookError {
    TrackbookError::StorageFailure(format!("{} {}: {}", operation, path.display(), error))
}

impl FileTrackStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        for dir in [root.join(TRACKS_FOLDER), root.join(GPX_FOLDER)] {
            fs::create_dir_all(&dir).map_err(|e| storage_error("Failed to create", &dir, e))?;
        }
        Ok(Self { root })
    }

    /// Default storage root: `$HOME/.local/share/trackbook`
    pub fn default_root() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| TrackbookError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".local").join("share").join("trackbook"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn track_path(&self, id: i64) -> PathBuf {
        self.root.join(TRACKS_FOLDER).join(format!("{}.json", id))
    }

    fn tracklist_path(&self) -> PathBuf {
        self.root.join(TRACKLIST_FILE)
    }

    /// First free `gpx/<date>[-n].gpx` name for a track
    fn unique_gpx_path(&self, track: &Track) -> PathBuf {
        let dir = self.root.join(GPX_FOLDER);
        let base = gpx::gpx_file_name(track);
        let candidate = dir.join(&base);
        if !candidate.exists() {
            return candidate;
        }
        let stem = base.trim_end_matches(&format!(".{}", GPX_FILE_EXTENSION)).to_string();
        (2..)
            .map(|n| dir.join(format!("{}-{}.{}", stem, n, GPX_FILE_EXTENSION)))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }

    /// Write to a sibling temp file, then rename over the target
    fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(|e| storage_error("Failed to write", &tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| storage_error("Failed to replace", path, e))?;
        Ok(())
    }

    fn read_tracklist(&self) -> Result<Tracklist> {
        let path = self.tracklist_path();
        if !path.exists() {
            return Ok(Tracklist::default());
        }
        let contents = fs::read_to_string(&path).map_err(|e| storage_error("Failed to read", &path, e))?;
        serde_json::from_str(&contents).map_err(|e| storage_error("Failed to parse", &path, e))
    }

    fn write_tracklist(&self, tracklist: &Tracklist) -> Result<()> {
        let path = self.tracklist_path();
        let contents = serde_json::to_string_pretty(tracklist)
            .map_err(|e| storage_error("Failed to serialize", &path, e))?;
        Self::write_atomic(&path, &contents)
    }

    fn write_record(&self, track: &Track) -> Result<()> {
        let path = self.track_path(track.id);
        let contents = serde_json::to_string_pretty(track)
            .map_err(|e| storage_error("Failed to serialize", &path, e))?;
        Self::write_atomic(&path, &contents)
    }
}

impl TrackStore for FileTrackStore {
    /// Fill in where the record and its GPX export will live, unless already set
    fn assign_locations(&self, track: &mut Track) {
        if track.storage_location.is_none() {
            track.storage_location = Some(self.track_path(track.id));
        }
        if track.export_location.is_none() {
            track.export_location = Some(self.unique_gpx_path(track));
        }
    }

    fn save(&mut self, track: &Track) -> Result<()> {
        self.write_record(track)?;

        if let Some(ref gpx_path) = track.export_location {
            gpx::write_gpx(track, gpx_path).map_err(|e| storage_error("Failed to export", gpx_path, e))?;
        }

        let mut tracklist = self.read_tracklist()?;
        let mut element = track.to_tracklist_element();
        element.storage_location = Some(self.track_path(track.id));
        tracklist.upsert(element);
        self.write_tracklist(&tracklist)?;

        tracing::debug!("Saved track {} ({} waypoints)", track.id, track.way_points.len());
        Ok(())
    }

    fn load(&self, id: i64) -> Result<Track> {
        let path = self.track_path(id);
        if !path.exists() {
            return Err(TrackbookError::NotFound(id));
        }
        let contents = fs::read_to_string(&path).map_err(|e| storage_error("Failed to read", &path, e))?;
        let mut track: Track =
            serde_json::from_str(&contents).map_err(|e| storage_error("Failed to parse", &path, e))?;
        track.migrate();
        Ok(track)
    }

    fn delete(&mut self, id: i64) -> Result<()> {
        let path = self.track_path(id);
        let mut tracklist = self.read_tracklist()?;
        let element = tracklist.remove_element(id);

        if element.is_none() && !path.exists() {
            return Err(TrackbookError::NotFound(id));
        }

        let mut export = element.and_then(|e| e.export_location);
        if path.exists() {
            if export.is_none() {
                export = self.load(id).ok().and_then(|t| t.export_location);
            }
            fs::remove_file(&path).map_err(|e| storage_error("Failed to delete", &path, e))?;
        }
        if let Some(gpx_path) = export {
            if gpx_path.exists() {
                fs::remove_file(&gpx_path).map_err(|e| storage_error("Failed to delete", &gpx_path, e))?;
            }
        }

        self.write_tracklist(&tracklist)?;
        tracing::info!("Deleted track {}", id);
        Ok(())
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<()> {
        let mut track = self.load(id)?;
        track.name = name.to_string();
        self.save(&track)
    }

    fn set_starred(&mut self, id: i64, starred: bool) -> Result<()> {
        let mut tracklist = self.read_tracklist()?;
        let element = tracklist
            .elements
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(TrackbookError::NotFound(id))?;
        element.starred = starred;
        self.write_tracklist(&tracklist)
    }

    fn update_map_center(&mut self, id: i64, center: MapCenter) -> Result<()> {
        let mut track = self.load(id)?;
        track.map_center = center;
        self.write_record(&track)
    }

    fn export_gpx(&mut self, track: &Track, destination: &Path) -> Result<PathBuf> {
        let path = if destination.is_dir() {
            destination.join(gpx::gpx_file_name(track))
        } else {
            destination.to_path_buf()
        };
        gpx::write_gpx(track, &path).map_err(|e| storage_error("Failed to export", &path, e))?;
        tracing::info!("Exported track {} to {}", track.id, path.display());
        Ok(path)
    }

    fn list_summaries(&self) -> Result<Vec<TracklistElement>> {
        Ok(self.read_tracklist()?.elements)
    }
}
