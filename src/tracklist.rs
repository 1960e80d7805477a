// src/tracklist.rs
//! Lightweight index of all recorded tracks

use crate::error::{Result, TrackbookError};
use crate::storage::TrackStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CURRENT_TRACKLIST_FORMAT_VERSION: u32 = 1;

/// Denormalized summary of a track, enough to render a list row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracklistElement {
    pub id: i64,
    pub name: String,
    pub date: DateTime<Utc>,
    pub date_string: String,
    pub distance: f32,
    pub duration: i64,
    #[serde(default)]
    pub storage_location: Option<PathBuf>,
    #[serde(default)]
    pub export_location: Option<PathBuf>,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracklist {
    #[serde(default)]
    pub format_version: u32,
    pub modification_date: DateTime<Utc>,
    #[serde(default)]
    pub elements: Vec<TracklistElement>,
}

impl Default for Tracklist {
    fn default() -> Self {
        Self {
            format_version: CURRENT_TRACKLIST_FORMAT_VERSION,
            modification_date: Utc::now(),
            elements: Vec::new(),
        }
    }
}

impl Tracklist {
    pub fn new(elements: Vec<TracklistElement>) -> Self {
        let mut tracklist = Self {
            elements,
            ..Self::default()
        };
        tracklist.sort_by_date_desc();
        tracklist
    }

    /// Build the list from the persisted summaries
    pub fn load(store: &dyn TrackStore) -> Result<Self> {
        Ok(Self::new(store.list_summaries()?))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Sum of all track distances in meters
    pub fn total_distance(&self) -> f32 {
        self.elements.iter().map(|e| e.distance).sum()
    }

    pub fn total_duration(&self) -> i64 {
        self.elements.iter().map(|e| e.duration).sum()
    }

    /// Newest recording first; equal dates keep their current order
    pub fn sort_by_date_desc(&mut self) {
        self.elements.sort_by(|a, b| b.date.cmp(&a.date));
    }

    pub fn find(&self, id: i64) -> Option<&TracklistElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn position(&self, id: i64) -> Result<usize> {
        self.elements
            .iter()
            .position(|e| e.id == id)
            .ok_or(TrackbookError::NotFound(id))
    }

    /// Insert or replace the element for a track, keeping the starred flag
    pub fn upsert(&mut self, mut element: TracklistElement) {
        match self.elements.iter_mut().find(|e| e.id == element.id) {
            Some(existing) => {
                element.starred = existing.starred;
                *existing = element;
            }
            None => self.elements.push(element),
        }
        self.sort_by_date_desc();
        self.modification_date = Utc::now();
    }

    /// Remove an element without touching storage
    pub fn remove_element(&mut self, id: i64) -> Option<TracklistElement> {
        let index = self.elements.iter().position(|e| e.id == id)?;
        self.modification_date = Utc::now();
        Some(self.elements.remove(index))
    }

    /// Delete the track behind `id` and drop its element.
    /// The list stays unchanged when the id is unknown or the store fails.
    pub fn remove_by_id(&mut self, id: i64, store: &mut dyn TrackStore) -> Result<TracklistElement> {
        let index = self.position(id)?;
        store.delete(id)?;
        self.modification_date = Utc::now();
        Ok(self.elements.remove(index))
    }

    pub fn rename(&mut self, id: i64, name: &str, store: &mut dyn TrackStore) -> Result<()> {
        let index = self.position(id)?;
        store.rename(id, name)?;
        self.elements[index].name = name.to_string();
        self.modification_date = Utc::now();
        Ok(())
    }

    /// Flip the starred flag of a list entry and persist it; returns the new value
    pub fn toggle_starred(&mut self, id: i64, store: &mut dyn TrackStore) -> Result<bool> {
        let index = self.position(id)?;
        let starred = !self.elements[index].starred;
        store.set_starred(id, starred)?;
        self.elements[index].starred = starred;
        self.modification_date = Utc::now();
        Ok(starred)
    }
}
