// src/error.rs
//! Error types for the movement recorder

use std::fmt;

pub type Result<T> = std::result::Result<T, TrackbookError>;

#[derive(Debug)]
pub enum TrackbookError {
    Io(std::io::Error),
    Connection(String),
    Parse(String),
    /// Location access was not granted by the OS
    PermissionDenied(String),
    /// No location source is delivering fixes
    ProviderUnavailable(String),
    /// Save, load, delete or export failed; in-memory state is retained
    StorageFailure(String),
    /// The referenced track id does not exist (any more)
    NotFound(i64),
    /// A recording transition was requested in the wrong state
    InvalidState(String),
    Config(String),
    Other(String),
}

impl TrackbookError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackbookError::NotFound(_))
    }
}

impl fmt::Display for TrackbookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackbookError::Io(e) => write!(f, "IO error: {}", e),
            TrackbookError::Connection(msg) => write!(f, "Connection error: {}", msg),
            TrackbookError::Parse(msg) => write!(f, "Parse error: {}", msg),
            TrackbookError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            TrackbookError::ProviderUnavailable(msg) => {
                write!(f, "Location provider unavailable: {}", msg)
            }
            TrackbookError::StorageFailure(msg) => write!(f, "Storage failure: {}", msg),
            TrackbookError::NotFound(id) => write!(f, "Track {} not found", id),
            TrackbookError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            TrackbookError::Config(msg) => write!(f, "Configuration error: {}", msg),
            TrackbookError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for TrackbookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackbookError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrackbookError {
    fn from(error: std::io::Error) -> Self {
        TrackbookError::Io(error)
    }
}

impl From<anyhow::Error> for TrackbookError {
    fn from(error: anyhow::Error) -> Self {
        TrackbookError::Other(error.to_string())
    }
}
