// src/config.rs
//! Configuration stored as JSON in the user's config directory

use crate::error::{Result, TrackbookError};
use crate::preferences::Preferences;
use crate::recorder::FilterConfig;
use crate::service::LocationSource;
use crate::storage::FileTrackStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackbookConfig {
    pub source_type: String, // "gpsd" or "serial"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    /// Defaults to `$HOME/.local/share/trackbook`
    pub storage_dir: Option<PathBuf>,
    pub refresh_interval_ms: u64,
    pub filter: FilterConfig,
    pub star_tolerance_m: f64,
    pub preferences: Preferences,
}

impl Default for TrackbookConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            storage_dir: None,
            refresh_interval_ms: 1000,
            filter: FilterConfig::default(),
            star_tolerance_m: 10.0,
            preferences: Preferences::default(),
        }
    }
}

impl TrackbookConfig {
    /// Load configuration, falling back to defaults when no file exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| TrackbookError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TrackbookError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrackbookError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| TrackbookError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| TrackbookError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| TrackbookError::Config("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home).join(".config").join("trackbook").join("config.json"))
    }

    pub fn storage_root(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => FileTrackStore::default_root(),
        }
    }

    pub fn location_source(&self) -> Result<LocationSource> {
        match self.source_type.as_str() {
            "gpsd" => Ok(LocationSource::Gpsd {
                host: self.gpsd_host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: self.gpsd_port.unwrap_or(2947),
            }),
            "serial" => {
                let port = self
                    .serial_port
                    .clone()
                    .ok_or_else(|| TrackbookError::Config("serial source needs a serial_port".to_string()))?;
                Ok(LocationSource::Serial {
                    port,
                    baudrate: self.serial_baudrate.unwrap_or(9600),
                })
            }
            other => Err(TrackbookError::Config(format!("Unknown source type: {}", other))),
        }
    }

    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }
}
