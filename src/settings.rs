//! Persisted user preferences.

use crate::{CrowError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

const APP_DIR: &str = "crow-client";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Folder the image picker opened last.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            image_dir: None,
        }
    }
}

impl Settings {
    /// `<config dir>/crow-client/settings.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Loads from the default location. Missing or unreadable settings fall
    /// back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path().ok_or_else(|| {
            CrowError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no configuration directory on this platform",
            ))
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Replaces the server URL. Blank input is rejected and leaves the
    /// current value untouched.
    pub fn set_server_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(CrowError::InvalidServerUrl(url.to_string()));
        }
        self.server_url = url.to_string();
        Ok(())
    }

    /// Where the image picker should start: the last used folder, else home.
    pub fn browse_dir(&self) -> PathBuf {
        self.image_dir
            .clone()
            .filter(|dir| dir.is_dir())
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
