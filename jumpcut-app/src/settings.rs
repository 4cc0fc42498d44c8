//! Persistent host settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use jumpcut_core::Settings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    #[serde(flatten)]
    pub playback: Settings,
    /// Controller tick period in simulated milliseconds.
    pub tick_interval_ms: u64,
    /// Simulate an engine with a variable delay stage instead of seeking back.
    pub stretching: bool,
    /// Offer a mirror to the lookahead. Off simulates an unmirrorable source.
    pub lookahead_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            playback: Settings::default(),
            tick_interval_ms: 10,
            stretching: false,
            lookahead_enabled: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.playback.normalize();
        self.tick_interval_ms = self.tick_interval_ms.clamp(1, 250);
    }

    pub fn tick_interval(&self) -> f64 {
        self.tick_interval_ms as f64 / 1_000.0
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Jumpcut")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("jumpcut")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
