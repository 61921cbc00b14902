use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Store config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the profile database and other local state.
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: ".prosync".to_string(),
        }
    }
}

impl StoreConfig {
    /// Full path of the redb database file inside `data_dir`.
    pub fn db_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("profiles.redb")
    }
}

// ── File sync config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSyncConfig {
    pub enabled: bool,
    /// Shared sync file watched for external edits and mirrored on local
    /// changes.  Overridden at runtime by `PROSYNC_SYNC_FILE` when set.
    pub path: String,
    /// Quiet window after a filesystem event before the import runs, so a
    /// burst of writes from the peer collapses into one import.
    pub debounce_ms: u64,
}

impl Default for FileSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: ".prosync/profiles-sync.json".to_string(),
            debounce_ms: 400,
        }
    }
}

// ── Push server config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    /// Loopback port for the push sync server.  Overridden at runtime by
    /// `PROSYNC_PORT` when set.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8765,
        }
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// ── AppConfig ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub file_sync: FileSyncConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("PROSYNC_SYNC_FILE") {
            if !value.is_empty() {
                config.file_sync.path = value;
            }
        }

        if let Ok(value) = env::var("PROSYNC_PORT") {
            if let Ok(port) = value.parse::<u16>() {
                config.server.port = port;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
