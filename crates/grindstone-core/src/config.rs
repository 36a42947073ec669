//! Grindstone configuration system.
//!
//! Two layers: [`GrindConfig`] is the process config file (paths, log
//! filter, device wiring) read once at startup, and [`Settings`] is the
//! snapshot of the store's key/value settings table. Settings readers get
//! an immutable [`SettingsSnapshot`]; a reload builds a fresh snapshot and
//! swaps it atomically so no reader ever observes a half-updated set.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{GrindError, Result};
use crate::types::Setting;

/// Root process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrindConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Device backend selector ("stub" unless a real controller is wired).
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_db_path() -> String {
    GrindConfig::home_dir()
        .join("grindstone.db")
        .to_string_lossy()
        .into_owned()
}
fn default_log_filter() -> String { "info".into() }
fn default_device() -> String { "stub".into() }

impl Default for GrindConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_filter: default_log_filter(),
            device: default_device(),
        }
    }
}

impl GrindConfig {
    /// Load config from the default path (~/.grindstone/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrindError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GrindError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GrindError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Grindstone home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".grindstone")
    }
}

/// Immutable view of the store's settings table, parsed into typed fields.
/// Unknown keys are ignored; missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    /// Seconds an idle account loop sleeps before re-polling.
    pub poll_interval_secs: u64,
    /// Bound on a single device screenshot.
    pub capture_timeout_secs: u64,
    /// TTL for cached recognition results.
    pub recognition_ttl_secs: u64,
    /// Capture cache capacity (most-recent entries kept).
    pub capture_cache_size: usize,
    /// Captures older than this are stale regardless of access recency.
    pub capture_max_age_ms: u64,
    /// Recognition-result cache capacity.
    pub result_cache_size: usize,
    /// Idle gap after an account loop exhausts its time slice.
    pub idle_gap_secs: u64,
    /// Bounded attempts when navigating the state graph toward a target.
    pub navigation_attempts: u32,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            capture_timeout_secs: 10,
            recognition_ttl_secs: 10,
            capture_cache_size: 5,
            capture_max_age_ms: 3_000,
            result_cache_size: 50,
            idle_gap_secs: 300,
            navigation_attempts: 3,
        }
    }
}

impl SettingsSnapshot {
    /// Build a snapshot from raw settings rows.
    pub fn from_rows(rows: &[Setting]) -> Self {
        let mut snap = Self::default();
        for row in rows {
            let v = row.value.trim();
            match row.key.as_str() {
                "poll_interval_secs" => set_u64(&mut snap.poll_interval_secs, v, &row.key),
                "capture_timeout_secs" => set_u64(&mut snap.capture_timeout_secs, v, &row.key),
                "recognition_ttl_secs" => set_u64(&mut snap.recognition_ttl_secs, v, &row.key),
                "capture_cache_size" => set_usize(&mut snap.capture_cache_size, v, &row.key),
                "capture_max_age_ms" => set_u64(&mut snap.capture_max_age_ms, v, &row.key),
                "result_cache_size" => set_usize(&mut snap.result_cache_size, v, &row.key),
                "idle_gap_secs" => set_u64(&mut snap.idle_gap_secs, v, &row.key),
                "navigation_attempts" => set_u32(&mut snap.navigation_attempts, v, &row.key),
                _ => {}
            }
        }
        snap
    }
}

fn set_u64(slot: &mut u64, value: &str, key: &str) {
    match value.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("Ignoring malformed setting {key}={value}"),
    }
}

fn set_u32(slot: &mut u32, value: &str, key: &str) {
    match value.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("Ignoring malformed setting {key}={value}"),
    }
}

fn set_usize(slot: &mut usize, value: &str, key: &str) {
    match value.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("Ignoring malformed setting {key}={value}"),
    }
}

/// Process-wide settings handle. Reads are lock-cheap Arc clones; a reload
/// swaps the whole snapshot in one store.
pub struct Settings {
    current: RwLock<Arc<SettingsSnapshot>>,
}

impl Settings {
    pub fn new(snapshot: SettingsSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Callers hold the Arc for the duration of one
    /// decision so mid-flight reloads cannot tear their view.
    pub fn get(&self) -> Arc<SettingsSnapshot> {
        self.current.read().expect("settings lock poisoned").clone()
    }

    /// Replace the snapshot atomically.
    pub fn reload(&self, snapshot: SettingsSnapshot) {
        let mut guard = self.current.write().expect("settings lock poisoned");
        *guard = Arc::new(snapshot);
        tracing::info!("Settings reloaded");
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(SettingsSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> Setting {
        Setting {
            key: key.into(),
            value: value.into(),
            description: None,
        }
    }

    #[test]
    fn test_snapshot_from_rows() {
        let rows = vec![
            row("poll_interval_secs", "5"),
            row("recognition_ttl_secs", "20"),
            row("capture_cache_size", "8"),
            row("unknown_key", "whatever"),
            row("idle_gap_secs", "not-a-number"),
        ];
        let snap = SettingsSnapshot::from_rows(&rows);
        assert_eq!(snap.poll_interval_secs, 5);
        assert_eq!(snap.recognition_ttl_secs, 20);
        assert_eq!(snap.capture_cache_size, 8);
        // Malformed value keeps the default.
        assert_eq!(snap.idle_gap_secs, 300);
    }

    #[test]
    fn test_reload_swaps_atomically() {
        let settings = Settings::default();
        let before = settings.get();
        assert_eq!(before.poll_interval_secs, 30);

        let mut next = SettingsSnapshot::default();
        next.poll_interval_secs = 1;
        settings.reload(next);

        // The old snapshot is unchanged; new readers see the new one.
        assert_eq!(before.poll_interval_secs, 30);
        assert_eq!(settings.get().poll_interval_secs, 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = GrindConfig::default();
        assert_eq!(config.device, "stub");
        assert!(config.db_path.ends_with("grindstone.db"));
    }
}
