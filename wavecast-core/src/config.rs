//! Station configuration.
//!
//! All the product tuning values live here as configurable fields with the
//! shipped defaults: the heartbeat interval, both drift thresholds, the
//! ducking linger, and the bulletin pacing. They are tuning values, not
//! invariants, so deployments can adjust them without a rebuild.

use crate::driver::AdvancePolicy;
use crate::drift::DriftThresholds;
use crate::error::{CoreError, Result};
use crate::library::TrackRef;
use crate::narration::NarrationSettings;
use crate::reconcile::ReconcilerSettings;
use crate::session::Role;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StationConfig {
    #[serde(default)]
    pub station: StationSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub ducking: DuckingSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub speech: SpeechSection,
    #[serde(default)]
    pub library: LibrarySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSection {
    #[serde(default = "default_station_name")]
    pub name: String,
    #[serde(default)]
    pub role: RoleSetting,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_drift_check_ms")]
    pub drift_check_ms: u64,
    #[serde(default)]
    pub advance: AdvanceSetting,
    /// Video feed to go live on at startup (admin role).
    pub tv_feed: Option<String>,
}

fn default_station_name() -> String {
    "Wavecast".to_string()
}

const fn default_heartbeat_ms() -> u64 {
    2_000
}

const fn default_drift_check_ms() -> u64 {
    1_000
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            role: RoleSetting::default(),
            heartbeat_ms: default_heartbeat_ms(),
            drift_check_ms: default_drift_check_ms(),
            advance: AdvanceSetting::default(),
            tv_feed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleSetting {
    Admin,
    #[default]
    Listener,
}

impl RoleSetting {
    #[must_use]
    pub const fn to_role(self) -> Role {
        match self {
            Self::Admin => Role::Admin,
            Self::Listener => Role::Listener,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceSetting {
    Sequential,
    #[default]
    Shuffle,
}

impl AdvanceSetting {
    #[must_use]
    pub const fn to_policy(self) -> AdvancePolicy {
        match self {
            Self::Sequential => AdvancePolicy::Sequential,
            Self::Shuffle => AdvancePolicy::Shuffle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Drift threshold at load/join moments.
    #[serde(default = "default_initial_threshold")]
    pub initial_drift_threshold_secs: f64,
    /// Steady-state drift threshold; also the snapshot hysteresis band.
    #[serde(default = "default_steady_threshold")]
    pub steady_drift_threshold_secs: f64,
    #[serde(default = "default_stall_check_limit")]
    pub stall_check_limit: u32,
}

const fn default_initial_threshold() -> f64 {
    1.5
}

const fn default_steady_threshold() -> f64 {
    4.0
}

const fn default_stall_check_limit() -> u32 {
    2
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            initial_drift_threshold_secs: default_initial_threshold(),
            steady_drift_threshold_secs: default_steady_threshold(),
            stall_check_limit: default_stall_check_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckingSection {
    /// Delay before the music gain comes back after the last bulletin.
    #[serde(default = "default_release_linger_ms")]
    pub release_linger_ms: u64,
    /// Pause between the opening jingle and the narration.
    #[serde(default = "default_pacing_pause_ms")]
    pub pacing_pause_ms: u64,
    #[serde(default = "default_bed_volume")]
    pub bed_volume: f32,
}

const fn default_release_linger_ms() -> u64 {
    250
}

const fn default_pacing_pause_ms() -> u64 {
    600
}

const fn default_bed_volume() -> f32 {
    0.2
}

impl Default for DuckingSection {
    fn default() -> Self {
        Self {
            release_linger_ms: default_release_linger_ms(),
            pacing_pause_ms: default_pacing_pause_ms(),
            bed_volume: default_bed_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub api_key: Option<String>,
}

fn default_store_endpoint() -> String {
    "http://127.0.0.1:8090".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            endpoint: default_store_endpoint(),
            poll_interval_ms: default_poll_interval_ms(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSection {
    #[serde(default)]
    pub endpoint: String,
    pub api_key: Option<String>,
    pub voice: Option<String>,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for SpeechSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            voice: None,
            cache_enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LibrarySection {
    #[serde(default)]
    pub tracks: Vec<TrackEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEntry {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
}

impl From<TrackEntry> for TrackRef {
    fn from(entry: TrackEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            url: entry.url,
        }
    }
}

impl StationConfig {
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load the config, writing a template and erroring on first run.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConfigNotFound`] when the template was just created;
    /// parse errors when the file exists but is invalid.
    pub fn load_or_create() -> Result<Self> {
        let path = Self::config_path();
        Self::load_or_create_at(&path)
    }

    /// Same as [`Self::load_or_create`] for an explicit path.
    ///
    /// # Errors
    ///
    /// See [`Self::load_or_create`].
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, build_config_template())?;
            return Err(CoreError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a parse error for invalid TOML, or
    /// [`CoreError::ConfigInvalid`] for out-of-range values.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.station.heartbeat_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "station.heartbeat_ms must be positive".to_string(),
            });
        }
        if self.sync.initial_drift_threshold_secs <= 0.0
            || self.sync.steady_drift_threshold_secs <= 0.0
        {
            return Err(CoreError::ConfigInvalid {
                message: "sync drift thresholds must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ducking.bed_volume) {
            return Err(CoreError::ConfigInvalid {
                message: "ducking.bed_volume must be within 0.0..=1.0".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.station.heartbeat_ms)
    }

    #[must_use]
    pub fn release_linger(&self) -> Duration {
        Duration::from_millis(self.ducking.release_linger_ms)
    }

    #[must_use]
    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            drift_check_interval: Duration::from_millis(self.station.drift_check_ms),
            thresholds: DriftThresholds {
                initial_secs: self.sync.initial_drift_threshold_secs,
                steady_secs: self.sync.steady_drift_threshold_secs,
            },
            stall_check_limit: self.sync.stall_check_limit,
        }
    }

    #[must_use]
    pub fn narration_settings(&self) -> NarrationSettings {
        NarrationSettings {
            pacing_pause: Duration::from_millis(self.ducking.pacing_pause_ms),
            bed_volume: self.ducking.bed_volume,
            voice: self.speech.voice.clone(),
        }
    }
}

/// The TOML template written on first run.
#[must_use]
pub fn build_config_template() -> String {
    r#"# Wavecast station configuration

[station]
name = "Wavecast"
# "admin" controls the broadcast; "listener" follows it.
role = "listener"
heartbeat_ms = 2000
drift_check_ms = 1000
# "sequential" or "shuffle"
advance = "shuffle"
# Video feed to go live on at startup (admin role).
# tv_feed = "https://video.example/live"

[sync]
initial_drift_threshold_secs = 1.5
steady_drift_threshold_secs = 4.0
stall_check_limit = 2

[ducking]
release_linger_ms = 250
pacing_pause_ms = 600
bed_volume = 0.2

[store]
endpoint = "http://127.0.0.1:8090"
poll_interval_ms = 1000
# api_key = "..."

[speech]
endpoint = ""
# api_key = "..."
# voice = "newsreader"
cache_enabled = true

# Local media catalog; listeners use it to resolve tracks by id.
# [[library.tracks]]
# id = "t1"
# name = "First Track"
# url = "https://cdn.example/t1.mp3"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_with_defaults() {
        let config = StationConfig::from_toml(&build_config_template()).unwrap();
        assert_eq!(config.station.heartbeat_ms, 2_000);
        assert_eq!(config.station.role, RoleSetting::Listener);
        assert!((config.sync.initial_drift_threshold_secs - 1.5).abs() < f64::EPSILON);
        assert!((config.sync.steady_drift_threshold_secs - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.ducking.release_linger_ms, 250);
        assert!(config.speech.cache_enabled);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = StationConfig::from_toml("").unwrap();
        assert_eq!(config.station.name, "Wavecast");
        assert_eq!(config.station.heartbeat_ms, 2_000);
        assert_eq!(config.store.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = StationConfig::from_toml(
            r#"
[station]
role = "admin"
heartbeat_ms = 500

[[library.tracks]]
id = "t1"
name = "First"
url = "https://cdn.example/t1.mp3"
"#,
        )
        .unwrap();
        assert_eq!(config.station.role, RoleSetting::Admin);
        assert_eq!(config.station.heartbeat_ms, 500);
        assert_eq!(config.library.tracks.len(), 1);
        // Unspecified sections keep their defaults.
        assert!((config.sync.steady_drift_threshold_secs - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(StationConfig::from_toml("[station]\nheartbeat_ms = 0\n").is_err());
        assert!(StationConfig::from_toml("[ducking]\nbed_volume = 1.5\n").is_err());
        assert!(StationConfig::from_toml("not valid toml [").is_err());
    }
}
