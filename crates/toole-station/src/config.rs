//! # Kiosk Configuration
//!
//! Configuration management for one kiosk station.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TOOLE_SERVER_URL=http://192.168.1.21:5000                          │
//! │     TOOLE_STORAGE_BACKEND=sqlite                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kiosk/kiosk.toml (Linux)                                 │
//! │     ~/Library/Application Support/edu.toole.kiosk/kiosk.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     100 ms poll, threshold 1000, 3 stable reads, 2 s dwell             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kiosk.toml
//! [kiosk]
//! name = "Makerspace Kiosk 1"
//! poll_interval_ms = 100
//!
//! [sensor]
//! threshold = 1000
//! stable_reads = 3
//! dwell_ms = 2000
//! removal_factor = 0.5   # optional removal latch
//!
//! [classifier]
//! url = "http://192.168.1.21:5000/identify_tool"
//! timeout_secs = 10
//!
//! [validation]
//! source = "server"   # server | directory
//! url = "http://192.168.1.21:5000/validate_user"
//!
//! [storage]
//! backend = "sqlite"  # sqlite | server
//! database_path = "/var/lib/toole/kiosk.db"
//!
//! [images]
//! root = "/var/lib/toole/captured_images"
//! temp_max_age_hours = 24
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use toole_core::DebounceConfig;

use crate::error::{StationError, StationResult};

/// Server the original station talked to.
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

// =============================================================================
// Kiosk Settings
// =============================================================================

/// Loop timing for this kiosk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskSettings {
    /// Shown on the welcome screen and in logs.
    #[serde(default = "default_kiosk_name")]
    pub name: String,

    /// Sensor poll interval (milliseconds). A configuration constant, not
    /// derived from the hardware sample rate.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Immediate re-reads after a failed sensor read before the tick is
    /// counted as a non-event.
    #[serde(default = "default_read_retries")]
    pub sensor_read_retries: u32,
}

fn default_kiosk_name() -> String {
    "TOOL-E Kiosk".to_string()
}

fn default_poll_interval() -> u64 {
    100
}

fn default_read_retries() -> u32 {
    2
}

impl Default for KioskSettings {
    fn default() -> Self {
        KioskSettings {
            name: default_kiosk_name(),
            poll_interval_ms: default_poll_interval(),
            sensor_read_retries: default_read_retries(),
        }
    }
}

// =============================================================================
// Sensor Settings
// =============================================================================

/// Debounce thresholds in calibrated load-cell units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSettings {
    #[serde(default = "default_threshold")]
    pub threshold: i64,

    #[serde(default = "default_stable_reads")]
    pub stable_reads: u32,

    #[serde(default = "default_dwell")]
    pub dwell_ms: u64,

    /// Enables the removal latch. Omitted means off.
    #[serde(default)]
    pub removal_factor: Option<f64>,

    /// Zero-weight baseline subtracted by the hardware boundary.
    #[serde(default)]
    pub zero_offset: i64,
}

fn default_threshold() -> i64 {
    1000
}

fn default_stable_reads() -> u32 {
    3
}

fn default_dwell() -> u64 {
    2000
}

impl Default for SensorSettings {
    fn default() -> Self {
        SensorSettings {
            threshold: default_threshold(),
            stable_reads: default_stable_reads(),
            dwell_ms: default_dwell(),
            removal_factor: None,
            zero_offset: 0,
        }
    }
}

impl SensorSettings {
    /// Debouncer parameters for these settings.
    pub fn debounce_config(&self) -> DebounceConfig {
        DebounceConfig {
            threshold: self.threshold,
            stable_reads: self.stable_reads,
            dwell: chrono::Duration::milliseconds(self.dwell_ms as i64),
            removal_factor: self.removal_factor,
        }
    }
}

// =============================================================================
// Classifier Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// `POST` endpoint taking a multipart `file` part.
    #[serde(default = "default_identify_url")]
    pub url: String,

    /// Images get longer than plain JSON calls.
    #[serde(default = "default_identify_timeout")]
    pub timeout_secs: u64,
}

fn default_identify_url() -> String {
    format!("{}/identify_tool", DEFAULT_SERVER_URL)
}

fn default_identify_timeout() -> u64 {
    10
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            url: default_identify_url(),
            timeout_secs: default_identify_timeout(),
        }
    }
}

// =============================================================================
// Validation Settings
// =============================================================================

/// Where user/waiver checks are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    /// The makerspace server's `/validate_user`.
    #[default]
    Server,
    /// The local `users` table.
    Directory,
}

impl std::str::FromStr for ValidationSource {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "server" | "http" => Ok(ValidationSource::Server),
            "directory" | "local" => Ok(ValidationSource::Directory),
            other => Err(StationError::InvalidConfig(format!(
                "Unknown validation source: '{}'. Valid options: server, directory",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default)]
    pub source: ValidationSource,

    #[serde(default = "default_validate_url")]
    pub url: String,

    #[serde(default = "default_network_timeout")]
    pub timeout_secs: u64,
}

fn default_validate_url() -> String {
    format!("{}/validate_user", DEFAULT_SERVER_URL)
}

fn default_network_timeout() -> u64 {
    5
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings {
            source: ValidationSource::default(),
            url: default_validate_url(),
            timeout_secs: default_network_timeout(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where finalized batches are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Local SQLite database.
    #[default]
    Sqlite,
    /// The server's `/transactions/batch`.
    Server,
}

impl std::str::FromStr for StorageBackend {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "local" => Ok(StorageBackend::Sqlite),
            "server" | "http" => Ok(StorageBackend::Server),
            other => Err(StationError::InvalidConfig(format!(
                "Unknown storage backend: '{}'. Valid options: sqlite, server",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_batch_url")]
    pub batch_url: String,

    /// Catalog used to turn tool names into server tool IDs.
    #[serde(default = "default_tools_url")]
    pub tools_url: String,

    #[serde(default = "default_network_timeout")]
    pub timeout_secs: u64,
}

fn default_batch_url() -> String {
    format!("{}/transactions/batch", DEFAULT_SERVER_URL)
}

fn default_tools_url() -> String {
    format!("{}/tools", DEFAULT_SERVER_URL)
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            backend: StorageBackend::default(),
            database_path: None,
            batch_url: default_batch_url(),
            tools_url: default_tools_url(),
            timeout_secs: default_network_timeout(),
        }
    }
}

// =============================================================================
// Image Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Holds `temp/` plus the `Yes/` and `No/` archives.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_temp_max_age")]
    pub temp_max_age_hours: u64,
}

fn default_temp_max_age() -> u64 {
    24
}

impl Default for ImageSettings {
    fn default() -> Self {
        ImageSettings {
            root: None,
            temp_max_age_hours: default_temp_max_age(),
        }
    }
}

// =============================================================================
// Main Kiosk Configuration
// =============================================================================

/// Complete kiosk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub kiosk: KioskSettings,

    #[serde(default)]
    pub sensor: SensorSettings,

    #[serde(default)]
    pub classifier: ClassifierSettings,

    #[serde(default)]
    pub validation: ValidationSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub images: ImageSettings,
}

impl KioskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kiosk.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> StationResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading kiosk config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load kiosk config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> StationResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| StationError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StationError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| StationError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Kiosk config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> StationResult<()> {
        if self.kiosk.poll_interval_ms == 0 {
            return Err(StationError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.sensor.stable_reads == 0 {
            return Err(StationError::InvalidConfig(
                "stable_reads must be at least 1".into(),
            ));
        }

        if let Some(factor) = self.sensor.removal_factor {
            if !(0.0..=1.0).contains(&factor) {
                return Err(StationError::InvalidConfig(format!(
                    "removal_factor must be between 0 and 1, got {}",
                    factor
                )));
            }
        }

        if self.classifier.timeout_secs == 0
            || self.validation.timeout_secs == 0
            || self.storage.timeout_secs == 0
        {
            return Err(StationError::InvalidConfig(
                "network timeouts must be greater than 0".into(),
            ));
        }

        url::Url::parse(&self.classifier.url)?;
        if self.validation.source == ValidationSource::Server {
            url::Url::parse(&self.validation.url)?;
        }
        if self.storage.backend == StorageBackend::Server {
            url::Url::parse(&self.storage.batch_url)?;
            url::Url::parse(&self.storage.tools_url)?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // One base URL rewrites every endpoint
        if let Ok(base) = std::env::var("TOOLE_SERVER_URL") {
            let base = base.trim_end_matches('/');
            debug!(url = %base, "Overriding server URL from environment");
            self.classifier.url = format!("{}/identify_tool", base);
            self.validation.url = format!("{}/validate_user", base);
            self.storage.batch_url = format!("{}/transactions/batch", base);
            self.storage.tools_url = format!("{}/tools", base);
        }

        if let Ok(name) = std::env::var("TOOLE_KIOSK_NAME") {
            self.kiosk.name = name;
        }

        if let Ok(threshold) = std::env::var("TOOLE_SENSOR_THRESHOLD") {
            match threshold.parse::<i64>() {
                Ok(t) => self.sensor.threshold = t,
                Err(_) => warn!(value = %threshold, "Ignoring invalid TOOLE_SENSOR_THRESHOLD"),
            }
        }

        if let Ok(source) = std::env::var("TOOLE_VALIDATION_SOURCE") {
            match source.parse() {
                Ok(parsed) => self.validation.source = parsed,
                Err(e) => warn!(error = %e, "Ignoring TOOLE_VALIDATION_SOURCE"),
            }
        }

        if let Ok(backend) = std::env::var("TOOLE_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.storage.backend = parsed,
                Err(e) => warn!(error = %e, "Ignoring TOOLE_STORAGE_BACKEND"),
            }
        }

        if let Ok(path) = std::env::var("TOOLE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Ok(root) = std::env::var("TOOLE_IMAGE_ROOT") {
            self.images.root = Some(PathBuf::from(root));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("edu", "toole", "kiosk")
            .map(|dirs| dirs.config_dir().join("kiosk.toml"))
    }

    fn default_data_dir() -> PathBuf {
        directories::ProjectDirs::from("edu", "toole", "kiosk")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.kiosk.poll_interval_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation.timeout_secs)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.timeout_secs)
    }

    pub fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.images.temp_max_age_hours * 3600)
    }

    /// SQLite file, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("kiosk.db"))
    }

    /// Image root, falling back to the platform data directory.
    pub fn image_root(&self) -> PathBuf {
        self.images
            .root
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("captured_images"))
    }
}
