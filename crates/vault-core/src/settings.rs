//! Application settings management
//!
//! Stores non-sensitive configuration in a plain JSON file next to the
//! vault. Settings are readable while the vault is locked.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::crypto::KeyDerivationParams;
use crate::error::{Result, VaultError};

/// Default idle threshold before auto-lock: 5 minutes
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5 * 60;

/// Default period of the auto-lock check
pub const DEFAULT_IDLE_CHECK_INTERVAL_SECS: u64 = 10;

/// Default breach-lookup endpoint (k-anonymity range API)
pub const DEFAULT_BREACH_ENDPOINT: &str = "https://api.pwnedpasswords.com";

/// Breach-check configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreachCheckSettings {
    /// Whether breach lookups are performed at all
    pub enabled: bool,
    /// Base URL of the range API
    pub endpoint: String,
    /// Upper bound on a single lookup
    pub timeout_secs: u64,
}

impl Default for BreachCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_BREACH_ENDPOINT.to_string(),
            timeout_secs: 10,
        }
    }
}

impl BreachCheckSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settings file version
    pub version: u32,
    /// Idle seconds before an unlocked vault locks itself (0 = never)
    pub idle_timeout_secs: u64,
    /// How often the auto-lock task checks for idleness
    pub idle_check_interval_secs: u64,
    /// Work factor for new vault keys
    pub kdf: KeyDerivationParams,
    /// Work factor for new master-secret verifiers
    pub verifier_kdf: KeyDerivationParams,
    /// Breach-check configuration
    pub breach_check: BreachCheckSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            idle_check_interval_secs: DEFAULT_IDLE_CHECK_INTERVAL_SECS,
            kdf: KeyDerivationParams::default(),
            verifier_kdf: KeyDerivationParams::default(),
            breach_check: BreachCheckSettings::default(),
        }
    }
}

impl Settings {
    /// Idle threshold, or `None` when auto-lock is disabled
    pub fn idle_timeout(&self) -> Option<chrono::Duration> {
        if self.idle_timeout_secs == 0 {
            return None;
        }
        i64::try_from(self.idle_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }

    /// Reject settings the vault cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs != 0 && self.idle_timeout().is_none() {
            return Err(VaultError::ValidationError(format!(
                "idle timeout of {}s is out of range",
                self.idle_timeout_secs
            )));
        }
        self.kdf.validate()?;
        self.verifier_kdf.validate()?;
        if self.breach_check.enabled {
            url::Url::parse(&self.breach_check.endpoint).map_err(|e| {
                VaultError::ValidationError(format!("invalid breach endpoint: {}", e))
            })?;
        }
        Ok(())
    }
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Create a new settings manager for the given storage directory
    pub fn new(storage_dir: &Path) -> Self {
        let settings_file = storage_dir.join("settings.json");
        let settings = match Self::load_from_file(&settings_file) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable settings file: {}", e);
                Settings::default()
            }
        };

        Self {
            settings_file,
            settings,
        }
    }

    /// Load settings from file
    fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| VaultError::PersistenceError(e.to_string()))?;
        let settings: Settings = serde_json::from_str(&contents)?;
        settings.validate()?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        self.settings.validate()?;
        let contents = serde_json::to_string_pretty(&self.settings)?;

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| VaultError::PersistenceError(e.to_string()))?;
        tokio::fs::rename(&temp_path, &self.settings_file)
            .await
            .map_err(|e| VaultError::PersistenceError(e.to_string()))?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Set the idle timeout and save
    pub async fn set_idle_timeout(&mut self, secs: u64) -> Result<()> {
        let mut next = self.settings.clone();
        next.idle_timeout_secs = secs;
        next.validate()?;

        self.settings = next;
        self.save().await
    }
}
