use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, UssdError};

/// Top-level configuration for a ussdflow application.
///
/// Loadable from a TOML file. Each section covers one concern: app identity
/// and menu graph entry point, session lifetime, and the audit pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UssdConfig {
    pub app: AppConfig,
    pub session: SessionConfig,
    pub audit: AuditConfig,
}

impl UssdConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UssdConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate fields the engine cannot default sensibly.
    pub fn validate(&self) -> Result<()> {
        if self.app.name.is_empty() {
            return Err(UssdError::Config("missing app name".to_string()));
        }
        if self.app.home_menu.is_empty() {
            return Err(UssdError::Config("missing home menu".to_string()));
        }
        Ok(())
    }
}

/// Application identity and menu graph entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, used as the cache key namespace.
    pub name: String,
    /// Name of the menu rendered for brand-new sessions.
    pub home_menu: String,
    /// Language code used when a session has not chosen one.
    pub default_language: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            home_menu: String::new(),
            default_language: "en".to_string(),
        }
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard cap on total session duration in seconds. Applied once, when
    /// the session is first observed; never refreshed per step.
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

/// Audit pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether interaction logs are recorded at all.
    pub enabled: bool,
    /// Directory for spill files written after failed bulk inserts.
    /// Created lazily on first spill.
    pub spill_dir: String,
    /// Initial capacity of the enqueue channel. Grows 1.5x whenever the
    /// writer observes the channel full; never shrinks.
    pub channel_capacity: usize,
    /// Batch writer wake interval in seconds.
    pub flush_interval_secs: u64,
    /// Recovery scanner interval in seconds.
    pub scan_interval_secs: u64,
    /// Rows per insert chunk when replaying spill files.
    pub chunk_size: usize,
    /// Audit log table name.
    pub table_name: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spill_dir: "failed-bulk-inserts".to_string(),
            channel_capacity: 1000,
            flush_interval_secs: 5,
            scan_interval_secs: 30,
            chunk_size: 1000,
            table_name: "ussd_logs".to_string(),
        }
    }
}
