//! Outreach configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutreachError, Result};

/// Longest pacing delay accepted from config or a campaign, in seconds.
pub const MAX_PACING_DELAY_SECS: u64 = 86_400;

/// Longest backoff or claim lease accepted from config, in seconds.
pub const MAX_WAIT_SECS: u64 = 30 * 86_400;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutreachConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub claims: ClaimConfig,
}

impl OutreachConfig {
    /// Load config from the default path (~/.outreach/config.toml).
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
            .map_err(|e| OutreachError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.pacing.min_delay_secs > self.pacing.max_delay_secs {
            return Err(OutreachError::Config(format!(
                "pacing.min_delay_secs ({}) exceeds pacing.max_delay_secs ({})",
                self.pacing.min_delay_secs, self.pacing.max_delay_secs
            )));
        }
        if self.pacing.max_delay_secs > MAX_PACING_DELAY_SECS {
            return Err(OutreachError::Config(format!(
                "pacing.max_delay_secs must not exceed {MAX_PACING_DELAY_SECS}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(OutreachError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_backoff_secs > self.retry.max_backoff_secs {
            return Err(OutreachError::Config(
                "retry.base_backoff_secs exceeds retry.max_backoff_secs".into(),
            ));
        }
        if self.retry.max_backoff_secs > MAX_WAIT_SECS {
            return Err(OutreachError::Config(format!(
                "retry.max_backoff_secs must not exceed {MAX_WAIT_SECS}"
            )));
        }
        if self.claims.stale_after_secs == 0 || self.claims.stale_after_secs > MAX_WAIT_SECS {
            return Err(OutreachError::Config(format!(
                "claims.stale_after_secs must be between 1 and {MAX_WAIT_SECS}"
            )));
        }
        if self.claims.max_batch_size == 0 || self.claims.default_max_in_flight == 0 {
            return Err(OutreachError::Config(
                "claims.max_batch_size and claims.default_max_in_flight must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Outreach home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outreach")
    }
}

/// HTTP polling endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    /// SQLite busy timeout: how long a writer waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Deadline for one store round trip issued by a request handler.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_store_path() -> String { "~/.outreach/outreach.db".into() }
fn default_busy_timeout_ms() -> u64 { 5000 }
fn default_op_timeout_ms() -> u64 { 3000 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

/// Per-account send pacing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_min_delay_secs() -> u64 { 5 }
fn default_max_delay_secs() -> u64 { 15 }

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Retry ceiling and exponential backoff bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_backoff_secs() -> u64 { 30 }
fn default_max_backoff_secs() -> u64 { 3600 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

/// Claim sizing and liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Claims older than this without a report are reclaimed.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
    /// In-flight budget for accounts registered without an explicit one.
    #[serde(default = "default_max_in_flight")]
    pub default_max_in_flight: u32,
}

fn default_stale_after_secs() -> u64 { 600 }
fn default_batch_size() -> u32 { 1 }
fn default_max_batch_size() -> u32 { 10 }
fn default_max_in_flight() -> u32 { 5 }

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            default_max_in_flight: default_max_in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OutreachConfig::default();
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.pacing.min_delay_secs, 5);
        assert_eq!(config.pacing.max_delay_secs, 15);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_backoff_secs, 30);
        assert_eq!(config.claims.stale_after_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [pacing]
            min_delay_secs = 20
            max_delay_secs = 60

            [retry]
            max_attempts = 5
        "#;

        let config: OutreachConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pacing.min_delay_secs, 20);
        assert_eq!(config.pacing.max_delay_secs, 60);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_backoff_secs, 30);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: OutreachConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.claims.max_batch_size, 10);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = OutreachConfig::default();
        config.pacing.min_delay_secs = 30;
        config.pacing.max_delay_secs = 10;
        assert!(matches!(config.validate(), Err(OutreachError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = OutreachConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_durations() {
        let mut config = OutreachConfig::default();
        config.retry.max_backoff_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(OutreachError::Config(_))));

        let mut config = OutreachConfig::default();
        config.claims.stale_after_secs = u64::MAX / 1000 + 1;
        assert!(config.validate().is_err());

        let mut config = OutreachConfig::default();
        config.pacing.min_delay_secs = MAX_PACING_DELAY_SECS;
        config.pacing.max_delay_secs = MAX_PACING_DELAY_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = OutreachConfig::default();
        config.retry.max_backoff_secs = MAX_WAIT_SECS;
        config.claims.stale_after_secs = MAX_WAIT_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = OutreachConfig::default();
        config.gateway.port = 8088;
        config.save_to(&path).unwrap();

        let loaded = OutreachConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 8088);
    }
}
