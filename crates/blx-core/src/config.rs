//! BLX configuration system.
//!
//! TOML file with per-section defaults; secrets can be supplied through
//! environment variables so the config file stays checked-in safe.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BlxError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlxConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// SQLite store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.blx/blx.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_from_address() -> String {
    "noreply@bluxacorp.com".into()
}
fn default_display_name() -> String {
    "BLuxA Corp".into()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            display_name: default_display_name(),
        }
    }
}

/// WhatsApp relay endpoint (JSON POST `{phone, message}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_send_timeout")]
    pub timeout_secs: u64,
}

fn default_send_timeout() -> u64 {
    30
}

/// Payment-gateway webhook verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub webhook_secret: String,
    /// Maximum accepted age of a signed webhook timestamp.
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
}

fn default_tolerance() -> i64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            signature_tolerance_secs: default_tolerance(),
        }
    }
}

/// Retry-scheduler cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Normal interval between retry cycles.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Shorter interval used after a cycle-level failure.
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_secs: u64,
}

fn default_retry_interval() -> u64 {
    300
}
fn default_recovery_interval() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval(),
            recovery_interval_secs: default_recovery_interval(),
        }
    }
}

impl BlxConfig {
    /// Default config directory (`~/.blx`).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".blx")
    }

    /// Default config file path (`~/.blx/config.toml`).
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load from a TOML file, then apply environment overrides. A missing
    /// file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| BlxError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BLX_SMTP_PASSWORD") {
            self.email.password = v;
        }
        if let Ok(v) = std::env::var("BLX_WHATSAPP_WEBHOOK_URL") {
            self.whatsapp.webhook_url = v;
            self.whatsapp.enabled = !self.whatsapp.webhook_url.is_empty();
        }
        if let Ok(v) = std::env::var("BLX_GATEWAY_WEBHOOK_SECRET") {
            self.gateway.webhook_secret = v;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).map_err(|e| BlxError::Config(format!("serialize: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
