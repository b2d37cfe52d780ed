//! Configuration for Sendguard

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration (required for persistence-aware commands)
    pub database: Option<DatabaseConfig>,

    /// Evidence blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Outbound mail transport, checked by the SPF validator
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// SMTP existence probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Webhook notification configuration
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Scheduled re-check configuration
    #[serde(default)]
    pub recheck: RecheckConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (PostgreSQL)
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Evidence blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for uploaded test emails
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/sendguard/evidence")
}

/// Outbound mail transport configuration
///
/// The SPF validator checks whether the configured outbound server is
/// authorized to send for a domain. When the transport is not SMTP-based
/// there is nothing to authorize and the check is skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Transport kind: "smtp" or anything else (e.g. "api")
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Hostname of the outbound mail server (SMTP relay)
    pub host: Option<String>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            host: None,
        }
    }
}

impl OutboundConfig {
    /// Whether mail leaves through an SMTP relay
    pub fn is_smtp(&self) -> bool {
        self.transport.eq_ignore_ascii_case("smtp")
    }
}

fn default_transport() -> String {
    "smtp".to_string()
}

/// SMTP existence probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Port to connect to on the target MX host
    #[serde(default = "default_probe_port")]
    pub port: u16,

    /// Timeout for each step of the SMTP dialogue, in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Hostname announced in EHLO/HELO
    #[serde(default = "default_helo_hostname")]
    pub helo_hostname: String,

    /// Sender used for MAIL FROM in the probe
    #[serde(default = "default_probe_sender")]
    pub mail_from: String,

    /// Probe result cache lifetime, in hours
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: default_probe_port(),
            timeout_secs: default_probe_timeout(),
            helo_hostname: default_helo_hostname(),
            mail_from: default_probe_sender(),
            cache_ttl_hours: default_cache_ttl_hours(),
        }
    }
}

fn default_probe_port() -> u16 {
    25
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_helo_hostname() -> String {
    "localhost".to_string()
}

fn default_probe_sender() -> String {
    "postmaster@localhost".to_string()
}

fn default_cache_ttl_hours() -> u64 {
    24
}

/// Webhook notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Enable webhook delivery after batch runs
    #[serde(default)]
    pub enabled: bool,

    /// Webhook endpoint URL
    pub webhook_url: Option<String>,

    /// Shared secret for HMAC payload signatures
    pub secret: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            secret: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

fn default_notify_timeout() -> u64 {
    5
}

/// Scheduled re-check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecheckConfig {
    /// Enable the periodic re-check worker
    #[serde(default)]
    pub enabled: bool,

    /// Hours between re-check cycles
    #[serde(default = "default_recheck_interval")]
    pub interval_hours: u64,
}

impl Default for RecheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_recheck_interval(),
        }
    }
}

fn default_recheck_interval() -> u64 {
    24
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./sendguard.toml"),
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/sendguard/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Load configuration, falling back to defaults when no file exists.
    ///
    /// DNS-only validation needs no configuration at all; persistence-aware
    /// commands will still fail with a clear error when `database` is unset.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
