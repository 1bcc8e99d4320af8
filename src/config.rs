use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::ScheduleUnit;

/// Repository configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory repository (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./vigil.db")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Repository configuration (defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub checks: CheckConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub sms: SmsConfig,

    /// Hosts inserted at startup, mostly for in-memory deployments
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Preference values written at startup when not yet present
    #[serde(default)]
    pub preferences: HashMap<String, String>,
}

/// Timeouts and certificate thresholds of the probes
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub tls_timeout_secs: u64,
    #[serde(default = "default_tls_warning_days")]
    pub tls_warning_days: i64,
    #[serde(default = "default_tls_urgent_days")]
    pub tls_urgent_days: i64,
}

impl CheckConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tls_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_timeout_secs)
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_timeout_secs(),
            tls_timeout_secs: default_timeout_secs(),
            tls_warning_days: default_tls_warning_days(),
            tls_urgent_days: default_tls_urgent_days(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_tls_warning_days() -> i64 {
    30
}

fn default_tls_urgent_days() -> i64 {
    7
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_pool")]
    pub workers: usize,
    #[serde(default = "default_mail_pool")]
    pub queue_size: usize,

    /// HTTP relay receiving mail jobs as JSON. Mail is only logged when unset.
    pub relay_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl MailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            workers: default_mail_pool(),
            queue_size: default_mail_pool(),
            relay_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_mail_pool() -> usize {
    5
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_twilio_base_url")]
    pub twilio_base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SmsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            twilio_base_url: default_twilio_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostConfig {
    pub host_name: String,
    pub url: String,
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub services: Vec<MonitoredServiceConfig>,
}

/// A pair to activate right after its host was inserted
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoredServiceConfig {
    pub service_id: i32,
    #[serde(default = "default_schedule_number")]
    pub every: i64,
    #[serde(default = "default_schedule_unit")]
    pub unit: ScheduleUnit,
}

fn default_schedule_number() -> i64 {
    3
}

fn default_schedule_unit() -> ScheduleUnit {
    ScheduleUnit::Minutes
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
