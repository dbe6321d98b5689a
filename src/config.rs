//! Configuration module for hidwatch.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Anything wrong here is fatal: a malformed option or address list aborts
//! startup, and nothing else in the process does.

use std::env;
use std::fs;

use thiserror::Error;

/// Configuration error types. All of these are startup-fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
    #[error("probe timeout ({timeout}s) is too close to the poll interval ({interval}s); the bounded probe must finish strictly within the interval")]
    TimeoutTooLarge { timeout: u64, interval: u64 },
    #[error("missing mail environment variables: {0}")]
    MissingMail(String),
    #[error("failed to read address file {path}: {source}")]
    AddressFile {
        path: String,
        source: std::io::Error,
    },
    #[error("no addresses found in {0}")]
    NoAddresses(String),
}

/// Delivery settings for the external mail API.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Endpoint alert mails are POSTed to.
    pub api_url: String,
    /// Optional bearer token for the endpoint.
    pub api_token: Option<String>,
    /// From address.
    pub from: String,
    /// Recipient list.
    pub to: Vec<String>,
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// File listing controller addresses, one per line (default: "controllers.txt")
    pub ip_file: String,
    /// Seconds between poll rounds (default: 30)
    pub interval_secs: u64,
    /// Seconds a disagreement must persist before a transition commits (default: 300)
    pub alert_after_secs: u64,
    /// Per-probe timeout in seconds, must be < interval (default: 5)
    pub probe_timeout_secs: u64,
    /// HTTP port for the dashboard (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite history database (default: "hidwatch.db")
    pub db_path: String,
    /// Optional log file; operational logs always also go to stdout.
    pub log_file: Option<String>,
    /// Mail delivery settings.
    pub mail: MailConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HIDWATCH_IP_FILE`: address list path (default: "controllers.txt")
    /// - `HIDWATCH_INTERVAL`: seconds between poll rounds (default: 30)
    /// - `HIDWATCH_ALERT_AFTER`: grace period in seconds (default: 300)
    /// - `HIDWATCH_PROBE_TIMEOUT`: per-probe timeout in seconds (default: 5)
    /// - `HIDWATCH_HTTP_PORT`: dashboard port (default: 8080)
    /// - `HIDWATCH_DB_PATH`: history database path (default: "hidwatch.db")
    /// - `HIDWATCH_LOG`: optional log file path
    /// - `MAIL_API_URL`, `MAIL_API_TOKEN` (optional), `MAIL_FROM`, `MAIL_TO`
    pub fn load() -> Result<Self, ConfigError> {
        let ip_file = env::var("HIDWATCH_IP_FILE").unwrap_or_else(|_| "controllers.txt".into());
        let interval_secs = parse_env("HIDWATCH_INTERVAL", 30)?;
        let alert_after_secs = parse_env("HIDWATCH_ALERT_AFTER", 300)?;
        let probe_timeout_secs = parse_env("HIDWATCH_PROBE_TIMEOUT", 5)?;
        let http_port: u16 = parse_env("HIDWATCH_HTTP_PORT", 8080)?;
        let db_path = env::var("HIDWATCH_DB_PATH").unwrap_or_else(|_| "hidwatch.db".into());
        let log_file = env::var("HIDWATCH_LOG").ok();

        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HIDWATCH_INTERVAL".into(),
                value: "0".into(),
            });
        }
        validate_timing(interval_secs, probe_timeout_secs)?;

        let mail = load_mail_config()?;

        Ok(Self {
            ip_file,
            interval_secs,
            alert_after_secs,
            probe_timeout_secs,
            http_port,
            db_path,
            log_file,
            mail,
        })
    }
}

/// The scheduler bounds each probe at `probe_timeout` plus a fixed margin;
/// that whole bound must stay strictly under the poll interval, or one slow
/// probe could bleed into the next round.
fn validate_timing(interval_secs: u64, probe_timeout_secs: u64) -> Result<(), ConfigError> {
    let bound = probe_timeout_secs + crate::scheduler::PROBE_BOUND_MARGIN_SECS;
    if probe_timeout_secs == 0 || bound >= interval_secs {
        return Err(ConfigError::TimeoutTooLarge {
            timeout: probe_timeout_secs,
            interval: interval_secs,
        });
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn load_mail_config() -> Result<MailConfig, ConfigError> {
    let api_url = env::var("MAIL_API_URL").ok();
    let from = env::var("MAIL_FROM").ok();
    let to = env::var("MAIL_TO").ok();

    let mut missing = Vec::new();
    if api_url.is_none() {
        missing.push("MAIL_API_URL");
    }
    if from.is_none() {
        missing.push("MAIL_FROM");
    }
    if to.is_none() {
        missing.push("MAIL_TO");
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingMail(missing.join(", ")));
    }

    let recipients: Vec<String> = to
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if recipients.is_empty() {
        return Err(ConfigError::Invalid {
            key: "MAIL_TO".into(),
            value: String::new(),
        });
    }

    Ok(MailConfig {
        api_url: api_url.unwrap_or_default(),
        api_token: env::var("MAIL_API_TOKEN").ok(),
        from: from.unwrap_or_default(),
        to: recipients,
    })
}

/// Read controller addresses from a file, one per line.
///
/// Blank lines and lines starting with `#` are skipped. Repeated identical
/// strings name the same controller and collapse to one entry, keeping the
/// first occurrence's position.
pub fn load_addresses(path: &str) -> Result<Vec<String>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::AddressFile {
        path: path.to_string(),
        source,
    })?;

    let mut addresses: Vec<String> = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !addresses.iter().any(|a| a == line) {
            addresses.push(line.to_string());
        }
    }

    if addresses.is_empty() {
        return Err(ConfigError::NoAddresses(path.to_string()));
    }

    Ok(addresses)
}
