//! Configuration: TOML file, environment overrides, validation.
//!
//! Resolution order is file first, then environment variables on top; the
//! environment always wins. The manager URL and API key are required.
//! A missing webhook secret is auto-generated so the endpoint is never
//! silently unauthenticated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

/// Locations tried when no `--config` path is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &["config.toml", "config/config.toml"];

/// Placeholder API keys shipped in docs that must never reach production.
const PLACEHOLDER_API_KEYS: &[&str] = &["your-api-key", "your-api-key-here", "changeme"];

const DEFAULT_PRIVATE_TRACKERS: &[&str] = &[
    "beyondhd",
    "bhd",
    "privatehd",
    "passthepopcorn",
    "ptp",
    "broadcasthenet",
    "btn",
    "redacted",
    "orpheus",
];

const DEFAULT_PUBLIC_TRACKERS: &[&str] = &[
    "nyaa",
    "animetosho",
    "rarbg",
    "1337x",
    "thepiratebay",
    "yts",
    "eztv",
    "torrentgalaxy",
];

/// Errors that make the configuration unusable. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("{0}")]
    Invalid(String),
}

// ─── File shape (everything optional) ────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub sonarr: FileSonarr,
    #[serde(default)]
    pub webhook: FileWebhook,
    #[serde(default)]
    pub monitoring: FileMonitoring,
    #[serde(default)]
    pub trackers: Option<FileTrackers>,
    #[serde(default)]
    pub logging: FileLogging,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileSonarr {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_s: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileWebhook {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secret: Option<String>,
    pub import_check_delay_s: Option<u64>,
    pub rate_limit_per_min: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileMonitoring {
    pub interval_s: Option<u64>,
    pub force_import_threshold: Option<i64>,
    pub remove_public_failures: Option<bool>,
    pub protect_private_ratio: Option<bool>,
    pub protect_unknown_trackers: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileTrackers {
    #[serde(default)]
    pub private: Vec<String>,
    #[serde(default)]
    pub public: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileLogging {
    pub level: Option<String>,
    pub format: Option<String>,
}

// ─── Resolved settings ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for development.
    Text,
    /// Structured JSON for production.
    Json,
}

#[derive(Debug, Clone)]
pub struct SonarrSettings {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub secret: Option<String>,
    pub import_check_delay: Duration,
    pub rate_limit_per_min: u32,
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub interval: Duration,
    pub force_import_threshold: i64,
    pub remove_public_failures: bool,
    /// Accepted for compatibility with existing deployments; private-class
    /// items are never auto-removed regardless of this flag.
    pub protect_private_ratio: bool,
    pub protect_unknown_trackers: bool,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub private: Vec<String>,
    pub public: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sonarr: SonarrSettings,
    pub webhook: WebhookSettings,
    pub monitoring: MonitoringSettings,
    pub trackers: TrackerSettings,
    pub logging: LoggingSettings,
    pub dry_run: bool,
    /// True when the webhook secret was generated this startup; the caller
    /// logs it once so the operator can configure the manager side.
    pub webhook_secret_generated: bool,
}

impl AppConfig {
    /// Loads configuration from an optional file path and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = read_file_config(path)?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::resolve(file, &env)
    }

    /// Resolves file + environment into final settings.
    ///
    /// Split from [`AppConfig::load`] so tests can supply the environment
    /// explicitly instead of mutating the process.
    pub fn resolve(file: FileConfig, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let env_str = |key: &str| env.get(key).cloned();
        let env_bool = |key: &str| env.get(key).map(|v| parse_bool(v));
        let env_u64 = |key: &str| -> Result<Option<u64>, ConfigError> {
            env.get(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer, got {v:?}")))
                })
                .transpose()
        };
        let env_i64 = |key: &str| -> Result<Option<i64>, ConfigError> {
            env.get(key)
                .map(|v| {
                    v.parse::<i64>()
                        .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer, got {v:?}")))
                })
                .transpose()
        };

        let url = env_str("SONARR_URL")
            .or(file.sonarr.url)
            .ok_or(ConfigError::MissingRequired("sonarr.url"))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "sonarr.url must start with http:// or https://, got {url:?}"
            )));
        }

        let api_key = env_str("SONARR_API_KEY")
            .or(file.sonarr.api_key)
            .ok_or(ConfigError::MissingRequired("sonarr.api_key"))?;
        if api_key.is_empty() || PLACEHOLDER_API_KEYS.contains(&api_key.as_str()) {
            return Err(ConfigError::Invalid(
                "sonarr.api_key looks like a placeholder; set the real manager API key".to_string(),
            ));
        }

        let sonarr = SonarrSettings {
            url: url.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(
                env_u64("SONARR_TIMEOUT")?.or(file.sonarr.timeout_s).unwrap_or(30),
            ),
        };

        let configured_secret = env_str("WEBHOOK_SECRET")
            .or(file.webhook.secret)
            .filter(|s| !s.is_empty());
        let webhook_secret_generated = configured_secret.is_none();
        let secret = configured_secret.unwrap_or_else(generate_secret);

        let webhook = WebhookSettings {
            enabled: env_bool("WEBHOOK_ENABLED")
                .or(file.webhook.enabled)
                .unwrap_or(true),
            host: env_str("WEBHOOK_HOST")
                .or(file.webhook.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_u64("WEBHOOK_PORT")?
                .map(|p| p as u16)
                .or(file.webhook.port)
                .unwrap_or(8090),
            secret: Some(secret),
            import_check_delay: Duration::from_secs(
                env_u64("WEBHOOK_IMPORT_CHECK_DELAY")?
                    .or(file.webhook.import_check_delay_s)
                    .unwrap_or(600),
            ),
            rate_limit_per_min: env_u64("WEBHOOK_RATE_LIMIT_PER_MIN")?
                .map(|v| v as u32)
                .or(file.webhook.rate_limit_per_min)
                .unwrap_or(30),
        };

        let monitoring = MonitoringSettings {
            interval: Duration::from_secs(
                env_u64("MONITORING_INTERVAL")?
                    .or(file.monitoring.interval_s)
                    .unwrap_or(60),
            ),
            force_import_threshold: env_i64("FORCE_IMPORT_THRESHOLD")?
                .or(file.monitoring.force_import_threshold)
                .unwrap_or(10),
            remove_public_failures: env_bool("REMOVE_PUBLIC_FAILURES")
                .or(file.monitoring.remove_public_failures)
                .unwrap_or(true),
            protect_private_ratio: env_bool("PROTECT_PRIVATE_RATIO")
                .or(file.monitoring.protect_private_ratio)
                .unwrap_or(true),
            protect_unknown_trackers: env_bool("PROTECT_UNKNOWN_TRACKERS")
                .or(file.monitoring.protect_unknown_trackers)
                .unwrap_or(true),
        };

        let trackers = match file.trackers {
            Some(lists) if !lists.private.is_empty() || !lists.public.is_empty() => {
                TrackerSettings {
                    private: lists.private,
                    public: lists.public,
                }
            }
            _ => TrackerSettings {
                private: DEFAULT_PRIVATE_TRACKERS.iter().map(|s| s.to_string()).collect(),
                public: DEFAULT_PUBLIC_TRACKERS.iter().map(|s| s.to_string()).collect(),
            },
        };

        let format = env_str("LOG_FORMAT")
            .or(file.logging.format)
            .unwrap_or_else(|| "text".to_string());
        let logging = LoggingSettings {
            level: env_str("LOG_LEVEL")
                .or(file.logging.level)
                .unwrap_or_else(|| "info".to_string()),
            format: match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "logging.format must be \"text\" or \"json\", got {other:?}"
                    )))
                }
            },
        };

        let dry_run = env_bool("DRY_RUN").or(file.dry_run).unwrap_or(false);

        Ok(AppConfig {
            sonarr,
            webhook,
            monitoring,
            trackers,
            logging,
            dry_run,
            webhook_secret_generated,
        })
    }
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists()),
    };

    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// 43 characters of alphanumeric entropy, comparable to a 256-bit token.
fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(43)
        .map(char::from)
        .collect()
}

/// Accepts the usual truthy/falsy spellings; anything unrecognized is false.
fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
}
