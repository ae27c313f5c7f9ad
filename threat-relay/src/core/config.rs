/*!
Configuration management for the relay

Settings come from an optional TOML file and the process environment, with
the environment taking precedence. Everything is resolved and validated once
at startup into a [`RelayConfig`] that is handed to each component.
*/

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_DELIVERY_DELAY_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATE_FILE: &str = "processed_threats.json";
pub const DEFAULT_SQLITE_STATE_FILE: &str = "processed_threats.db";
pub const DEFAULT_LOG_FILE: &str = "relay.log";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("{name} must be a whole number of seconds, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} is not a valid url ({value:?}): {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown STATE_BACKEND {0:?}, expected \"json\" or \"sqlite\"")]
    InvalidBackend(String),

    #[error("could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// A credential that never shows up in `Debug` output or logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Where processed threat ids are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON array of ids, rotated when it grows past 5 MiB
    #[default]
    Json,
    /// SQLite table keyed by threat id
    Sqlite,
}

impl StateBackend {
    /// State file used when `PROCESSED_IDS_FILE` is not set
    pub fn default_path(self) -> &'static str {
        match self {
            StateBackend::Json => DEFAULT_STATE_FILE,
            StateBackend::Sqlite => DEFAULT_SQLITE_STATE_FILE,
        }
    }
}

impl FromStr for StateBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StateBackend::Json),
            "sqlite" => Ok(StateBackend::Sqlite),
            other => Err(ConfigError::InvalidBackend(other.to_string())),
        }
    }
}

/// Settings as read from a TOML file or the environment, before validation.
///
/// Keys mirror the environment variable names in lowercase.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub access_token: Option<String>,
    pub destination_url: Option<String>,
    pub api_key_class: Option<String>,
    pub poll_interval: Option<u64>,
    pub api_base_url: Option<String>,
    pub processed_ids_file: Option<PathBuf>,
    pub state_backend: Option<StateBackend>,
    pub delivery_delay: Option<u64>,
    pub destination_class: Option<String>,
    pub request_timeout: Option<u64>,
    pub log_file: Option<PathBuf>,
}

impl RawConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields with whatever `lookup` returns for the matching
    /// environment variable. Empty values count as unset.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = var("DESTINATION_URL") {
            self.destination_url = Some(v);
        }
        if let Some(v) = var("API_KEY_CLASS") {
            self.api_key_class = Some(v);
        }
        if let Some(v) = var("POLL_INTERVAL") {
            self.poll_interval = Some(parse_secs("POLL_INTERVAL", &v)?);
        }
        if let Some(v) = var("API_BASE_URL") {
            self.api_base_url = Some(v);
        }
        if let Some(v) = var("PROCESSED_IDS_FILE") {
            self.processed_ids_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("STATE_BACKEND") {
            self.state_backend = Some(v.parse()?);
        }
        if let Some(v) = var("DELIVERY_DELAY") {
            self.delivery_delay = Some(parse_secs("DELIVERY_DELAY", &v)?);
        }
        if let Some(v) = var("DESTINATION_CLASS") {
            self.destination_class = Some(v);
        }
        if let Some(v) = var("REQUEST_TIMEOUT") {
            self.request_timeout = Some(parse_secs("REQUEST_TIMEOUT", &v)?);
        }
        if let Some(v) = var("LOG_FILE") {
            self.log_file = Some(PathBuf::from(v));
        }

        Ok(self)
    }

    /// Fill in defaults and validate
    pub fn resolve(self) -> Result<RelayConfig, ConfigError> {
        let access_token = required("ACCESS_TOKEN", self.access_token)?;
        let destination_url = required("DESTINATION_URL", self.destination_url)?;
        let api_key_class = required("API_KEY_CLASS", self.api_key_class)?;
        let api_base_url = self
            .api_base_url
            .unwrap_or_else(|| abnormal_client::DEFAULT_BASE_URL.to_string());

        validate_url("DESTINATION_URL", &destination_url)?;
        validate_url("API_BASE_URL", &api_base_url)?;

        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval == 0 {
            return Err(ConfigError::Zero("POLL_INTERVAL"));
        }
        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_timeout == 0 {
            return Err(ConfigError::Zero("REQUEST_TIMEOUT"));
        }

        let backend = self.state_backend.unwrap_or_default();

        Ok(RelayConfig {
            upstream: UpstreamConfig {
                base_url: api_base_url,
                access_token: Secret::new(access_token),
                request_timeout: Duration::from_secs(request_timeout),
            },
            destination: DestinationConfig {
                url: destination_url,
                api_key_class: Secret::new(api_key_class),
                class: self.destination_class.filter(|c| !c.trim().is_empty()),
                delivery_delay: Duration::from_secs(
                    self.delivery_delay.unwrap_or(DEFAULT_DELIVERY_DELAY_SECS),
                ),
            },
            state: StateConfig {
                path: self
                    .processed_ids_file
                    .unwrap_or_else(|| PathBuf::from(backend.default_path())),
                backend,
            },
            poll_interval: Duration::from_secs(poll_interval),
            log_file: self
                .log_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }
}

fn required(name: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_secs(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}

fn validate_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ConfigError::InvalidUrl {
            name,
            value: value.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        }),
        Err(e) => Err(ConfigError::InvalidUrl {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Fully resolved relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Threats API access
    pub upstream: UpstreamConfig,
    /// Downstream ingestion endpoint
    pub destination: DestinationConfig,
    /// Processed id persistence
    pub state: StateConfig,
    /// Sleep between poll cycles
    pub poll_interval: Duration,
    /// File the log stream is appended to
    pub log_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub access_token: Secret,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub url: String,
    /// Sent verbatim as the `Authorization` header
    pub api_key_class: Secret,
    /// When set, payloads are wrapped as `{"class": .., "rawmsg": ..}`
    pub class: Option<String>,
    /// Pause after each successful delivery
    pub delivery_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub path: PathBuf,
    pub backend: StateBackend,
}

impl RelayConfig {
    /// Resolve from an optional config file plus the process environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match file {
            Some(path) => RawConfig::from_file(path)?,
            None => RawConfig::default(),
        };
        raw.overlay(|name| std::env::var(name).ok())?.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("ACCESS_TOKEN", "token"),
        ("DESTINATION_URL", "https://ingest.example.com/events"),
        ("API_KEY_CLASS", "class-key"),
    ];

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let config = RawConfig::default()
            .overlay(env(REQUIRED))
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.destination.delivery_delay, Duration::from_secs(5));
        assert_eq!(config.upstream.base_url, "https://api.abnormalplatform.com/v1");
        assert_eq!(config.state.path, PathBuf::from("processed_threats.json"));
        assert_eq!(config.state.backend, StateBackend::Json);
        assert_eq!(config.destination.class, None);
        assert_eq!(config.upstream.access_token.expose(), "token");
    }

    #[test]
    fn missing_credentials_fail_at_startup() {
        let err = RawConfig::default()
            .overlay(env(&[
                ("ACCESS_TOKEN", "token"),
                ("DESTINATION_URL", "https://ingest.example.com"),
                ("API_KEY_CLASS", "   "),
            ]))
            .unwrap()
            .resolve()
            .unwrap_err();

        assert!(matches!(err, ConfigError::Missing("API_KEY_CLASS")));
    }

    #[test]
    fn poll_interval_must_be_a_number() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_INTERVAL", "five minutes"));

        let err = RawConfig::default().overlay(env(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "POLL_INTERVAL", .. }));

        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_INTERVAL", "0"));
        let err = RawConfig::default()
            .overlay(env(&vars))
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero("POLL_INTERVAL")));
    }

    #[test]
    fn environment_overrides_the_file() {
        let file: RawConfig = toml::from_str(
            r#"
            destination_url = "https://file.example.com"
            poll_interval = 60
            state_backend = "sqlite"
            destination_class = "abnormal"
            "#,
        )
        .unwrap();

        let config = file
            .overlay(env(&[
                ("ACCESS_TOKEN", "token"),
                ("API_KEY_CLASS", "class-key"),
                ("POLL_INTERVAL", "120"),
            ]))
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(config.destination.url, "https://file.example.com");
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.state.backend, StateBackend::Sqlite);
        assert_eq!(config.destination.class.as_deref(), Some("abnormal"));
    }

    #[test]
    fn sqlite_backend_defaults_to_its_own_file() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("STATE_BACKEND", "sqlite"));

        let config = RawConfig::default()
            .overlay(env(&vars))
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(config.state.backend, StateBackend::Sqlite);
        assert_eq!(config.state.path, PathBuf::from("processed_threats.db"));

        vars.push(("PROCESSED_IDS_FILE", "/var/lib/relay/ids.sqlite"));
        let config = RawConfig::default()
            .overlay(env(&vars))
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(config.state.path, PathBuf::from("/var/lib/relay/ids.sqlite"));
    }

    #[test]
    fn destination_must_be_http() {
        let err = RawConfig::default()
            .overlay(env(&[
                ("ACCESS_TOKEN", "token"),
                ("DESTINATION_URL", "ftp://ingest.example.com"),
                ("API_KEY_CLASS", "class-key"),
            ]))
            .unwrap()
            .resolve()
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidUrl { name: "DESTINATION_URL", .. }));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = RawConfig::default()
            .overlay(env(REQUIRED))
            .unwrap()
            .resolve()
            .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("class-key"));
        assert!(!debug.contains("\"token\""));
    }
}
