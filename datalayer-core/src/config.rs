//! Process settings.
//!
//! Built once at startup and handed to every component by reference. Sources,
//! later wins: built-in defaults, an optional TOML file named by
//! `DATALAYER_CONFIG`, then the process environment. Keys are matched
//! case-insensitively; TOML keys use the same names in any case
//! (`cache_ttl_seconds = 60`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional TOML settings file.
pub const CONFIG_PATH_VAR: &str = "DATALAYER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("failed to read config file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Toml(String),
}

/// Log line format for the service and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub environment: String,
    /// Path prefix for the data and analytics routes, e.g. `/api`.
    pub api_prefix: String,
    /// Name of the secret holding the expected bearer token.
    pub api_auth_secret_name: String,
    /// Static bearer token, used until (or instead of) a secret source.
    pub api_auth_fallback: Option<String>,
    /// Directory of file-mounted secrets.
    pub secret_dir: Option<PathBuf>,
    pub storage_account: String,
    pub blob_container: String,
    pub blob_prefix_clean: String,
    pub cache_dir: PathBuf,
    /// Shared TTL for cached partition bytes, dataset listings and the auth token.
    pub cache_ttl: Duration,
    pub data_base_path: Option<PathBuf>,
    pub download_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            api_prefix: "/api".to_string(),
            api_auth_secret_name: "API_AUTH_TOKEN".to_string(),
            api_auth_fallback: None,
            secret_dir: None,
            storage_account: String::new(),
            blob_container: String::new(),
            blob_prefix_clean: "clean".to_string(),
            cache_dir: default_cache_dir(),
            cache_ttl: Duration::from_secs(300),
            data_base_path: None,
            download_timeout: Duration::from_secs(30),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Load from `DATALAYER_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Some(read_file(Path::new(path.trim()))?),
            _ => None,
        };
        Self::from_sources(file.as_deref(), std::env::vars())
    }

    /// Merge an optional TOML document with environment pairs (environment wins).
    pub fn from_sources<I>(toml_doc: Option<&str>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut merged = HashMap::new();
        if let Some(doc) = toml_doc {
            merged.extend(parse_toml(doc)?);
        }
        merged.extend(env.into_iter().map(|(k, v)| (k.to_ascii_uppercase(), v)));
        Self::from_kv(&merged)
    }

    /// Build from upper-case keys. Unknown keys are ignored.
    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_prefix = string_or(kv, "API_PREFIX", &defaults.api_prefix);
        if !api_prefix.starts_with('/') || (api_prefix.len() > 1 && api_prefix.ends_with('/')) {
            return Err(ConfigError::Invalid {
                key: "API_PREFIX",
                message: "must start with '/' and not end with '/'".to_string(),
            });
        }

        let cache_ttl = Duration::from_secs(parse_u64(kv, "CACHE_TTL_SECONDS", 300)?);
        let download_timeout = Duration::from_secs(parse_u64(kv, "DOWNLOAD_TIMEOUT_SECS", 30)?);
        if download_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "DOWNLOAD_TIMEOUT_SECS",
                message: "must be >= 1".to_string(),
            });
        }

        let bind_addr = match non_empty(kv, "BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                message: format!("{e}"),
            })?,
            None => defaults.bind_addr,
        };

        let log_format = match non_empty(kv, "LOG_FORMAT") {
            Some(raw) => raw
                .parse()
                .map_err(|message| ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    message,
                })?,
            None => defaults.log_format,
        };

        Ok(Self {
            environment: string_or(kv, "ENVIRONMENT", &defaults.environment),
            api_prefix,
            api_auth_secret_name: string_or(
                kv,
                "API_AUTH_SECRET_NAME",
                &defaults.api_auth_secret_name,
            ),
            api_auth_fallback: non_empty(kv, "API_AUTH_TOKEN").map(str::to_string),
            secret_dir: non_empty(kv, "SECRET_DIR").map(PathBuf::from),
            storage_account: string_or(kv, "AZURE_STORAGE_ACCOUNT", ""),
            blob_container: string_or(kv, "BLOB_CONTAINER", ""),
            blob_prefix_clean: string_or(kv, "BLOB_PREFIX_CLEAN", &defaults.blob_prefix_clean),
            cache_dir: non_empty(kv, "CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl,
            data_base_path: non_empty(kv, "DATA_BASE_PATH").map(PathBuf::from),
            download_timeout,
            bind_addr,
            log_format,
        })
    }

    /// Root that dataset prefixes are resolved against.
    pub fn base_path(&self) -> PathBuf {
        self.data_base_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("datalayer"))
        .unwrap_or_else(|| PathBuf::from("/tmp/cache"))
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_toml(doc: &str) -> Result<HashMap<String, String>, ConfigError> {
    let table: toml::Table = toml::from_str(doc).map_err(|e| ConfigError::Toml(e.to_string()))?;

    let mut out = HashMap::new();
    for (key, value) in table {
        let rendered = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            _ => {
                return Err(ConfigError::Toml(format!(
                    "key '{key}' must be a string, number or boolean"
                )))
            }
        };
        out.insert(key.to_ascii_uppercase(), rendered);
    }
    Ok(out)
}

fn non_empty<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn string_or(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    non_empty(kv, key).unwrap_or(default).to_string()
}

fn parse_u64(kv: &HashMap<String, String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match non_empty(kv, key) {
        Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
            key,
            message: format!("expected a non-negative integer, got '{raw}'"),
        }),
        None => Ok(default),
    }
}
