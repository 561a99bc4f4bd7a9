use serde::Deserialize;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::infrastructure::graph::{DEFAULT_BASE_URL, DEFAULT_BETA_URL};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_BASE: &str = "https://api.openai.com";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONFIG_PATH: &str = "config/outlook-mcp.toml";
pub const CONFIG_PATH: &str = DEFAULT_CONFIG_PATH;

/// Secrets are never read from the config file; only from the environment.
pub const GRAPH_TOKEN_ENV: &str = "GRAPH_ACCESS_TOKEN";
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub api_base: String,
    pub system_prompt: Option<String>,
    pub graph_base_url: String,
    pub graph_beta_url: String,
    pub http_addr: SocketAddr,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid listen address {value:?} in {path:?}: {source}")]
    Addr {
        path: PathBuf,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("required environment variable {name} is not set")]
    MissingEnv { name: &'static str },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    api_base: Option<String>,
    system_prompt: Option<String>,
    graph_base_url: Option<String>,
    graph_beta_url: Option<String>,
    http_addr: Option<String>,
    request_timeout_secs: Option<u64>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            system_prompt: None,
            graph_base_url: DEFAULT_BASE_URL.to_string(),
            graph_beta_url: DEFAULT_BETA_URL.to_string(),
            http_addr: DEFAULT_HTTP_ADDR.parse().expect("static default address"),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let http_addr = match parsed.http_addr {
        Some(value) => value.parse().map_err(|source| ConfigError::Addr {
            path: path.to_path_buf(),
            value,
            source,
        })?,
        None => DEFAULT_HTTP_ADDR.parse().expect("static default address"),
    };

    Ok(AppConfig {
        model: parsed.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        api_base: parsed
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        system_prompt: parsed.system_prompt,
        graph_base_url: parsed
            .graph_base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        graph_beta_url: parsed
            .graph_beta_url
            .unwrap_or_else(|| DEFAULT_BETA_URL.to_string()),
        http_addr,
        request_timeout_secs: parsed
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    })
}

/// The Microsoft Graph bearer token, environment-only.
pub fn graph_access_token() -> Result<String, ConfigError> {
    required_env(GRAPH_TOKEN_ENV)
}

/// The model provider API key. Optional: local providers accept requests
/// without one.
pub fn openai_api_key() -> Option<String> {
    std::env::var(OPENAI_KEY_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::MissingEnv { name })
}
