//! Configuration loading for Tally.
//!
//! The config file lives at `~/.tally/config.toml` and is entirely optional:
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:4000"
//! connect_timeout_secs = 30
//! request_timeout_secs = 60
//!
//! [auth]
//! refresh_path = "/auth/refresh"
//! refresh_cookie = "${TALLY_REFRESH_COOKIE}"
//! ```
//!
//! [`TallyConfig`] is the raw file contents. [`ClientSettings`] is the validated
//! result after defaults and environment overrides are applied, and is what the
//! HTTP client is built from.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:4000";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Overrides `[server] base_url`.
pub const ENV_API_URL: &str = "TALLY_API_URL";
/// Access token delivered out of band (e.g. copied from a browser login).
pub const ENV_ACCESS_TOKEN: &str = "TALLY_ACCESS_TOKEN";

#[derive(Debug, Default, Deserialize)]
pub struct TallyConfig {
    pub server: Option<ServerConfig>,
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid base URL {value:?}: {source}")]
    InvalidBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("base URL {0:?} must use http or https")]
    UnsupportedScheme(String),
    #[error("invalid refresh path {value:?}: {source}")]
    InvalidRefreshPath {
        value: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    /// Whole-request timeout. Unset means no timeout.
    pub request_timeout_secs: Option<u64>,
}

#[derive(Default, Deserialize)]
pub struct AuthConfig {
    pub refresh_path: Option<String>,
    /// `name=value` cookie carrying the long-lived refresh credential.
    /// `${VAR}` references are expanded from the environment.
    pub refresh_cookie: Option<String>,
}

// Manual Debug impl to prevent leaking the refresh cookie in logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("refresh_path", &self.refresh_path)
            .field(
                "refresh_cookie",
                &if self.refresh_cookie.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl TallyConfig {
    /// Load the config from the default location.
    ///
    /// Returns `Ok(None)` if there is no home directory or no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    tally_dir().map(|dir| dir.join("config.toml"))
}

/// `~/.tally`, home of the config file and logs.
#[must_use]
pub fn tally_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tally"))
}

/// Validated settings for building the HTTP client.
#[derive(Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    pub refresh_path: String,
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub refresh_cookie: Option<String>,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("base_url", &self.base_url.as_str())
            .field("refresh_path", &self.refresh_path)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("refresh_cookie", &self.refresh_cookie.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ClientSettings {
    /// Settings pointing at `base_url` with every other value defaulted.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: None,
            refresh_cookie: None,
        })
    }

    /// Resolve settings from the config file and the process environment.
    pub fn resolve(config: Option<&TallyConfig>) -> Result<Self, ConfigError> {
        Self::resolve_with(config, |key| env::var(key).ok())
    }

    /// Resolve settings with an injectable environment lookup.
    ///
    /// Precedence: environment, then config file, then built-in default.
    pub fn resolve_with(
        config: Option<&TallyConfig>,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let server = config.and_then(|c| c.server.as_ref());
        let auth = config.and_then(|c| c.auth.as_ref());

        let base_url = lookup_env(ENV_API_URL)
            .filter(|value| !value.trim().is_empty())
            .or_else(|| server.and_then(|s| s.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut settings = Self::new(base_url.trim())?;

        if let Some(path) = auth.and_then(|a| a.refresh_path.as_deref()) {
            settings.refresh_path = normalize_path(path.trim());
            settings.refresh_url()?;
        }
        if let Some(secs) = server.and_then(|s| s.connect_timeout_secs)
            && secs > 0
        {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        settings.request_timeout = server
            .and_then(|s| s.request_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        settings.refresh_cookie = auth
            .and_then(|a| a.refresh_cookie.as_deref())
            .map(expand_env_vars)
            .filter(|cookie| !cookie.trim().is_empty());

        Ok(settings)
    }

    /// Absolute URL of the token refresh endpoint, resolved from the origin root.
    pub fn refresh_url(&self) -> Result<Url, ConfigError> {
        self.base_url
            .join(&normalize_path(&self.refresh_path))
            .map_err(|source| ConfigError::InvalidRefreshPath {
                value: self.refresh_path.clone(),
                source,
            })
    }
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidBaseUrl {
        value: value.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme(value.to_string()));
    }
    Ok(url)
}

/// Ensure a path starts with a slash.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
