//! Configuration file support
//!
//! Settings come from a TOML file. `${VAR}` and `${VAR:-default}` references
//! are replaced from the environment before parsing, and every section may be
//! omitted in favour of its defaults.
//!
//! ```toml
//! [server]
//! addr = "0.0.0.0:8080"
//! origin = "https://example.org"
//! https = true
//!
//! [session]
//! secret = "${GATEHOUSE_SESSION_SECRET}"
//! idle_timeout = "12h"
//! ```

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Longest accepted `session.idle_timeout`: a hundred years.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Required environment variables not set: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatehouseConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub session: SessionConfig,
    pub assets: AssetsConfig,
    pub security: SecurityConfig,
    pub body: BodyConfig,
    pub compression: CompressionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Public URL, logged at startup
    pub origin: String,
    /// Served over TLS (directly or behind a proxy); marks cookies `Secure`
    pub https: bool,
    #[serde(with = "duration")]
    pub request_timeout: Duration,
    /// Production mode: combined access log format
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            origin: "http://localhost:3000".into(),
            https: false,
            request_timeout: Duration::from_secs(30),
            production: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gatehouse.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub secret: String,
    /// How long an untouched session stays valid
    #[serde(with = "duration")]
    pub idle_timeout: Duration,
    /// `Max-Age` of the cookie; unset means a browser-session cookie
    #[serde(with = "duration::option")]
    pub cookie_max_age: Option<Duration>,
    #[serde(with = "duration")]
    pub purge_interval: Duration,
    /// Serve anonymously instead of 503 when the session store is down
    pub degrade_to_anonymous: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sid".into(),
            secret: String::new(),
            idle_timeout: Duration::from_secs(24 * 60 * 60),
            cookie_max_age: None,
            purge_interval: Duration::from_secs(15 * 60),
            degrade_to_anonymous: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    /// Directories searched in order; the first hit is served
    pub dirs: Vec<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dirs: vec![
                PathBuf::from("dist"),
                PathBuf::from("assets/images"),
                PathBuf::from("webroot"),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Content-Security-Policy directives, in header order
    pub content_security_policy: IndexMap<String, Vec<String>>,
    pub frame_options: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let directives: [(&str, &[&str]); 10] = [
            ("base-uri", &["'self'"]),
            ("default-src", &["'none'"]),
            (
                "script-src",
                &[
                    "'self'",
                    "https://www.google.com/recaptcha/",
                    "https://www.gstatic.com/recaptcha/",
                ],
            ),
            ("style-src", &["'self'", "'unsafe-inline'"]),
            ("img-src", &["'self'"]),
            ("connect-src", &["'self'"]),
            ("font-src", &["'self'"]),
            ("form-action", &["'self'"]),
            ("child-src", &["https://www.google.com/recaptcha/"]),
            ("frame-ancestors", &["'none'"]),
        ];
        Self {
            content_security_policy: directives
                .into_iter()
                .map(|(name, sources)| {
                    (
                        name.to_string(),
                        sources.iter().map(|s| s.to_string()).collect(),
                    )
                })
                .collect(),
            frame_options: "DENY".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BodyConfig {
    /// Maximum urlencoded body size in bytes
    pub limit: usize,
    pub parameter_limit: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            limit: 100 * 1024,
            parameter_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Bodies smaller than this are sent as-is
    pub threshold: usize,
    /// Bodies larger than this are not buffered for compression
    pub max_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1024,
            max_size: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Where the daily access log files go in production; created if missing
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("log"),
        }
    }
}

impl GatehouseConfig {
    /// Read, interpolate, parse and validate a config file.
    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let processed = interpolate_env_vars(&content)?;
        let config = Self::from_toml_str(&processed)?;
        log::debug!("loaded config from {:?}", path);
        Ok(config)
    }

    /// Parse config text that has already been interpolated.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Checks that only make sense once every override has been applied.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.session.secret.is_empty() {
            return Err(ConfigError::Invalid(
                "session.secret must be set (or pass --session-secret)".into(),
            ));
        }
        if self.session.cookie_name.is_empty()
            || !self
                .session
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
        {
            return Err(ConfigError::Invalid(format!(
                "session.cookie_name is not a valid cookie name: {:?}",
                self.session.cookie_name
            )));
        }
        if self.session.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("session.idle_timeout must be positive".into()));
        }
        if self.session.idle_timeout > MAX_IDLE_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "session.idle_timeout must be at most {}",
                humantime::format_duration(MAX_IDLE_TIMEOUT)
            )));
        }
        if self.session.purge_interval.is_zero() {
            return Err(ConfigError::Invalid("session.purge_interval must be positive".into()));
        }
        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("server.request_timeout must be positive".into()));
        }
        if self.body.parameter_limit == 0 {
            return Err(ConfigError::Invalid("body.parameter_limit must be positive".into()));
        }
        Ok(())
    }
}

/// Interpolate environment variables in config content.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn interpolate_env_vars(content: &str) -> ConfigResult<String> {
    interpolate_with(content, |name| std::env::var(name).ok())
}

fn interpolate_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let mut missing = Vec::new();
    let result = re.replace_all(content, |caps: &Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str());

        match (lookup(var_name), default) {
            (Some(val), _) => val,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                missing.push(var_name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnv(missing));
    }

    Ok(result.into_owned())
}

/// Human-readable durations (`"30s"`, `"1d"`) for serde.
mod duration {
    use serde::{Deserialize, Deserializer, de::Error};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => humantime::parse_duration(&raw)
                    .map(Some)
                    .map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}
