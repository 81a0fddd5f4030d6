//! Configuration loading from popupd.toml.
//!
//! Every field is optional in the file; missing values fall back to the
//! defaults below. The config is consumed once at startup; a configuration
//! change is applied by restarting the server with a freshly loaded config.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{PopupError, Result};
use crate::pending::{DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SWEEP_INTERVAL};

/// Default HTTP bind port. Port 0 auto-assigns; the bound port is reported
/// in logs and via `PopupServer::bound_addr`.
pub const DEFAULT_HTTP_PORT: u16 = 7440;
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "popupd.toml";

// ============================================================================
// Raw (file) representation
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    pub http: Option<RawHttpSection>,
    pub stdio: Option<RawStdioSection>,
    pub response_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHttpSection {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStdioSection {
    pub enabled: Option<bool>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub stdio: StdioConfig,
    /// Bound on every popup wait.
    pub response_timeout: Duration,
    /// Cadence of the pending-table safety-net sweep.
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration.
    ///
    /// With an explicit path, the file must exist and parse. Without one,
    /// `popupd.toml` in the working directory is used when present, and
    /// defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::from_raw(Self::load_raw(path)?)),
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Ok(Self::from_raw(Self::load_raw(default_path)?))
                } else {
                    debug!("No {CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_raw(path: &Path) -> Result<RawConfig> {
        debug!(path = %path.display(), "Loading config");
        let contents = std::fs::read_to_string(path).map_err(|e| PopupError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| PopupError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn from_raw(raw: RawConfig) -> Self {
        let http = raw.http.unwrap_or_default();
        let stdio = raw.stdio.unwrap_or_default();
        Self {
            http: HttpConfig {
                enabled: http.enabled.unwrap_or(true),
                host: http.host.unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string()),
                port: http.port.unwrap_or(DEFAULT_HTTP_PORT),
            },
            stdio: StdioConfig {
                enabled: stdio.enabled.unwrap_or(true),
            },
            response_timeout: raw
                .response_timeout_secs
                .map_or(DEFAULT_RESPONSE_TIMEOUT, Duration::from_secs),
            sweep_interval: raw
                .sweep_interval_secs
                .map_or(DEFAULT_SWEEP_INTERVAL, Duration::from_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}
