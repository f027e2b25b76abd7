//! TOML-based configuration persistence for the client application.
//!
//! Reads and writes `ClientAppConfig` to `client.toml` in the platform config
//! directory, or to an explicit path given on the command line:
//! - Windows:  `%APPDATA%\SppLink\client.toml`
//! - Linux:    `~/.config/spp-link/client.toml`
//! - macOS:    `~/Library/Application Support/SppLink/client.toml`
//!
//! ```toml
//! [link]
//! secure = true
//! service_uuid = "00001101-0000-1000-8000-00805f9b34fb"
//!
//! [client]
//! name = "spp-client"
//! log_level = "info"
//! default_payload = "ABCDEFG"
//! ```
//!
//! Every field has a serde default, so a missing file or a partial file both
//! load cleanly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use spp_core::transport::DEFAULT_SERVICE_UUID;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientAppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Link settings shared with the server's configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    /// Whether outbound sockets use the secure variant.
    #[serde(default = "default_true")]
    pub secure: bool,
    /// Service record identifier.
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
}

/// Client behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Name this client presents in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Bytes sent when an empty line is entered.
    #[serde(default = "default_payload")]
    pub default_payload: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_service_uuid() -> Uuid {
    DEFAULT_SERVICE_UUID
}
fn default_name() -> String {
    "spp-client".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_payload() -> String {
    "ABCDEFG".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            secure: default_true(),
            service_uuid: default_service_uuid(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            default_payload: default_payload(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default path to the client config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("client.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from the platform default location when
/// `path` is `None`.  A missing file yields `ClientAppConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ClientAppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientAppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to `path`, or to the platform default location.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ClientAppConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SppLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("spp-link"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("SppLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
