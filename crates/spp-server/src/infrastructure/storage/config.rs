//! TOML-based configuration persistence for the server application.
//!
//! Reads and writes `ServerAppConfig` to `server.toml` in the platform config
//! directory, or to an explicit path given on the command line:
//! - Windows:  `%APPDATA%\SppLink\server.toml`
//! - Linux:    `~/.config/spp-link/server.toml`
//! - macOS:    `~/Library/Application Support/SppLink/server.toml`
//!
//! ```toml
//! [link]
//! secure = true
//! service_name = "SppLink"
//! service_uuid = "00001101-0000-1000-8000-00805f9b34fb"
//! bind_address = "0.0.0.0"
//! port = 24850
//!
//! [server]
//! log_level = "info"
//! default_payload = "ABCDEFG"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use spp_core::transport::tcp::DEFAULT_PORT;
use spp_core::transport::{DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_UUID};
use spp_core::ServiceRecord;

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

    /// `bind_address` is not an IP address.
    #[error("invalid bind address {0:?}")]
    BindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerAppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Listening socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    /// Whether listening sockets use the secure variant.
    #[serde(default = "default_true")]
    pub secure: bool,
    /// Name the service record is registered under.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Service record identifier.
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// General server behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
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
fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}
fn default_service_uuid() -> Uuid {
    DEFAULT_SERVICE_UUID
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
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
            service_name: default_service_name(),
            service_uuid: default_service_uuid(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_payload: default_payload(),
        }
    }
}

impl LinkConfig {
    /// The service record listeners register under.
    pub fn service_record(&self) -> ServiceRecord {
        ServiceRecord {
            uuid: self.service_uuid,
            name: self.service_name.clone(),
        }
    }

    /// `bind_address:port` as a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BindAddress`] if `bind_address` is not an IP.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default path to the server config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("server.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from the platform default location when
/// `path` is `None`.  A missing file yields `ServerAppConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerAppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerAppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to `path`, or to the platform default location.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerAppConfig, path: Option<&Path>) -> Result<(), ConfigError> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_listens_on_all_interfaces() {
        // Arrange / Act
        let cfg = ServerAppConfig::default();

        // Assert
        assert!(cfg.link.secure);
        assert_eq!(cfg.link.bind_addr().unwrap(), "0.0.0.0:24850".parse().unwrap());
        assert_eq!(cfg.link.service_record(), ServiceRecord::default());
        assert_eq!(cfg.server.log_level, "info");
        assert_eq!(cfg.server.default_payload, "ABCDEFG");
    }

    #[test]
    fn test_partial_toml_keeps_unspecified_defaults() {
        // Arrange
        let toml_str = r#"
[link]
port = 9000
service_name = "Bench"
"#;

        // Act
        let cfg: ServerAppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.link.port, 9000);
        assert_eq!(cfg.link.service_name, "Bench");
        assert_eq!(cfg.link.bind_address, "0.0.0.0");
        assert!(cfg.link.secure);
    }

    #[test]
    fn test_server_section_overrides_default_payload() {
        let cfg: ServerAppConfig = toml::from_str(
            r#"
[server]
default_payload = "PING"
"#,
        )
        .expect("deserialize server section");
        assert_eq!(cfg.server.default_payload, "PING");
        assert_eq!(cfg.server.log_level, "info");
    }

    #[test]
    fn test_bind_addr_rejects_hostnames() {
        let mut cfg = LinkConfig::default();
        cfg.bind_address = "localhost".to_string();
        assert!(matches!(cfg.bind_addr(), Err(ConfigError::BindAddress(_))));
    }

    #[test]
    fn test_save_then_load_preserves_security_flag() {
        // Arrange
        let path = std::env::temp_dir()
            .join(format!("spp-server-test-{}", Uuid::new_v4()))
            .join("server.toml");
        let mut cfg = ServerAppConfig::default();
        cfg.link.secure = false;

        // Act
        save_config(&cfg, Some(&path)).expect("save");
        let loaded = load_config(Some(&path)).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
