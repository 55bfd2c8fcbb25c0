//! Server and client configuration.
//!
//! Both configs deserialize from TOML with every field optional; missing
//! fields fall back to the defaults below. Command-line flags are applied
//! on top by the binaries.
//!
//! ```toml
//! # ~/.config/chatline/server.toml
//! bind_address = "0.0.0.0"
//! port = 8888
//! disconnect_ack_timeout_secs = 30
//! max_line_length = 65536
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Default listen / connect port.
pub const DEFAULT_PORT: u16 = 8888;

/// Default host the client connects to.
pub const DEFAULT_HOST: &str = "localhost";

/// Longest accepted line, in bytes (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 65_536;

/// Seconds a server-initiated disconnect waits for the peer's acknowledgement.
pub const DEFAULT_DISCONNECT_ACK_TIMEOUT_SECS: u64 = 30;

const CONFIG_DIR_NAME: &str = "chatline";

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind. All interfaces by default.
    pub bind_address: IpAddr,

    /// TCP port to listen on. `0` picks an ephemeral port.
    pub port: u16,

    /// Upper bound on the wait for a disconnect acknowledgement.
    /// `0` waits indefinitely.
    pub disconnect_ack_timeout_secs: u64,

    /// Lines longer than this terminate the offending session.
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            disconnect_ack_timeout_secs: DEFAULT_DISCONNECT_ACK_TIMEOUT_SECS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `<config_dir>/chatline/server.toml`, or defaults when it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_path("server.toml") {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid {
                field: "max_line_length",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Address the listener binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// `None` means wait for the acknowledgement forever.
    pub fn disconnect_ack_timeout(&self) -> Option<Duration> {
        match self.disconnect_ack_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `<config_dir>/chatline/client.toml`, or defaults when it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_path("client.toml") {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be a non-zero port".to_string(),
            });
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid {
                field: "max_line_length",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// `host:port` as handed to `TcpStream::connect`.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(file_name))
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    debug!(path = %path.display(), "Loading config file");

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
