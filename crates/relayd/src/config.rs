//! Startup configuration.
//!
//! Values come from three layers, highest priority first: command-line
//! overrides, an optional TOML file, built-in defaults. The merged raw
//! values are validated once into a [`ServerConfig`]; a `ListenConfig`
//! cannot exist with an out-of-range port or an unparseable address.
//!
//! ```toml
//! [server]
//! address = "127.0.0.1"
//! port = 7777
//! accept_timeout_ms = 500
//! max_frame_bytes = 65536
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use relay_protocol::MAX_FRAME_BYTES;

/// Default listening port
pub const DEFAULT_PORT: u16 = 7777;

/// Ports at or below this value are refused.
pub const MIN_PORT_EXCLUSIVE: i64 = 1024;

/// Highest port accepted.
pub const MAX_PORT: i64 = 65535;

/// Default bounded wait for one accept attempt
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_millis(500);

const MAX_ACCEPT_TIMEOUT_MS: u64 = 60_000;
const MIN_FRAME_BYTES: usize = 256;
const MAX_FRAME_LIMIT: usize = 16 * 1024 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port {port}: must be greater than {min} and at most {max}", min = MIN_PORT_EXCLUSIVE, max = MAX_PORT)]
    InvalidPort { port: i64 },

    #[error("Invalid listen address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid accept timeout {ms} ms: must be between 1 and {max}", max = MAX_ACCEPT_TIMEOUT_MS)]
    InvalidAcceptTimeout { ms: u64 },

    #[error("Invalid max frame size {bytes}: must be between {min} and {max}", min = MIN_FRAME_BYTES, max = MAX_FRAME_LIMIT)]
    InvalidMaxFrame { bytes: usize },

    #[error("Failed to read config file {path}: {error}")]
    ReadFile { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    ParseFile { path: PathBuf, error: String },
}

// ============================================================================
// Validated Values
// ============================================================================

/// Validated bind address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenConfig {
    address: IpAddr,
    port: u16,
}

impl ListenConfig {
    /// Validates an address/port pair.
    ///
    /// An empty address means all interfaces. The port must satisfy
    /// `1024 < port <= 65535`.
    pub fn new(address: &str, port: i64) -> Result<Self, ConfigError> {
        let port = validate_port(port)?;
        let address = parse_address(address)?;
        Ok(Self { address, port })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for ListenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

fn validate_port(port: i64) -> Result<u16, ConfigError> {
    if port <= MIN_PORT_EXCLUSIVE || port > MAX_PORT {
        return Err(ConfigError::InvalidPort { port });
    }
    u16::try_from(port).map_err(|_| ConfigError::InvalidPort { port })
}

fn parse_address(address: &str) -> Result<IpAddr, ConfigError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    trimmed
        .parse::<IpAddr>()
        .map_err(|e| ConfigError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Fully validated server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub accept_timeout: Duration,
    pub max_frame_bytes: usize,
}

// ============================================================================
// Raw Layers
// ============================================================================

/// Contents of the TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
}

/// `[server]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub address: Option<String>,
    pub port: Option<i64>,
    pub accept_timeout_ms: Option<u64>,
    pub max_frame_bytes: Option<usize>,
}

impl FileConfig {
    /// Parses a config file's contents.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Reads and parses a config file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::parse(path, &contents)
    }
}

/// Values given on the command line. `None` defers to the lower layers.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub address: Option<String>,
    pub port: Option<i64>,
    pub accept_timeout_ms: Option<u64>,
}

/// Location of the config file used when none is given explicitly.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("relay").join("relayd.toml"))
}

impl ServerConfig {
    /// Merges the layers and validates the result.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let section = file.server;

        let address = overrides.address.or(section.address).unwrap_or_default();
        let port = overrides
            .port
            .or(section.port)
            .unwrap_or(i64::from(DEFAULT_PORT));
        let listen = ListenConfig::new(&address, port)?;

        let accept_timeout = match overrides.accept_timeout_ms.or(section.accept_timeout_ms) {
            None => DEFAULT_ACCEPT_TIMEOUT,
            Some(ms) if (1..=MAX_ACCEPT_TIMEOUT_MS).contains(&ms) => Duration::from_millis(ms),
            Some(ms) => return Err(ConfigError::InvalidAcceptTimeout { ms }),
        };

        let max_frame_bytes = match section.max_frame_bytes {
            None => MAX_FRAME_BYTES,
            Some(bytes) if (MIN_FRAME_BYTES..=MAX_FRAME_LIMIT).contains(&bytes) => bytes,
            Some(bytes) => return Err(ConfigError::InvalidMaxFrame { bytes }),
        };

        Ok(Self {
            listen,
            accept_timeout,
            max_frame_bytes,
        })
    }

    /// Loads the file layer (explicit path, else the default path if it
    /// exists) and resolves it against the overrides.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => FileConfig::read(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => {
                    debug!(path = %default.display(), "Using default config file");
                    FileConfig::read(&default)?
                }
                _ => FileConfig::default(),
            },
        };
        Self::resolve(file, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_port_boundaries() {
        assert!(ListenConfig::new("", 1).is_err());
        assert!(ListenConfig::new("", 1024).is_err());
        assert!(ListenConfig::new("", 1025).is_ok());
        assert!(ListenConfig::new("", 65535).is_ok());
        assert!(ListenConfig::new("", 65536).is_err());
        assert!(ListenConfig::new("", -1).is_err());
        assert!(ListenConfig::new("", 0).is_err());
    }

    #[test]
    fn test_invalid_port_error_mentions_value() {
        let err = ListenConfig::new("", 80).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { port: 80 }));
        assert!(err.to_string().contains("80"));
    }

    #[test]
    fn test_empty_address_binds_all_interfaces() {
        let listen = ListenConfig::new("", 7777).unwrap();
        assert_eq!(listen.address(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(listen.to_string(), "0.0.0.0:7777");
    }

    #[test]
    fn test_ip_literals_accepted() {
        assert!(ListenConfig::new("127.0.0.1", 7777).is_ok());
        assert!(ListenConfig::new("::1", 7777).is_ok());
    }

    #[test]
    fn test_bad_address_rejected() {
        let err = ListenConfig::new("999.1.1.1", 7777).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
        assert!(ListenConfig::new("localhost", 7777).is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let config = ServerConfig::resolve(FileConfig::default(), Overrides::default()).unwrap();
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert_eq!(config.accept_timeout, DEFAULT_ACCEPT_TIMEOUT);
        assert_eq!(config.max_frame_bytes, MAX_FRAME_BYTES);
    }

    #[test]
    fn test_overrides_beat_file() {
        let file = FileConfig::parse(
            Path::new("relayd.toml"),
            "[server]\naddress = \"127.0.0.1\"\nport = 9000\naccept_timeout_ms = 100\n",
        )
        .unwrap();
        let overrides = Overrides {
            port: Some(9100),
            ..Default::default()
        };

        let config = ServerConfig::resolve(file, overrides).unwrap();
        assert_eq!(config.listen.port(), 9100);
        assert_eq!(config.listen.address().to_string(), "127.0.0.1");
        assert_eq!(config.accept_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_file_port_is_validated() {
        let file = FileConfig::parse(Path::new("relayd.toml"), "[server]\nport = 1024\n").unwrap();
        assert!(matches!(
            ServerConfig::resolve(file, Overrides::default()),
            Err(ConfigError::InvalidPort { port: 1024 })
        ));
    }

    #[test]
    fn test_accept_timeout_bounds() {
        let overrides = Overrides {
            accept_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::resolve(FileConfig::default(), overrides),
            Err(ConfigError::InvalidAcceptTimeout { ms: 0 })
        ));
    }

    #[test]
    fn test_max_frame_bounds() {
        let file =
            FileConfig::parse(Path::new("relayd.toml"), "[server]\nmax_frame_bytes = 10\n").unwrap();
        assert!(matches!(
            ServerConfig::resolve(file, Overrides::default()),
            Err(ConfigError::InvalidMaxFrame { bytes: 10 })
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = FileConfig::parse(Path::new("relayd.toml"), "[server]\nprot = 9000\n");
        assert!(matches!(result, Err(ConfigError::ParseFile { .. })));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8123").unwrap();

        let config = ServerConfig::load(Some(file.path()), Overrides::default()).unwrap();
        assert_eq!(config.listen.port(), 8123);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            ServerConfig::load(Some(&missing), Overrides::default()),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
