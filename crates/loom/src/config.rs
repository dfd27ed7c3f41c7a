//! Configuration
//!
//! Layers, lowest priority first: built-in defaults, `loom.toml` (or the file
//! given with `--config`), `LOOM_`-prefixed environment variables with `__`
//! between section and key (`LOOM_SERVER__PORT=9000`), then CLI flags.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use loom_client::ClientConfig;
use serde::{Deserialize, Serialize};

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "loom.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "LOOM_";

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),

    #[error(transparent)]
    Invalid(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Invalid(Box::new(err))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoomConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Bridge server endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL clients should connect to
    pub fn ws_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" => "[::1]",
            host => host,
        };
        format!("ws://{}:{}/ws", host, self.port)
    }
}

/// Bridge behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Separator between type name and ordinal in generated public names
    #[serde(default = "default_name_separator")]
    pub name_separator: String,
}

fn default_name_separator() -> String {
    loom_runtime::DEFAULT_NAME_SEPARATOR.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name_separator: default_name_separator(),
        }
    }
}

/// Logging output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "loom=info,loom_server=info,loom_client=info,tower_http=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoomConfig {
    /// Layered configuration sources, ready for further overrides
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::Missing(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(CONFIG_FILE),
        };

        Ok(Figment::from(Serialized::defaults(LoomConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from defaults, file and environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Ok(Self::figment(path)?.extract()?)
    }
}
