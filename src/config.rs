//! Configuration for the acquisition agent.

use crate::edge_impulse::EdgeImpulseConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main configuration for the acquisition agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Loopback host the producer connects to and is commanded on.
    pub producer_host: String,

    /// Port for the measurement stream listener.
    pub data_port: u16,

    /// Port the producer's command socket listens on.
    pub command_port: u16,

    /// Port for the InfluxDB relay status listener.
    pub status_port: u16,

    /// Directory session exports are written into.
    pub export_path: PathBuf,

    /// Sample type used when none is given on the command line.
    pub default_sample_type: String,

    /// Edge Impulse ingestion settings.
    #[serde(default)]
    pub edge_impulse: EdgeImpulseConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("enose-acquisition");

        Self {
            producer_host: "127.0.0.1".to_string(),
            data_port: 8085,
            command_port: 8082,
            status_port: 8087,
            export_path: data_dir.join("exports"),
            default_sample_type: "Kopi Arabika".to_string(),
            edge_impulse: EdgeImpulseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("enose-acquisition")
            .join("config.json")
    }

    /// Ensure the export directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Bind address for the data listener.
    pub fn data_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr(self.data_port)
    }

    /// Bind address for the status listener.
    pub fn status_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr(self.status_port)
    }

    /// Address of the producer's command socket.
    pub fn command_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr(self.command_port)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.producer_host, port)
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.producer_host.clone()))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidHost(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidHost(host) => write!(f, "Invalid producer host: {host}"),
        }
    }
}

impl std::error::Error for ConfigError {}
