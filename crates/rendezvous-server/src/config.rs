//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RENDEZVOUS_*)
//! - TOML configuration file
//! - `--config <path>` on the command line

use anyhow::{bail, Context, Result};
use rendezvous_core::{RegistryConfig, SweeperConfig};
use rendezvous_protocol::codec::{FrameCodec, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind both channels to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for the control channel.
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// UDP port for the data channel.
    #[serde(default = "default_data_port")]
    pub data_port: u16,

    /// Wire protocol settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Liveness sweeping.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Wire protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Size of every frame on both channels.
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// How long a control connection may take to send its request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Liveness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds of inactivity after which a membership is evicted.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum members per room.
    #[serde(default = "default_max_members")]
    pub max_members_per_room: usize,

    /// Maximum control sessions, and separately datagram dispatches, in flight.
    #[serde(default = "default_max_handlers")]
    pub max_concurrent_handlers: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RENDEZVOUS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_control_port() -> u16 {
    std::env::var("RENDEZVOUS_CONTROL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9000)
}

fn default_data_port() -> u16 {
    std::env::var("RENDEZVOUS_DATA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9001)
}

fn default_frame_size() -> usize {
    4096
}

fn default_request_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    180
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_members() -> usize {
    256
}

fn default_max_handlers() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            control_port: default_control_port(),
            data_port: default_data_port(),
            protocol: ProtocolConfig::default(),
            liveness: LivenessConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            max_members_per_room: default_max_members(),
            max_concurrent_handlers: default_max_handlers(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the default paths, or
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = [
            "rendezvous.toml",
            "/etc/rendezvous/rendezvous.toml",
            "~/.config/rendezvous/rendezvous.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.protocol.frame_size) {
            bail!(
                "protocol.frame_size must be within {}..={}, got {}",
                MIN_FRAME_SIZE,
                MAX_FRAME_SIZE,
                self.protocol.frame_size
            );
        }
        if self.protocol.request_timeout_ms == 0 {
            bail!("protocol.request_timeout_ms must be positive");
        }
        if self.liveness.sweep_interval_secs == 0 || self.liveness.idle_timeout_secs == 0 {
            bail!("liveness intervals must be positive");
        }
        if self.limits.max_rooms == 0
            || self.limits.max_members_per_room == 0
            || self.limits.max_concurrent_handlers == 0
        {
            bail!("limits must be positive");
        }
        Ok(())
    }

    /// Get the control channel address.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn control_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.control_port)
    }

    /// Get the data channel address.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn data_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.data_port)
    }

    /// Build the frame codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame size is out of range.
    pub fn codec(&self) -> Result<FrameCodec> {
        Ok(FrameCodec::new(self.protocol.frame_size)?)
    }

    /// Registry settings derived from the limits.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_rooms: self.limits.max_rooms,
            max_members_per_room: self.limits.max_members_per_room,
        }
    }

    /// Sweeper settings derived from the liveness section.
    #[must_use]
    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.liveness.sweep_interval_secs),
            idle_timeout: Duration::from_secs(self.liveness.idle_timeout_secs),
        }
    }

    /// Time allowed for a control request to arrive.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol.request_timeout_ms)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid host:port {}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.protocol.frame_size, 4096);
        assert_eq!(config.liveness.sweep_interval_secs, 60);
        assert_eq!(config.liveness.idle_timeout_secs, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_addrs() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            control_port: 9000,
            data_port: 9001,
            ..Config::default()
        };
        assert_eq!(config.control_addr().unwrap().port(), 9000);
        assert_eq!(config.data_addr().unwrap().port(), 9001);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.control_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            control_port = 7000
            data_port = 7001

            [liveness]
            idle_timeout_secs = 30

            [limits]
            max_rooms = 50
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.control_port, 7000);
        assert_eq!(config.data_port, 7001);
        assert_eq!(config.liveness.idle_timeout_secs, 30);
        assert_eq!(config.liveness.sweep_interval_secs, 60);
        assert_eq!(config.limits.max_rooms, 50);
        assert_eq!(config.sweeper_config().idle_timeout, Duration::from_secs(30));
        assert_eq!(config.registry_config().max_rooms, 50);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.protocol.frame_size = 16;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.liveness.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_concurrent_handlers = 0;
        assert!(config.validate().is_err());
    }
}
