//! Configuration management for videochat-relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Deployment profile, selects the ICE server set and websocket scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Interpret the value of the `ENVIRONMENT` variable
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("PRODUCTION") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }

    /// Websocket scheme advertised to browsers
    pub fn websocket_scheme(&self) -> &'static str {
        match self {
            Environment::Production => "wss",
            Environment::Development => "ws",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP configuration
    pub http: HttpConfig,

    /// WebRTC configuration
    pub webrtc: WebRTCConfig,

    /// Chat configuration
    pub chat: ChatConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// HTTP bind address
    pub host: String,

    /// HTTP port
    pub port: u16,
}

/// One STUN/TURN entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn is_turn(&self) -> bool {
        self.urls.iter().any(|url| url.starts_with("turn:") || url.starts_with("turns:"))
    }
}

/// The ICE servers and transport policy a peer connection is built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceProfile {
    pub servers: Vec<IceServerConfig>,
    pub relay_only: bool,
}

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    /// ICE servers used outside production
    pub ice_servers: Vec<IceServerConfig>,

    /// ICE servers used in production
    pub production_ice_servers: Vec<IceServerConfig>,

    /// Restrict production peers to relayed candidates
    pub production_relay_only: bool,

    /// Public IPs advertised in place of host candidates (NAT 1:1)
    pub nat1to1_ips: Vec<String>,

    /// UDP port range for ICE, `[min, max]`
    pub ephemeral_udp_port_range: Option<[u16; 2]>,
}

impl WebRTCConfig {
    pub fn ice_profile(&self, environment: Environment) -> IceProfile {
        match environment {
            Environment::Production => IceProfile {
                servers: self.production_ice_servers.clone(),
                relay_only: self.production_relay_only,
            },
            Environment::Development => IceProfile {
                servers: self.ice_servers.clone(),
                relay_only: false,
            },
        }
    }
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            production_ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            production_relay_only: true,
            nat1to1_ips: Vec::new(),
            ephemeral_udp_port_range: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Keepalive ping period; the pong deadline is six periods
    pub ping_interval_secs: u64,

    /// Per-frame write timeout
    pub write_timeout_secs: u64,

    /// Largest accepted inbound message in bytes
    pub max_message_size: usize,

    /// Outbound mailbox capacity per client
    pub mailbox_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 10,
            write_timeout_secs: 10,
            max_message_size: 512,
            mailbox_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            webrtc: WebRTCConfig::default(),
            chat: ChatConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration for the selected environment
    pub fn validate(&self, environment: Environment) -> Result<(), Box<dyn std::error::Error>> {
        if self.http.port == 0 {
            return Err("HTTP port must be non-zero".into());
        }

        if self.chat.ping_interval_secs == 0 {
            return Err("Chat ping interval must be non-zero".into());
        }

        if self.chat.write_timeout_secs == 0 {
            return Err("Chat write timeout must be non-zero".into());
        }

        if self.chat.mailbox_capacity == 0 {
            return Err("Chat mailbox capacity must be non-zero".into());
        }

        if self.chat.max_message_size == 0 {
            return Err("Chat max message size must be non-zero".into());
        }

        if let Some([min, max]) = self.webrtc.ephemeral_udp_port_range {
            if min > max {
                return Err("WebRTC ephemeral UDP port range is inverted".into());
            }
        }

        for ip in &self.webrtc.nat1to1_ips {
            if ip.parse::<std::net::IpAddr>().is_err() {
                return Err(format!("WebRTC nat1to1 entry '{}' is not an IP address", ip).into());
            }
        }

        // Relayed-only candidates are useless without a TURN server
        if environment.is_production()
            && self.webrtc.production_relay_only
            && !self.webrtc.production_ice_servers.iter().any(IceServerConfig::is_turn)
        {
            return Err("Production relay-only mode requires a turn: or turns: ICE server".into());
        }

        Ok(())
    }
}
