use clap::Parser;
use std::path::PathBuf;

use videochat_relay::config;

#[derive(Parser, Debug)]
#[command(name = "videochat-relay")]
#[command(author = "Videochat Relay Team")]
#[command(version = "0.1.0")]
#[command(about = "Multi-party WebRTC media relay with per-room chat", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/videochat-relay.toml")]
    pub config: PathBuf,

    /// HTTP port (overrides config and PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Use the production ICE profile regardless of ENVIRONMENT
    #[arg(long, action)]
    pub production: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    pub fn environment(&self) -> config::Environment {
        if self.production {
            return config::Environment::Production;
        }
        config::Environment::from_env_value(std::env::var("ENVIRONMENT").ok().as_deref())
    }
}
