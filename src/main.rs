//! videochat-relay - Main entry point

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use videochat_relay::config::Config;
use videochat_relay::web::{run_http_server, SharedState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let loaded = args.load_config();
    let mut config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = if args.verbose { "debug".to_string() } else { config.logging.level.clone() };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("VIDEOCHAT_LOG").unwrap_or(log_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .filter_module("webrtc_srtp", log::LevelFilter::Error)
        .init();

    info!("videochat-relay v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!("Loaded configuration from {:?}", args.config),
        Err(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    // Port precedence: --port, then PORT, then the config file
    if let Some(port) = env_var_parse::<u16>("PORT") {
        config.http.port = port;
    }
    if let Some(port) = args.port {
        info!("Overriding HTTP port to {}", port);
        config.http.port = port;
    }

    let environment = args.environment();
    if let Err(e) = config.validate(environment) {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let state = Arc::new(SharedState::new(config, environment));
    state.peer_manager.log_profile();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    run_http_server(state, shutdown).await?;
    info!("videochat-relay stopped");
    Ok(())
}

fn env_var_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", name, value);
            None
        }
    }
}
