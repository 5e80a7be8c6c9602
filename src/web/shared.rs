//! Shared state for videochat-relay
//!
//! Everything the HTTP handlers need: configuration, the session store and
//! the peer connection factory.

use crate::chat::ChatSettings;
use crate::config::{Config, Environment};
use crate::session::{MemorySessionStore, SessionStore};
use crate::webrtc::PeerConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state for the application
#[derive(Clone)]
pub struct SharedState {
    /// Configuration
    pub config: Arc<Config>,

    /// Selected deployment profile
    pub environment: Environment,

    /// Rooms and streams
    pub sessions: Arc<dyn SessionStore>,

    /// Peer connection factory
    pub peer_manager: Arc<PeerConnectionManager>,

    /// Server start time
    pub start_time: Instant,
}

impl SharedState {
    pub fn new(config: Config, environment: Environment) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(ChatSettings::from(&config.chat)));
        let peer_manager = Arc::new(PeerConnectionManager::new(config.webrtc.clone(), environment));
        Self::with_sessions(config, environment, sessions, peer_manager)
    }

    /// Build state around an existing session store
    pub fn with_sessions(
        config: Config,
        environment: Environment,
        sessions: Arc<dyn SessionStore>,
        peer_manager: Arc<PeerConnectionManager>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            environment,
            sessions,
            peer_manager,
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
