//! Per-session text chat
//!
//! A [`ChatHub`] task owns the membership of one session; each websocket
//! client runs a read pump and a write pump against its own mailbox.

pub mod client;
pub mod hub;

pub use client::{normalize_message, serve_chat, serve_chat_client};
pub use hub::{ChatHub, Membership};

use crate::config::ChatConfig;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Why a chat client was disconnected
#[derive(Debug)]
pub enum ChatError {
    /// No pong arrived before the keepalive deadline
    PongTimeout,
    /// Inbound frame larger than the configured limit
    MessageTooLarge { size: usize, limit: usize },
    /// The websocket failed or a write did not finish in time
    Transport(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::PongTimeout => write!(f, "pong timeout"),
            ChatError::MessageTooLarge { size, limit } => {
                write!(f, "message of {} bytes exceeds limit of {}", size, limit)
            }
            ChatError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl Error for ChatError {}

/// Timing and sizing for chat clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    /// Idle time before a keepalive ping is written
    pub ping_interval: Duration,
    /// Upper bound on any single frame write
    pub write_timeout: Duration,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
    /// Outbound messages a client may have queued before it is evicted
    pub mailbox_capacity: usize,
}

impl ChatSettings {
    /// How long a client may stay silent (no pong) before its read fails
    pub fn pong_timeout(&self) -> Duration {
        self.ping_interval * 6
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ChatSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
            max_message_size: config.max_message_size,
            mailbox_capacity: config.mailbox_capacity,
        }
    }
}
