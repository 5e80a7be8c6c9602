//! videochat-relay - multi-party WebRTC media relay
//!
//! Every room owns a peer registry whose shared tracks are fanned out to all
//! participants, plus a chat hub for text messages.

pub mod config;
pub mod chat;
pub mod session;
pub mod transport;
pub mod web;
pub mod webrtc;

// Re-exports
pub use crate::config::{Config, Environment, WebRTCConfig};
pub use crate::session::{MemorySessionStore, Session, SessionStore};
pub use crate::webrtc::{PeerConnectionManager, PeerRegistry, SignalingMessage, WebRTCError};
