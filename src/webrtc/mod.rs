//! WebRTC relay implementation
//!
//! This module provides the selective-forwarding core:
//! - Peer connection creation and the `MediaPeer` abstraction
//! - The per-session peer registry and shared track table
//! - Renegotiation of every peer against the track table
//! - Inbound track relay and keyframe requests
//! - The `{event, data}` signaling envelope

pub mod peer_connection;
pub mod signaling;
pub mod registry;
pub mod renegotiation;
pub mod keyframe;
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

pub use peer_connection::{same_track, InboundTrack, LocalTrack, MediaPeer, PeerConnectionManager};
pub use registry::{PeerConnectionState, PeerRegistry, SharedTrack};
pub use signaling::{SignalEvent, SignalingMessage};

use std::error::Error;
use std::fmt;

/// WebRTC-related errors
#[derive(Debug)]
pub enum WebRTCError {
    /// Peer connection creation or teardown failed
    ConnectionFailed(String),
    /// SDP processing failed
    SdpError(String),
    /// ICE candidate processing failed
    IceError(String),
    /// Track attach/detach or RTP/RTCP I/O failed
    MediaError(String),
    /// Signaling envelope could not be encoded or decoded
    SignalingError(String),
    /// Writing to or reading from the signaling connection failed
    TransportError(String),
    /// Invalid state transition
    InvalidState(String),
}

impl fmt::Display for WebRTCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRTCError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebRTCError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            WebRTCError::IceError(msg) => write!(f, "ICE error: {}", msg),
            WebRTCError::MediaError(msg) => write!(f, "Media error: {}", msg),
            WebRTCError::SignalingError(msg) => write!(f, "Signaling error: {}", msg),
            WebRTCError::TransportError(msg) => write!(f, "Transport error: {}", msg),
            WebRTCError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl Error for WebRTCError {}
