//! WebRTC Signaling Protocol
//!
//! Every control-channel frame is a JSON object `{"event": ..., "data": ...}`
//! where `data` is itself a JSON-encoded payload (a session description for
//! `offer`/`answer`, an ICE candidate init for `candidate`).

use super::WebRTCError;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Known signaling event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Session description sent relay -> peer
    Offer,
    /// Session description sent peer -> relay
    Answer,
    /// ICE candidate, both directions
    Candidate,
}

impl SignalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalEvent::Offer => "offer",
            SignalEvent::Answer => "answer",
            SignalEvent::Candidate => "candidate",
        }
    }

    pub fn parse(event: &str) -> Option<Self> {
        match event {
            "offer" => Some(SignalEvent::Offer),
            "answer" => Some(SignalEvent::Answer),
            "candidate" => Some(SignalEvent::Candidate),
            _ => None,
        }
    }
}

/// Signaling envelope exchanged over a peer's websocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub event: String,
    pub data: String,
}

impl SignalingMessage {
    /// Parse a signaling message from JSON
    pub fn from_json(json: &str) -> Result<Self, WebRTCError> {
        serde_json::from_str(json)
            .map_err(|e| WebRTCError::SignalingError(format!("Invalid signaling message: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, WebRTCError> {
        serde_json::to_string(self)
            .map_err(|e| WebRTCError::SignalingError(format!("Failed to serialize message: {}", e)))
    }

    /// The event kind, if it is one this relay understands
    pub fn kind(&self) -> Option<SignalEvent> {
        SignalEvent::parse(&self.event)
    }

    /// Create an offer message carrying a local session description
    pub fn offer(description: &RTCSessionDescription) -> Result<Self, WebRTCError> {
        let data = serde_json::to_string(description)
            .map_err(|e| WebRTCError::SdpError(format!("Failed to encode offer: {}", e)))?;
        Ok(Self::new(SignalEvent::Offer, data))
    }

    /// Create a candidate message carrying a locally gathered candidate
    pub fn candidate(candidate: &RTCIceCandidateInit) -> Result<Self, WebRTCError> {
        let data = serde_json::to_string(candidate)
            .map_err(|e| WebRTCError::IceError(format!("Failed to encode candidate: {}", e)))?;
        Ok(Self::new(SignalEvent::Candidate, data))
    }

    /// Decode the payload of an `answer` message
    pub fn answer_description(&self) -> Result<RTCSessionDescription, WebRTCError> {
        serde_json::from_str(&self.data)
            .map_err(|e| WebRTCError::SdpError(format!("Invalid SDP answer: {}", e)))
    }

    /// Decode the payload of a `candidate` message
    pub fn candidate_init(&self) -> Result<RTCIceCandidateInit, WebRTCError> {
        serde_json::from_str(&self.data)
            .map_err(|e| WebRTCError::IceError(format!("Invalid ICE candidate: {}", e)))
    }

    fn new(event: SignalEvent, data: String) -> Self {
        Self {
            event: event.as_str().to_string(),
            data,
        }
    }
}
