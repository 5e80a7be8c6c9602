//! WebRTC PeerConnection management
//!
//! Handles the creation of RTCPeerConnection instances and exposes the subset
//! of the connection the relay drives through the [`MediaPeer`] trait.

use super::WebRTCError;
use crate::config::{Environment, IceProfile, WebRTCConfig};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// A local track bound to one of a peer's senders
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// True when both handles point at the same local track
pub fn same_track(a: &LocalTrack, b: &LocalTrack) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A track the peer is sending to us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTrack {
    pub id: String,
    pub ssrc: u32,
}

/// The operations the relay needs from a native peer connection.
#[async_trait]
pub trait MediaPeer: Send + Sync {
    /// Current aggregate connection state
    fn state(&self) -> RTCPeerConnectionState;

    /// Local tracks currently attached to senders
    async fn outbound_tracks(&self) -> Vec<LocalTrack>;

    /// Remote tracks currently bound to receivers
    async fn inbound_tracks(&self) -> Vec<InboundTrack>;

    async fn attach_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<(), WebRTCError>;

    /// Remove every sender carrying exactly this track
    async fn detach_track(&self, track: &LocalTrack) -> Result<(), WebRTCError>;

    /// Create an offer and apply it as the local description
    async fn create_local_offer(&self) -> Result<RTCSessionDescription, WebRTCError>;

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), WebRTCError>;

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), WebRTCError>;

    /// Ask the sender of `media_ssrc` for a keyframe
    async fn send_picture_loss(&self, media_ssrc: u32) -> Result<(), WebRTCError>;

    async fn close_connection(&self) -> Result<(), WebRTCError>;
}

#[async_trait]
impl MediaPeer for RTCPeerConnection {
    fn state(&self) -> RTCPeerConnectionState {
        self.connection_state()
    }

    async fn outbound_tracks(&self) -> Vec<LocalTrack> {
        let mut tracks = Vec::new();
        for sender in self.get_senders().await {
            if let Some(track) = sender.track().await {
                tracks.push(track);
            }
        }
        tracks
    }

    async fn inbound_tracks(&self) -> Vec<InboundTrack> {
        let mut tracks = Vec::new();
        // A receiver can carry several remote tracks (one per RID or SSRC)
        for receiver in self.get_receivers().await {
            for track in receiver.tracks().await {
                tracks.push(InboundTrack {
                    id: track.id().to_string(),
                    ssrc: track.ssrc(),
                });
            }
        }
        tracks
    }

    async fn attach_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<(), WebRTCError> {
        self.add_track(track as LocalTrack)
            .await
            .map(|_| ())
            .map_err(|e| WebRTCError::MediaError(format!("Failed to add track: {}", e)))
    }

    async fn detach_track(&self, track: &LocalTrack) -> Result<(), WebRTCError> {
        for sender in self.get_senders().await {
            let attached = match sender.track().await {
                Some(current) => same_track(&current, track),
                None => false,
            };
            if attached {
                self.remove_track(&sender)
                    .await
                    .map_err(|e| WebRTCError::MediaError(format!("Failed to remove track {}: {}", track.id(), e)))?;
            }
        }
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<RTCSessionDescription, WebRTCError> {
        let offer = self.create_offer(None).await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to create offer: {}", e)))?;

        self.set_local_description(offer.clone()).await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set local description: {}", e)))?;

        Ok(offer)
    }

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), WebRTCError> {
        self.set_remote_description(answer).await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), WebRTCError> {
        self.add_ice_candidate(candidate).await
            .map_err(|e| WebRTCError::IceError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn send_picture_loss(&self, media_ssrc: u32) -> Result<(), WebRTCError> {
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        self.write_rtcp(&[Box::new(pli)])
            .await
            .map(|_| ())
            .map_err(|e| WebRTCError::MediaError(format!("Failed to send PLI: {}", e)))
    }

    async fn close_connection(&self) -> Result<(), WebRTCError> {
        self.close().await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to close connection: {}", e)))
    }
}

/// PeerConnection factory for relay sessions
pub struct PeerConnectionManager {
    config: WebRTCConfig,
    profile: IceProfile,
    environment: Environment,
}

impl PeerConnectionManager {
    /// Create a new PeerConnection manager
    pub fn new(config: WebRTCConfig, environment: Environment) -> Self {
        let profile = config.ice_profile(environment);
        Self {
            config,
            profile,
            environment,
        }
    }

    pub fn log_profile(&self) {
        info!(
            "WebRTC profile {:?}: {} ICE server(s), relay_only={}",
            self.environment, self.profile.servers.len(), self.profile.relay_only
        );
    }

    /// Create a new PeerConnection with the configured settings
    pub async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, WebRTCError> {
        let api = self.build_api()?;

        let rtc_config = RTCConfiguration {
            ice_servers: self.rtc_ice_servers(),
            ice_transport_policy: if self.profile.relay_only {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        debug!(
            "Created peer connection ({} ICE servers, relay_only={})",
            self.profile.servers.len(),
            self.profile.relay_only
        );
        Ok(Arc::new(peer_connection))
    }

    /// Add receive-only audio and video transceivers so the peer can publish
    pub async fn add_receive_transceivers(peer_connection: &Arc<RTCPeerConnection>) -> Result<(), WebRTCError> {
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: Vec::new(),
            };
            peer_connection.add_transceiver_from_kind(kind, Some(init)).await
                .map_err(|e| WebRTCError::MediaError(format!("Failed to add {:?} transceiver: {}", kind, e)))?;
        }
        Ok(())
    }

    fn build_api(&self) -> Result<API, WebRTCError> {
        let mut setting_engine = SettingEngine::default();

        if !self.config.nat1to1_ips.is_empty() {
            setting_engine.set_nat_1to1_ips(self.config.nat1to1_ips.clone(), RTCIceCandidateType::Host);
        }

        if let Some(range) = self.config.ephemeral_udp_port_range {
            let ephemeral = EphemeralUDP::new(range[0], range[1])
                .map_err(|e| WebRTCError::ConnectionFailed(format!("Invalid ICE UDP port range: {}", e)))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        // The relay forwards whatever the browsers publish, so accept the full default codec set
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build())
    }

    fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.profile.servers.iter().map(|server| {
            RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            }
        }).collect()
    }
}

impl std::fmt::Debug for PeerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionManager")
            .field("environment", &self.environment)
            .field("ice_servers", &self.profile.servers.len())
            .field("relay_only", &self.profile.relay_only)
            .finish()
    }
}
