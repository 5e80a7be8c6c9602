//! Inbound track relay
//!
//! Republishes one peer's inbound media as a [`SharedTrack`] for the rest of
//! the session and withdraws it once the inbound side stops.

use super::registry::{PeerRegistry, SharedTrack};
use super::WebRTCError;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_remote::TrackRemote;

/// A readable inbound RTP stream
#[async_trait]
pub trait RtpSource: Send + Sync {
    fn track_id(&self) -> String;

    fn stream_id(&self) -> String;

    fn capability(&self) -> RTCRtpCodecCapability;

    async fn read_packet(&self) -> Result<Packet, WebRTCError>;
}

#[async_trait]
impl RtpSource for TrackRemote {
    fn track_id(&self) -> String {
        self.id().to_string()
    }

    fn stream_id(&self) -> String {
        TrackRemote::stream_id(self).to_string()
    }

    fn capability(&self) -> RTCRtpCodecCapability {
        self.codec().capability
    }

    async fn read_packet(&self) -> Result<Packet, WebRTCError> {
        self.read_rtp()
            .await
            .map(|(packet, _)| packet)
            .map_err(|e| WebRTCError::MediaError(format!("RTP read failed: {}", e)))
    }
}

/// Relay `source` into `registry` on its own task.
///
/// The task resolves to the number of packets forwarded.
pub fn spawn_relay(registry: Arc<PeerRegistry>, source: Arc<dyn RtpSource>) -> JoinHandle<u64> {
    tokio::spawn(async move { forward_packets(&registry, source.as_ref()).await })
}

/// Publish a shared track for `source` and copy packets into it until either
/// side fails, then withdraw the track.
pub async fn forward_packets(registry: &PeerRegistry, source: &dyn RtpSource) -> u64 {
    let track = SharedTrack::new(source.capability(), &source.track_id(), &source.stream_id());
    let track_id = track.id().to_string();
    info!("Relaying track {} (stream {})", track_id, track.stream_id());

    registry.attach_track(track.clone()).await;

    let mut forwarded: u64 = 0;
    loop {
        let packet = match source.read_packet().await {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Inbound track {} ended: {}", track_id, e);
                break;
            }
        };

        if let Err(e) = track.write(&packet).await {
            debug!("{}", e);
            break;
        }
        forwarded += 1;
    }

    registry.detach_track(&track).await;
    info!("Relay for track {} stopped after {} packets", track_id, forwarded);
    forwarded
}
