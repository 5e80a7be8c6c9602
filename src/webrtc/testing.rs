//! In-memory peer used by the relay tests

use super::relay::RtpSource;
use super::{same_track, InboundTrack, LocalTrack, MediaPeer, PeerConnectionState, SharedTrack, WebRTCError};
use crate::transport::writer::tests::channel_writer;
use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

pub(crate) struct FakePeer {
    state: Mutex<RTCPeerConnectionState>,
    outbound: Mutex<Vec<LocalTrack>>,
    inbound: Mutex<Vec<InboundTrack>>,
    pub offers_created: AtomicUsize,
    pub fail_offers: AtomicBool,
    pub fail_attach: AtomicBool,
    pub plis: Mutex<Vec<u32>>,
    pub answers: Mutex<Vec<RTCSessionDescription>>,
    pub candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl FakePeer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RTCPeerConnectionState::New),
            outbound: Mutex::new(Vec::new()),
            inbound: Mutex::new(Vec::new()),
            offers_created: AtomicUsize::new(0),
            fail_offers: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
            plis: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_state(&self, state: RTCPeerConnectionState) {
        *self.state.lock() = state;
    }

    /// Pretend the remote side is publishing `id`
    pub(crate) fn publish(&self, id: &str, ssrc: u32) {
        self.inbound.lock().push(InboundTrack {
            id: id.to_string(),
            ssrc,
        });
    }

    /// Sorted ids of the attached tracks
    pub(crate) fn outbound(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.outbound.lock().iter().map(|t| t.id().to_string()).collect();
        ids.sort();
        ids
    }

    /// Sorted stream ids of the attached tracks
    pub(crate) fn outbound_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .outbound
            .lock()
            .iter()
            .map(|t| t.stream_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub(crate) fn offers(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaPeer for FakePeer {
    fn state(&self) -> RTCPeerConnectionState {
        *self.state.lock()
    }

    async fn outbound_tracks(&self) -> Vec<LocalTrack> {
        self.outbound.lock().clone()
    }

    async fn inbound_tracks(&self) -> Vec<InboundTrack> {
        self.inbound.lock().clone()
    }

    async fn attach_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<(), WebRTCError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(WebRTCError::MediaError("attach refused".to_string()));
        }
        self.outbound.lock().push(track as LocalTrack);
        Ok(())
    }

    async fn detach_track(&self, track: &LocalTrack) -> Result<(), WebRTCError> {
        self.outbound.lock().retain(|attached| !same_track(attached, track));
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<RTCSessionDescription, WebRTCError> {
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(WebRTCError::SdpError("offer refused".to_string()));
        }
        serde_json::from_str(r#"{"type":"offer","sdp":"v=0\r\n"}"#)
            .map_err(|e| WebRTCError::SdpError(e.to_string()))
    }

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), WebRTCError> {
        self.answers.lock().push(answer);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), WebRTCError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn send_picture_loss(&self, media_ssrc: u32) -> Result<(), WebRTCError> {
        self.plis.lock().push(media_ssrc);
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), WebRTCError> {
        self.set_state(RTCPeerConnectionState::Closed);
        Ok(())
    }
}

/// A fake peer registered behind an in-memory signaling writer
pub(crate) fn fake_state() -> (
    Arc<FakePeer>,
    Arc<PeerConnectionState>,
    mpsc::UnboundedReceiver<Message>,
) {
    let fake = FakePeer::new();
    let (writer, rx) = channel_writer();
    let state = PeerConnectionState::new(fake.clone(), writer);
    (fake, state, rx)
}

pub(crate) fn video_track(id: &str, stream_id: &str) -> SharedTrack {
    SharedTrack::new(vp8(), id, stream_id)
}

fn vp8() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/VP8".to_string(),
        clock_rate: 90000,
        ..Default::default()
    }
}

/// An inbound RTP stream fed from a channel; closing the sender ends it
pub(crate) struct ChannelSource {
    id: String,
    stream_id: String,
    packets: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<Packet>>,
}

#[async_trait]
impl RtpSource for ChannelSource {
    fn track_id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn capability(&self) -> RTCRtpCodecCapability {
        vp8()
    }

    async fn read_packet(&self) -> Result<Packet, WebRTCError> {
        self.packets
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WebRTCError::MediaError("source closed".to_string()))
    }
}

pub(crate) fn channel_source(
    id: &str,
    stream_id: &str,
) -> (tokio::sync::mpsc::Sender<Packet>, Arc<ChannelSource>) {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let source = Arc::new(ChannelSource {
        id: id.to_string(),
        stream_id: stream_id.to_string(),
        packets: tokio::sync::Mutex::new(rx),
    });
    (tx, source)
}
