//! WebRTC Signaling Server
//!
//! One handler per peer websocket. The relay always offers; the browser
//! answers and trickles candidates. Room participants publish and subscribe;
//! stream-alias peers only subscribe.
//!
//! 1. Socket upgraded, peer connection created with recvonly audio/video
//! 2. Peer appended to the session registry, reconciliation sends the first offer
//! 3. `answer` and `candidate` frames are applied until the socket or the
//!    connection fails
//! 4. Connection closed, registry reconciled so the peer is dropped

use super::{FrameStream, SharedWriter};
use crate::webrtc::relay::{spawn_relay, RtpSource};
use crate::webrtc::{
    MediaPeer, PeerConnectionManager, PeerConnectionState, PeerRegistry, SignalEvent,
    SignalingMessage, WebRTCError,
};
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// What a signaling peer may do in its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Room member: inbound tracks are relayed to everyone else
    Participant,
    /// Stream-alias peer: receives the room's tracks, publishes nothing
    Subscriber,
}

impl PeerRole {
    pub fn publishes(&self) -> bool {
        *self == PeerRole::Participant
    }
}

/// Handle a WebRTC signaling WebSocket connection
pub async fn handle_signaling_connection(
    socket: WebSocket,
    registry: Arc<PeerRegistry>,
    manager: Arc<PeerConnectionManager>,
    role: PeerRole,
) {
    let (ws_sender, ws_receiver) = socket.split();
    let writer = Arc::new(SharedWriter::new(Box::pin(ws_sender)));

    let peer_connection = match manager.create_peer_connection().await {
        Ok(pc) => pc,
        Err(e) => {
            error!("Failed to create peer connection: {}", e);
            let _ = writer.close().await;
            return;
        }
    };

    if let Err(e) = PeerConnectionManager::add_receive_transceivers(&peer_connection).await {
        error!("{}", e);
        let _ = peer_connection.close().await;
        let _ = writer.close().await;
        return;
    }

    let terminated = Arc::new(Notify::new());
    setup_callbacks(&peer_connection, &writer, &registry, &terminated, role);

    let state = PeerConnectionState::new(peer_connection, writer);
    serve_peer(state, Box::pin(ws_receiver), &registry, &terminated).await;
}

/// Register `state`, run its signaling loop and clean up on every exit path.
///
/// The loop also ends when `terminated` is notified, which happens once the
/// native connection reports `failed` or `closed`.
pub async fn serve_peer(
    state: Arc<PeerConnectionState>,
    mut stream: FrameStream,
    registry: &PeerRegistry,
    terminated: &Notify,
) {
    let peer_id = state.id();
    info!("New signaling connection for peer {}", peer_id);

    registry.append(state.clone()).await;
    registry.reconcile().await;

    let outcome = tokio::select! {
        result = read_loop(&state, &mut stream) => result,
        _ = terminated.notified() => Err(WebRTCError::InvalidState("peer connection terminated".to_string())),
    };

    match outcome {
        Ok(()) => debug!("Peer {} closed its signaling connection", peer_id),
        Err(e) => warn!("Peer {} signaling terminated: {}", peer_id, e),
    }

    if let Err(e) = state.peer().close_connection().await {
        debug!("Peer {} close: {}", peer_id, e);
    }
    let _ = state.writer().close().await;

    // The native close callback reconciles too; a second pass is a no-op
    registry.reconcile().await;
    info!("Signaling connection for peer {} finished", peer_id);
}

async fn read_loop(state: &PeerConnectionState, stream: &mut FrameStream) -> Result<(), WebRTCError> {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(WebRTCError::TransportError(format!("WebSocket error: {}", e))),
        };

        let message = SignalingMessage::from_json(text.as_str())?;
        handle_signaling_message(state, &message).await?;
    }
    Ok(())
}

/// Apply one inbound signaling message to the peer connection
async fn handle_signaling_message(
    state: &PeerConnectionState,
    message: &SignalingMessage,
) -> Result<(), WebRTCError> {
    match message.kind() {
        Some(SignalEvent::Candidate) => {
            let candidate = message.candidate_init()?;
            state.peer().add_remote_candidate(candidate).await
        }
        Some(SignalEvent::Answer) => {
            let answer = message.answer_description()?;
            state.peer().apply_answer(answer).await
        }
        _ => {
            debug!("Ignoring '{}' from peer {}", message.event, state.id());
            Ok(())
        }
    }
}

/// React to a native connection state change.
///
/// `failed` and `closed` both end the signaling loop. A failed connection is
/// closed, which reports `closed` in turn; a closed one gets a reconciliation
/// pass so the registry drops it.
pub(crate) fn on_state_change(
    state: RTCPeerConnectionState,
    peer: &Weak<dyn MediaPeer>,
    registry: &Weak<PeerRegistry>,
    terminated: &Notify,
) {
    debug!("Peer connection state changed: {}", state);
    match state {
        RTCPeerConnectionState::Failed => {
            terminated.notify_one();
            if let Some(peer) = peer.upgrade() {
                tokio::spawn(async move {
                    if let Err(e) = peer.close_connection().await {
                        warn!("Failed to close failed peer connection: {}", e);
                    }
                });
            }
        }
        RTCPeerConnectionState::Closed => {
            terminated.notify_one();
            if let Some(registry) = registry.upgrade() {
                tokio::spawn(async move { registry.reconcile().await });
            }
        }
        _ => {}
    }
}

/// Relay an inbound track into the session unless the peer only subscribes
pub(crate) fn relay_inbound(
    role: PeerRole,
    registry: &Weak<PeerRegistry>,
    source: Arc<dyn RtpSource>,
) -> Option<JoinHandle<u64>> {
    if !role.publishes() {
        debug!("Ignoring inbound track {} from subscribe-only peer", source.track_id());
        return None;
    }
    let registry = registry.upgrade()?;
    Some(spawn_relay(registry, source))
}

/// Hook the native connection's callbacks into signaling, the registry and the relay
fn setup_callbacks(
    peer_connection: &Arc<RTCPeerConnection>,
    writer: &Arc<SharedWriter>,
    registry: &Arc<PeerRegistry>,
    terminated: &Arc<Notify>,
    role: PeerRole,
) {
    let weak_writer = Arc::downgrade(writer);
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let weak_writer = weak_writer.clone();
        Box::pin(async move {
            let (Some(candidate), Some(writer)) = (candidate, weak_writer.upgrade()) else {
                return;
            };
            let message = candidate
                .to_json()
                .map_err(|e| WebRTCError::IceError(format!("Failed to encode candidate: {}", e)))
                .and_then(|init| SignalingMessage::candidate(&init));
            match message {
                Ok(message) => {
                    if let Err(e) = writer.send_signal(&message).await {
                        debug!("Dropping local candidate: {}", e);
                    }
                }
                Err(e) => warn!("{}", e),
            }
        })
    }));

    let weak_peer: Weak<dyn MediaPeer> = Arc::<RTCPeerConnection>::downgrade(peer_connection);
    let weak_registry = Arc::downgrade(registry);
    let terminated = terminated.clone();
    peer_connection.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        on_state_change(s, &weak_peer, &weak_registry, &terminated);
        Box::pin(async {})
    }));

    let weak_registry = Arc::downgrade(registry);
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            info!(
                "Inbound track {} ({}, ssrc {})",
                track.id(),
                track.codec().capability.mime_type,
                track.ssrc()
            );
            let _ = relay_inbound(role, &weak_registry, track);
            Box::pin(async {})
        },
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::writer::tests::drain_signals;
    use crate::webrtc::testing::{channel_source, fake_state, video_track, FakePeer};
    use futures::channel::mpsc;
    use futures::stream;

    fn frames(texts: &[&str]) -> FrameStream {
        let items: Vec<Result<Message, axum::Error>> = texts
            .iter()
            .map(|t| Ok(Message::Text(t.to_string().into())))
            .collect();
        Box::pin(stream::iter(items))
    }

    const CANDIDATE: &str = r#"{"event":"candidate","data":"{\"candidate\":\"candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host\",\"sdpMid\":\"0\",\"sdpMLineIndex\":0}"}"#;
    const ANSWER: &str = r#"{"event":"answer","data":"{\"type\":\"answer\",\"sdp\":\"v=0\\r\\n\"}"}"#;

    #[tokio::test]
    async fn test_answer_and_candidate_applied() {
        let registry = PeerRegistry::new();
        let (fake, state, mut rx) = fake_state();

        serve_peer(state, frames(&[CANDIDATE, ANSWER]), &registry, &Notify::new()).await;

        assert_eq!(fake.candidates.lock().len(), 1);
        assert_eq!(fake.answers.lock().len(), 1);
        let sent = drain_signals(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), Some(SignalEvent::Offer));
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let registry = PeerRegistry::new();
        let (fake, state, _rx) = fake_state();

        let bye = r#"{"event":"bye","data":""}"#;
        let offer = r#"{"event":"offer","data":"{}"}"#;
        serve_peer(state, frames(&[bye, offer, CANDIDATE]), &registry, &Notify::new()).await;

        assert_eq!(fake.candidates.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_candidate_only_drops_that_peer() {
        let registry = PeerRegistry::new();
        let (other, other_state, _rx_other) = fake_state();
        registry.append(other_state.clone()).await;

        let (fake, state, _rx) = fake_state();
        let malformed = r#"{"event":"candidate","data":"<malformed>"}"#;
        serve_peer(state, frames(&[malformed, ANSWER]), &registry, &Notify::new()).await;

        assert!(fake.answers.lock().is_empty());
        assert_eq!(fake.state(), RTCPeerConnectionState::Closed);
        assert_ne!(other.state(), RTCPeerConnectionState::Closed);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), other_state.id());
    }

    #[tokio::test]
    async fn test_invalid_envelope_terminates_handler() {
        let registry = PeerRegistry::new();
        let (fake, state, _rx) = fake_state();
        serve_peer(state, frames(&["not json", CANDIDATE]), &registry, &Notify::new()).await;
        assert!(fake.candidates.lock().is_empty());
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_peer_track_withdrawn_from_others() {
        let registry = PeerRegistry::new();
        let (a, state_a, _rx_a) = fake_state();
        let (b, state_b, _rx_b) = fake_state();
        registry.append(state_a).await;

        // B stays connected through a live socket
        let (tx_b, rx_b) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let serving = {
            let registry = registry.clone();
            tokio::spawn(async move { serve_peer(state_b, Box::pin(rx_b), &registry, &Notify::new()).await })
        };
        while registry.peer_count().await < 2 {
            tokio::task::yield_now().await;
        }

        a.publish("a-video", 5);
        let track = video_track("a-video", "a");
        registry.attach_track(track.clone()).await;
        assert_eq!(b.outbound(), vec!["a-video".to_string()]);

        // A fails, its relay stops and the connection closes
        a.set_state(RTCPeerConnectionState::Closed);
        registry.detach_track(&track).await;

        assert_eq!(registry.peer_count().await, 1);
        assert!(b.outbound().is_empty());

        drop(tx_b);
        serving.await.unwrap();
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_native_termination_ends_loop() {
        let registry = PeerRegistry::new();
        let (fake, state, _rx) = fake_state();
        let (_tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();

        let terminated = Notify::new();
        terminated.notify_one();
        serve_peer(state, Box::pin(rx), &registry, &terminated).await;

        assert_eq!(fake.state(), RTCPeerConnectionState::Closed);
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_state_closes_peer_and_ends_loop() {
        let registry = PeerRegistry::new();
        let (other, other_state, _rx_other) = fake_state();
        registry.append(other_state).await;

        let (fake, state, _rx) = fake_state();
        let (_tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let terminated = Arc::new(Notify::new());
        let serving = {
            let registry = registry.clone();
            let terminated = terminated.clone();
            tokio::spawn(async move { serve_peer(state, Box::pin(rx), &registry, &terminated).await })
        };
        while registry.peer_count().await < 2 {
            tokio::task::yield_now().await;
        }

        let weak_peer: Weak<dyn MediaPeer> = Arc::<FakePeer>::downgrade(&fake);
        on_state_change(
            RTCPeerConnectionState::Failed,
            &weak_peer,
            &Arc::downgrade(&registry),
            &terminated,
        );
        serving.await.unwrap();

        assert_eq!(fake.state(), RTCPeerConnectionState::Closed);
        assert_ne!(other.state(), RTCPeerConnectionState::Closed);
        assert_eq!(registry.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_closed_state_reconciles_registry() {
        let registry = PeerRegistry::new();
        let (fake, state, _rx) = fake_state();
        let (_, other_state, _rx_other) = fake_state();
        registry.append(state).await;
        registry.append(other_state).await;

        fake.set_state(RTCPeerConnectionState::Closed);
        let weak_peer: Weak<dyn MediaPeer> = Arc::<FakePeer>::downgrade(&fake);
        let terminated = Notify::new();
        on_state_change(
            RTCPeerConnectionState::Closed,
            &weak_peer,
            &Arc::downgrade(&registry),
            &terminated,
        );

        // The loop is woken and the spawned pass drops the peer
        terminated.notified().await;
        while registry.peer_count().await > 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_connecting_state_is_not_terminal() {
        let registry = PeerRegistry::new();
        let (fake, state, _rx) = fake_state();
        registry.append(state).await;

        let weak_peer: Weak<dyn MediaPeer> = Arc::<FakePeer>::downgrade(&fake);
        let terminated = Notify::new();
        on_state_change(
            RTCPeerConnectionState::Connecting,
            &weak_peer,
            &Arc::downgrade(&registry),
            &terminated,
        );
        tokio::task::yield_now().await;

        assert_ne!(fake.state(), RTCPeerConnectionState::Closed);
        assert_eq!(registry.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscriber_tracks_are_not_relayed() {
        let registry = PeerRegistry::new();
        let (_tx, source) = channel_source("viewer-cam", "viewer");

        assert!(relay_inbound(PeerRole::Subscriber, &Arc::downgrade(&registry), source).is_none());
        tokio::task::yield_now().await;
        assert!(registry.track_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_participant_tracks_are_relayed() {
        let registry = PeerRegistry::new();
        let (tx, source) = channel_source("cam", "room");

        let relay = relay_inbound(PeerRole::Participant, &Arc::downgrade(&registry), source).unwrap();
        while registry.track_ids().await.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.track_ids().await, vec!["cam".to_string()]);

        drop(tx);
        relay.await.unwrap();
        assert!(registry.track_ids().await.is_empty());
    }
}
