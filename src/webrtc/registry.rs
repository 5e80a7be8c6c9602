//! Per-session peer registry
//!
//! Holds every live peer connection of one session together with the table of
//! shared outbound tracks. One async mutex guards both; reconciliation holds
//! it for a whole pass.

use super::{LocalTrack, MediaPeer, WebRTCError};
use crate::transport::SharedWriter;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// One inbound stream republished to the other peers of a session
#[derive(Clone)]
pub struct SharedTrack {
    local: Arc<TrackLocalStaticRTP>,
}

impl SharedTrack {
    pub fn new(capability: RTCRtpCodecCapability, id: &str, stream_id: &str) -> Self {
        Self {
            local: Arc::new(TrackLocalStaticRTP::new(
                capability,
                id.to_string(),
                stream_id.to_string(),
            )),
        }
    }

    pub fn id(&self) -> &str {
        self.local.id()
    }

    pub fn stream_id(&self) -> &str {
        self.local.stream_id()
    }

    pub fn local(&self) -> Arc<TrackLocalStaticRTP> {
        self.local.clone()
    }

    /// Whether `attached` is this track, not merely one with the same id
    pub fn is(&self, attached: &LocalTrack) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.local), Arc::as_ptr(attached))
    }

    pub fn same_as(&self, other: &SharedTrack) -> bool {
        Arc::ptr_eq(&self.local, &other.local)
    }

    /// Forward one RTP packet to every bound sender.
    ///
    /// A sender whose transport already went away reports a closed pipe; that
    /// is not a failure of the track itself.
    pub async fn write(&self, packet: &Packet) -> Result<(), WebRTCError> {
        match self.local.write_rtp(packet).await {
            Ok(_) | Err(webrtc::Error::ErrClosedPipe) => Ok(()),
            Err(e) => Err(WebRTCError::MediaError(format!(
                "Failed to write RTP to track {}: {}",
                self.id(),
                e
            ))),
        }
    }
}

impl std::fmt::Debug for SharedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTrack")
            .field("id", &self.id())
            .field("stream_id", &self.stream_id())
            .finish()
    }
}

/// A registered peer: native connection plus its signaling writer
pub struct PeerConnectionState {
    id: Uuid,
    peer: Arc<dyn MediaPeer>,
    writer: Arc<SharedWriter>,
    needs_offer: AtomicBool,
}

impl PeerConnectionState {
    pub fn new(peer: Arc<dyn MediaPeer>, writer: Arc<SharedWriter>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            writer,
            // A fresh peer has never been offered anything
            needs_offer: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &Arc<dyn MediaPeer> {
        &self.peer
    }

    pub fn writer(&self) -> &Arc<SharedWriter> {
        &self.writer
    }

    pub fn is_closed(&self) -> bool {
        self.peer.state() == RTCPeerConnectionState::Closed
    }

    pub(crate) fn mark_changed(&self) {
        self.needs_offer.store(true, Ordering::SeqCst);
    }

    pub(crate) fn needs_offer(&self) -> bool {
        self.needs_offer.load(Ordering::SeqCst)
    }

    pub(crate) fn offer_delivered(&self) {
        self.needs_offer.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct RegistryInner {
    pub(crate) connections: Vec<Arc<PeerConnectionState>>,
    pub(crate) tracks: HashMap<String, SharedTrack>,
}

impl RegistryInner {
    pub(crate) fn remove_closed(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|state| {
            if state.is_closed() {
                info!("Peer {} left", state.id());
                return false;
            }
            true
        });
        before - self.connections.len()
    }
}

/// Peer connections and shared tracks of one session
pub struct PeerRegistry {
    pub(crate) inner: Mutex<RegistryInner>,
    retry_tx: mpsc::UnboundedSender<()>,
}

impl PeerRegistry {
    /// Create an empty registry.
    ///
    /// Must be called from within a Tokio runtime: the deferred-retry worker
    /// is spawned here and lives as long as the registry.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<PeerRegistry>| {
            let (retry_tx, retry_rx) = mpsc::unbounded_channel();
            spawn_retry_worker(weak.clone(), retry_rx);
            Self {
                inner: Mutex::new(RegistryInner {
                    connections: Vec::new(),
                    tracks: HashMap::new(),
                }),
                retry_tx,
            }
        })
    }

    /// Register a new peer connection
    pub async fn append(&self, state: Arc<PeerConnectionState>) {
        let mut inner = self.inner.lock().await;
        inner.connections.push(state.clone());
        info!("Peer {} joined ({} connected)", state.id(), inner.connections.len());
    }

    /// Drop every connection whose native state is closed, returning how many went
    pub async fn remove_closed(&self) -> usize {
        self.inner.lock().await.remove_closed()
    }

    /// Publish a shared track, replacing any entry with the same id, then reconcile
    pub async fn attach_track(&self, track: SharedTrack) {
        {
            let mut inner = self.inner.lock().await;
            debug!("Attaching shared track {} (stream {})", track.id(), track.stream_id());
            inner.tracks.insert(track.id().to_string(), track);
        }
        self.reconcile().await;
    }

    /// Withdraw `track`, then reconcile.
    ///
    /// An entry that has since been replaced by another track with the same id
    /// is left in place.
    pub async fn detach_track(&self, track: &SharedTrack) {
        {
            let mut inner = self.inner.lock().await;
            match inner.tracks.get(track.id()) {
                Some(current) if current.same_as(track) => {
                    inner.tracks.remove(track.id());
                    debug!("Detached shared track {}", track.id());
                }
                Some(_) => debug!("Shared track {} was replaced, keeping the newer entry", track.id()),
                None => {}
            }
        }
        self.reconcile().await;
    }

    /// Current connection list
    pub async fn snapshot(&self) -> Vec<Arc<PeerConnectionState>> {
        self.inner.lock().await.connections.clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn track_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.tracks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Queue one deferred reconciliation pass
    pub(crate) fn schedule_retry(&self) {
        if self.retry_tx.send(()).is_err() {
            debug!("Retry worker gone, dropping deferred reconciliation");
        }
    }
}

fn spawn_retry_worker(registry: Weak<PeerRegistry>, mut retry_rx: mpsc::UnboundedReceiver<()>) {
    tokio::spawn(async move {
        while retry_rx.recv().await.is_some() {
            tokio::time::sleep(super::renegotiation::RETRY_DELAY).await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.reconcile().await;
        }
    });
}
