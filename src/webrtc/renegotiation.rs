//! Renegotiation engine
//!
//! Brings every peer's outbound senders in line with the registry's shared
//! track table and pushes a fresh offer to each peer whose senders changed.
//! A pass holds the registry lock from start to finish, network writes
//! included, so two passes never race on the track graph.

use super::keyframe::dispatch_keyframes;
use super::registry::{PeerConnectionState, PeerRegistry, RegistryInner, SharedTrack};
use super::{SignalingMessage, WebRTCError};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use webrtc::track::track_local::TrackLocal;

/// Immediate passes attempted before falling back to a delayed retry
pub const MAX_IMMEDIATE_ATTEMPTS: usize = 25;

/// Delay before a deferred pass
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Outcome of one sweep over the connection list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    Converged,
    Retry,
}

impl PeerRegistry {
    /// Run one reconciliation pass and then request keyframes from every peer.
    ///
    /// Up to [`MAX_IMMEDIATE_ATTEMPTS`] sweeps run back to back. If the last
    /// one still wants a retry, a single deferred pass is queued on the
    /// registry's retry worker and this call returns.
    pub async fn reconcile(&self) {
        let mut inner = self.inner.lock().await;

        for attempt in 0.. {
            if attempt == MAX_IMMEDIATE_ATTEMPTS {
                warn!(
                    "Renegotiation did not converge after {} attempts, retrying in {:?}",
                    MAX_IMMEDIATE_ATTEMPTS, RETRY_DELAY
                );
                self.schedule_retry();
                break;
            }

            if sweep(&mut inner).await == Sweep::Converged {
                break;
            }
        }

        dispatch_keyframes(&inner.connections).await;
    }
}

/// Walk the connection list once. Any structural change or failed step ends
/// the walk with [`Sweep::Retry`] so the next sweep starts over from index 0.
async fn sweep(inner: &mut RegistryInner) -> Sweep {
    for index in 0..inner.connections.len() {
        let state = inner.connections[index].clone();

        if state.is_closed() {
            inner.remove_closed();
            return Sweep::Retry;
        }

        if let Err(e) = sync_peer(&state, &inner.tracks).await {
            debug!("Peer {} needs another pass: {}", state.id(), e);
            return Sweep::Retry;
        }
    }
    Sweep::Converged
}

/// Detach withdrawn tracks, attach missing ones and offer if anything changed
async fn sync_peer(
    state: &Arc<PeerConnectionState>,
    tracks: &HashMap<String, SharedTrack>,
) -> Result<(), WebRTCError> {
    let peer = state.peer();
    let mut accounted: HashSet<String> = HashSet::new();

    // A sender still carrying a replaced track counts as stale
    for attached in peer.outbound_tracks().await {
        match tracks.get(attached.id()) {
            Some(shared) if shared.is(&attached) => {
                accounted.insert(attached.id().to_string());
            }
            _ => {
                peer.detach_track(&attached).await?;
                state.mark_changed();
            }
        }
    }

    // Never send a peer its own media back
    for inbound in peer.inbound_tracks().await {
        accounted.insert(inbound.id);
    }

    for (track_id, track) in tracks {
        if !accounted.contains(track_id) {
            peer.attach_track(track.local()).await?;
            state.mark_changed();
        }
    }

    if state.needs_offer() {
        let offer = peer.create_local_offer().await?;
        let message = SignalingMessage::offer(&offer)?;
        state.writer().send_signal(&message).await?;
        state.offer_delivered();
        debug!("Sent offer to peer {}", state.id());
    }

    Ok(())
}
