//! Keyframe requests
//!
//! After every reconciliation pass each publisher is asked for a fresh
//! keyframe on every inbound track, so newly attached subscribers can start
//! decoding without waiting for the next natural keyframe.

use super::registry::PeerConnectionState;
use log::trace;
use std::sync::Arc;

/// Send a picture loss indication for every inbound track of every peer.
///
/// Best effort: failures are logged at trace level and otherwise ignored.
pub async fn dispatch_keyframes(connections: &[Arc<PeerConnectionState>]) {
    for state in connections {
        for track in state.peer().inbound_tracks().await {
            if let Err(e) = state.peer().send_picture_loss(track.ssrc).await {
                trace!("PLI for {} on peer {} dropped: {}", track.id, state.id(), e);
            }
        }
    }
}
