//! Viewer count feed
//!
//! Pushes the number of connected peers of a session as a plain decimal text
//! frame on a fixed period until the socket goes away.

use super::FrameSink;
use crate::webrtc::PeerRegistry;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// How often the viewer count is pushed
pub const VIEWER_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

pub async fn handle_viewer_connection(socket: WebSocket, registry: Arc<PeerRegistry>) {
    let (ws_sender, mut ws_receiver) = socket.split();

    // Nothing is expected from viewers; draining the read half lets close frames through
    let drain = async {
        while let Some(Ok(_)) = ws_receiver.next().await {}
    };

    tokio::select! {
        _ = stream_peer_count(Box::pin(ws_sender), registry, VIEWER_UPDATE_INTERVAL) => {}
        _ = drain => {}
    }
    debug!("Viewer connection closed");
}

/// Write the registry's peer count to `sink` every `period` until a write fails
pub async fn stream_peer_count(mut sink: FrameSink, registry: Arc<PeerRegistry>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let count = registry.peer_count().await;
        if sink.send(Message::Text(count.to_string().into())).await.is_err() {
            break;
        }
    }
}
