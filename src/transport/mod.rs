//! Transport layer for the relay
//!
//! Handles the websocket side of every connection: the serialized signaling
//! writer, the per-peer signaling loop and the viewer-count feed.

pub mod writer;
pub mod signaling_server;
pub mod viewer;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Write half of an established websocket
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Read half of an established websocket
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, axum::Error>> + Send>>;

pub use writer::SharedWriter;
pub use signaling_server::{handle_signaling_connection, PeerRole};
pub use viewer::stream_peer_count;
