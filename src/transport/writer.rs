//! Serialized writer over one signaling websocket.
//!
//! ICE candidate callbacks and renegotiation both write to the same socket
//! from different tasks; each frame goes out whole under the writer's lock.

use super::FrameSink;
use crate::webrtc::{SignalingMessage, WebRTCError};
use axum::extract::ws::Message;
use futures::SinkExt;
use tokio::sync::Mutex;

pub struct SharedWriter {
    sink: Mutex<FrameSink>,
}

impl SharedWriter {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Encode and send one signaling envelope as a text frame
    pub async fn send_signal(&self, message: &SignalingMessage) -> Result<(), WebRTCError> {
        let json = message.to_json()?;
        self.send_text(json).await
    }

    pub async fn send_text(&self, text: String) -> Result<(), WebRTCError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| WebRTCError::TransportError(format!("Signaling write failed: {}", e)))
    }

    /// Close the underlying websocket
    pub async fn close(&self) -> Result<(), WebRTCError> {
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| WebRTCError::TransportError(format!("Signaling close failed: {}", e)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::sync::Arc;

    /// Writer backed by an in-memory channel, for tests across the crate
    pub(crate) fn channel_writer() -> (Arc<SharedWriter>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded::<Message>();
        let sink: FrameSink = Box::pin(tx.sink_map_err(|e| axum::Error::new(e)));
        (Arc::new(SharedWriter::new(sink)), rx)
    }

    /// Drain every frame currently queued on a test writer's channel
    pub(crate) fn drain_signals(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<SignalingMessage> {
        let mut out = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            if let Message::Text(text) = frame {
                out.push(SignalingMessage::from_json(text.as_str()).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn concurrent_writes_arrive_whole() {
        let (writer, mut rx) = channel_writer();
        let mut handles = Vec::new();
        for i in 0..16 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let msg = SignalingMessage {
                    event: "candidate".to_string(),
                    data: format!("payload-{}", i),
                };
                writer.send_signal(&msg).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received: Vec<String> = drain_signals(&mut rx).into_iter().map(|m| m.data).collect();
        received.sort();
        assert_eq!(received.len(), 16);
        assert!(received.iter().all(|d| d.starts_with("payload-")));
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (writer, rx) = channel_writer();
        drop(rx);
        let err = writer.send_text("hello".to_string()).await.unwrap_err();
        assert!(matches!(err, WebRTCError::TransportError(_)));
    }
}
