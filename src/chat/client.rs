//! Chat client pumps
//!
//! The read pump turns inbound frames into hub broadcasts and enforces the
//! pong deadline. The write pump drains the mailbox, batching whatever is
//! queued into one frame, and pings while idle.

use super::{ChatError, ChatHub, ChatSettings, Membership};
use crate::transport::{FrameSink, FrameStream};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};

/// Flatten embedded newlines and trim surrounding whitespace
pub fn normalize_message(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}

/// Serve one chat websocket against `hub`
pub async fn serve_chat_client(socket: WebSocket, hub: ChatHub) {
    let (ws_sender, ws_receiver) = socket.split();
    serve_chat(Box::pin(ws_sender), Box::pin(ws_receiver), hub).await;
}

/// Register with the hub, run both pumps and unregister when reading stops
pub async fn serve_chat(sink: FrameSink, mut stream: FrameStream, hub: ChatHub) {
    let settings = hub.settings().clone();
    let (membership, mut mailbox) = hub.join();
    let client_id = membership.id();

    let writer = {
        let settings = settings.clone();
        tokio::spawn(async move {
            let mut sink = sink;
            if let Err(e) = write_pump(&mut sink, &mut mailbox, &settings).await {
                debug!("Chat client {} write side ended: {}", client_id, e);
            }
        })
    };

    if let Err(e) = read_pump(&mut stream, &membership, &settings).await {
        info!("Chat client {} disconnected: {}", client_id, e);
    }

    // Unregistering closes the mailbox, which ends the write pump
    drop(membership);
    let _ = writer.await;
}

/// Read frames until the client leaves, errors or misses the pong deadline
pub async fn read_pump(
    stream: &mut FrameStream,
    membership: &Membership,
    settings: &ChatSettings,
) -> Result<(), ChatError> {
    let mut deadline = Instant::now() + settings.pong_timeout();

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(ChatError::PongTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => {
                return Err(ChatError::Transport(format!("WebSocket error: {}", e)));
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Pong(_) => {
                deadline = Instant::now() + settings.pong_timeout();
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => return Ok(()),
        };

        if text.len() > settings.max_message_size {
            return Err(ChatError::MessageTooLarge {
                size: text.len(),
                limit: settings.max_message_size,
            });
        }
        membership.broadcast(normalize_message(&text));
    }
}

/// Deliver mailbox contents and keepalive pings until the mailbox closes
pub async fn write_pump(
    sink: &mut FrameSink,
    mailbox: &mut mpsc::Receiver<String>,
    settings: &ChatSettings,
) -> Result<(), ChatError> {
    let mut ticker = tokio::time::interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);

    loop {
        tokio::select! {
            message = mailbox.recv() => {
                let Some(mut batch) = message else {
                    // Evicted or unregistered
                    let _ = write_frame(sink, Message::Close(None), settings.write_timeout).await;
                    return Ok(());
                };
                while let Ok(next) = mailbox.try_recv() {
                    batch.push('\n');
                    batch.push_str(&next);
                }
                write_frame(sink, Message::Text(batch.into()), settings.write_timeout).await?;
                ticker.reset();
            }
            _ = ticker.tick() => {
                write_frame(sink, Message::Ping(Default::default()), settings.write_timeout).await?;
            }
        }
    }
}

async fn write_frame(sink: &mut FrameSink, frame: Message, limit: Duration) -> Result<(), ChatError> {
    match timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ChatError::Transport(format!("Chat write failed: {}", e))),
        Err(_) => Err(ChatError::Transport("Chat write timed out".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as channel;
    use futures::stream;

    fn channel_sink() -> (FrameSink, channel::UnboundedReceiver<Message>) {
        let (tx, rx) = channel::unbounded::<Message>();
        (Box::pin(tx.sink_map_err(|e| axum::Error::new(e))), rx)
    }

    fn collect_frames(rx: &mut channel::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(normalize_message("  hello\nworld \n"), "hello world");
        assert_eq!(normalize_message("a\n\nb"), "a  b");
        assert_eq!(normalize_message("\n"), "");
    }

    #[tokio::test]
    async fn test_queued_messages_batched_into_one_frame() {
        let (mut sink, mut rx) = channel_sink();
        let (tx, mut mailbox) = mpsc::channel(256);
        for text in ["a", "b", "c"] {
            tx.send(text.to_string()).await.unwrap();
        }
        drop(tx);

        write_pump(&mut sink, &mut mailbox, &ChatSettings::default()).await.unwrap();

        let frames = collect_frames(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Message::Text(text) if text.as_str() == "a\nb\nc"));
        assert!(matches!(frames[1], Message::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_writer_pings() {
        let (mut sink, mut rx) = channel_sink();
        let (tx, mut mailbox) = mpsc::channel::<String>(256);
        let settings = ChatSettings::default();

        let pump = tokio::spawn(async move { write_pump(&mut sink, &mut mailbox, &settings).await });
        tokio::time::sleep(Duration::from_secs(25)).await;
        drop(tx);
        pump.await.unwrap().unwrap();

        let frames = collect_frames(&mut rx);
        let pings = frames.iter().filter(|f| matches!(f, Message::Ping(_))).count();
        assert_eq!(pings, 2);
        assert!(matches!(frames.last(), Some(Message::Close(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_times_out() {
        let hub = ChatHub::spawn(ChatSettings::default());
        let (membership, _mailbox) = hub.join();
        let (_tx, rx) = channel::unbounded::<Result<Message, axum::Error>>();
        let mut stream: FrameStream = Box::pin(rx);

        let started = Instant::now();
        let result = read_pump(&mut stream, &membership, hub.settings()).await;
        assert!(matches!(result, Err(ChatError::PongTimeout)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_deadline() {
        let hub = ChatHub::spawn(ChatSettings::default());
        let (membership, _mailbox) = hub.join();
        let (tx, rx) = channel::unbounded::<Result<Message, axum::Error>>();
        let mut stream: FrameStream = Box::pin(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(50)).await;
            let _ = tx.unbounded_send(Ok(Message::Pong(Default::default())));
            // Keep the stream open past the new deadline
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(tx);
        });

        let started = Instant::now();
        assert!(read_pump(&mut stream, &membership, hub.settings()).await.is_err());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(110) && elapsed < Duration::from_secs(111));
    }

    #[tokio::test]
    async fn test_oversized_frame_terminates_reader() {
        let hub = ChatHub::spawn(ChatSettings::default());
        let (membership, mut mailbox) = hub.join();
        let big = "x".repeat(513);
        let mut stream: FrameStream = Box::pin(stream::iter(vec![
            Ok(Message::Text(big.into())),
            Ok(Message::Text("after".to_string().into())),
        ]));

        let result = read_pump(&mut stream, &membership, hub.settings()).await;
        assert!(matches!(
            result,
            Err(ChatError::MessageTooLarge { size: 513, limit: 512 })
        ));
        drop(membership);
        assert_eq!(mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_client_message_reaches_everyone_normalized() {
        let hub = ChatHub::spawn(ChatSettings::default());
        let (_listener, mut listener_mailbox) = hub.join();

        let (sink, mut rx) = channel_sink();
        let stream: FrameStream = Box::pin(stream::iter(vec![Ok(Message::Text(
            "  hello\nworld ".to_string().into(),
        ))]));
        serve_chat(sink, stream, hub.clone()).await;

        assert_eq!(listener_mailbox.recv().await.as_deref(), Some("hello world"));

        let frames = collect_frames(&mut rx);
        assert!(matches!(&frames[0], Message::Text(text) if text.as_str() == "hello world"));
        assert!(matches!(frames.last(), Some(Message::Close(None))));
        assert_eq!(hub.client_count().await, 1);
    }
}
