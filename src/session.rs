//! Session store
//!
//! Maps room ids, and the stream ids derived from them, to the session that
//! owns their peer registry and chat hub. Sessions are created lazily on the
//! first room lookup and are never evicted.

use crate::chat::{ChatHub, ChatSettings};
use crate::webrtc::PeerRegistry;
use log::info;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// One room: its peers and its chat
pub struct Session {
    id: String,
    stream_id: String,
    peers: Arc<PeerRegistry>,
    chat: ChatHub,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read-only alias under which the room is also reachable
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    pub fn chat(&self) -> &ChatHub {
        &self.chat
    }
}

/// Lowercase hex SHA-256 of a room id
pub fn stream_id_for(room_id: &str) -> String {
    hex::encode(Sha256::digest(room_id.as_bytes()))
}

/// Lookup of sessions by external identifier
pub trait SessionStore: Send + Sync {
    /// Get the room's session, creating it if needed
    fn lookup(&self, room_id: &str) -> Arc<Session>;

    /// Get an existing room session
    fn find(&self, room_id: &str) -> Option<Arc<Session>>;

    /// Get an existing session by its stream id
    fn find_stream(&self, stream_id: &str) -> Option<Arc<Session>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Maps {
    rooms: HashMap<String, Arc<Session>>,
    streams: HashMap<String, Arc<Session>>,
}

/// In-process session store
pub struct MemorySessionStore {
    maps: RwLock<Maps>,
    chat_settings: ChatSettings,
}

impl MemorySessionStore {
    pub fn new(chat_settings: ChatSettings) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            chat_settings,
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn lookup(&self, room_id: &str) -> Arc<Session> {
        if let Some(session) = self.maps.read().rooms.get(room_id) {
            return session.clone();
        }

        let mut maps = self.maps.write();
        // Another caller may have won the race between the two locks
        if let Some(session) = maps.rooms.get(room_id) {
            return session.clone();
        }

        let session = Arc::new(Session {
            id: room_id.to_string(),
            stream_id: stream_id_for(room_id),
            peers: PeerRegistry::new(),
            chat: ChatHub::spawn(self.chat_settings.clone()),
        });
        maps.rooms.insert(room_id.to_string(), session.clone());
        maps.streams.insert(session.stream_id.clone(), session.clone());
        info!("Created room {} (stream {})", room_id, session.stream_id);
        session
    }

    fn find(&self, room_id: &str) -> Option<Arc<Session>> {
        self.maps.read().rooms.get(room_id).cloned()
    }

    fn find_stream(&self, stream_id: &str) -> Option<Arc<Session>> {
        self.maps.read().streams.get(stream_id).cloned()
    }

    fn len(&self) -> usize {
        self.maps.read().rooms.len()
    }
}
