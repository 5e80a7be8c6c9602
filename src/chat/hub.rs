//! Chat hub actor
//!
//! One task owns the client set and processes register, unregister and
//! broadcast commands in arrival order. Nothing else touches the set.
//!
//! Delivery never blocks the hub: a client whose mailbox is full when a
//! broadcast arrives is evicted and its mailbox closed.

use super::ChatSettings;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

pub type ClientId = u64;

enum HubCommand {
    Register {
        id: ClientId,
        mailbox: mpsc::Sender<String>,
    },
    Unregister {
        id: ClientId,
    },
    Broadcast {
        message: String,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to a session's chat hub task
#[derive(Clone)]
pub struct ChatHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
    settings: ChatSettings,
}

impl ChatHub {
    /// Start the hub task. It runs until every handle is dropped.
    pub fn spawn(settings: ChatSettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(rx));
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Register a new client, returning its membership and mailbox
    pub fn join(&self) -> (Membership, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (mailbox, rx) = mpsc::channel(self.settings.mailbox_capacity);
        self.send(HubCommand::Register { id, mailbox });
        let membership = Membership {
            id,
            hub: self.clone(),
        };
        (membership, rx)
    }

    /// Deliver `message` to every registered client
    pub fn broadcast(&self, message: String) {
        self.send(HubCommand::Broadcast { message });
    }

    /// Number of registered clients once every earlier command is processed
    pub async fn client_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply });
        rx.await.unwrap_or(0)
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            debug!("Chat hub stopped, command dropped");
        }
    }
}

/// A registered client. Dropping it unregisters the client.
pub struct Membership {
    id: ClientId,
    hub: ChatHub,
}

impl Membership {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn broadcast(&self, message: String) {
        self.hub.broadcast(message);
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.hub.send(HubCommand::Unregister { id: self.id });
    }
}

async fn run_hub(mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    let mut clients: HashMap<ClientId, mpsc::Sender<String>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, mailbox } => {
                clients.insert(id, mailbox);
                info!("Chat client {} joined ({} in hub)", id, clients.len());
            }
            HubCommand::Unregister { id } => {
                // Dropping the sender closes the mailbox
                if clients.remove(&id).is_some() {
                    info!("Chat client {} left ({} in hub)", id, clients.len());
                }
            }
            HubCommand::Broadcast { message } => {
                clients.retain(|id, mailbox| match mailbox.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!("Chat client {} mailbox full, evicting", id);
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(clients.len());
            }
        }
    }
    debug!("Chat hub stopped");
}
