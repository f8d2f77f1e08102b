//! Hub actor implementation
//!
//! The central actor that owns the registry of connected users and delivers
//! outbound messages to them. Uses the Actor pattern with mpsc channels for
//! message passing; session state lives in the store, never here.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::message::ServerMessage;
use crate::types::UserId;

/// Commands sent to the Hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// User connected
    Register {
        user_id: UserId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// User disconnected
    Unregister { user_id: UserId },
    /// Deliver a message to a user
    Deliver {
        user_id: UserId,
        message: ServerMessage,
    },
}

/// The Hub actor
///
/// Processes commands one at a time; the registry is never shared.
pub struct Hub {
    /// All connected clients: UserId -> Client
    clients: HashMap<UserId, Client>,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a new Hub with the given command receiver
    pub fn new(receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            clients: HashMap::new(),
            receiver,
        }
    }

    /// Run the Hub event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Hub shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { user_id, sender } => {
                self.clients.insert(user_id, Client::new(sender));
                debug!("User {} registered, {} connected", user_id, self.clients.len());
            }
            HubCommand::Unregister { user_id } => {
                if let Some(client) = self.clients.remove(&user_id) {
                    debug!(
                        "User {} unregistered after {:?}, {} connected",
                        user_id,
                        client.connected_at.elapsed(),
                        self.clients.len()
                    );
                }
            }
            HubCommand::Deliver { user_id, message } => {
                self.handle_deliver(user_id, message).await;
            }
        }
    }

    /// Handle message delivery
    async fn handle_deliver(&mut self, user_id: UserId, message: ServerMessage) {
        let Some(client) = self.clients.get(&user_id) else {
            debug!("Dropping message for offline user {}", user_id);
            return;
        };

        if client.send(message).await.is_err() {
            warn!("Delivery to user {} failed, connection closed", user_id);
        }
    }
}

/// Cloneable handle for talking to the Hub actor
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub fn new(sender: mpsc::Sender<HubCommand>) -> Self {
        Self { sender }
    }

    /// Spawn a Hub actor and return a handle to it
    pub fn spawn(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        tokio::spawn(Hub::new(receiver).run());
        Self::new(sender)
    }

    /// Forward a command to the actor; false if the actor is gone
    pub async fn send(&self, cmd: HubCommand) -> bool {
        self.sender.send(cmd).await.is_ok()
    }
}
