//! Client struct definition
//!
//! Represents a connected user and the channel their messages go out on.

use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;

/// Connected client information
#[derive(Debug)]
pub struct Client {
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
    /// When the connection was registered
    pub connected_at: Instant,
}

impl Client {
    /// Create a new client around its outbound channel
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Send a message to this client
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}
