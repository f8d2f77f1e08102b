//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the Dispatcher.
//! Commands from one connection are processed strictly in order.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Command, Dispatcher};
use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::store::SessionStore;

/// Per-connection outbound buffer
const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle.
pub async fn handle_connection<S>(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher<S>>,
) -> Result<(), AppError>
where
    S: SessionStore + 'static,
{
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Create channel for server -> client messages and register
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER_SIZE);
    let reply_tx = msg_tx.clone();
    let user_id = dispatcher.connect(msg_tx).await?;
    info!("User {} connected from {}", user_id, peer_addr);

    // Send connection success message
    let connected_msg = ServerMessage::Connected { user_id };
    ws_sender.send(Message::Text(connected_msg.to_frame()?)).await?;

    // Spawn read task (WebSocket -> Dispatcher)
    let read_dispatcher = dispatcher.clone();
    let read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        let cmd = client_message_to_command(client_msg);
                        let outcome = read_dispatcher.dispatch(user_id, cmd).await;
                        debug!("User {} command outcome: {:?}", user_id, outcome);
                    }
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", user_id, e);
                        if reply_tx.send(ServerMessage::from(e)).await.is_err() {
                            break;
                        }
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("User {} sent close frame", user_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", user_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", user_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", user_id);
    });

    // Spawn write task (ServerMessage -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match msg.to_frame() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for client");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = read_task => {
            debug!("Read task completed for {}", user_id);
        }
        _ = write_task => {
            debug!("Write task completed for {}", user_id);
        }
    }

    dispatcher.disconnect(user_id).await;

    Ok(())
}

/// Convert a ClientMessage to a dispatcher Command
fn client_message_to_command(msg: ClientMessage) -> Command {
    match msg {
        ClientMessage::Start => Command::Start,
        ClientMessage::Search => Command::Search,
        ClientMessage::End => Command::End,
        ClientMessage::Help => Command::Help,
        ClientMessage::Chat { content } => Command::Chat { content },
        ClientMessage::Admin { token, command } => Command::Admin { token, command },
    }
}
