//! Error types for the chat server
//!
//! Storage and state machine errors for the matchmaking core, notification
//! errors, transport errors and configuration errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::session::SessionStatus;
use crate::types::{SessionId, UserId};

/// Illegal move in the session state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The session is not in a state that allows this move
    #[error("cannot move session from {from} to {to}")]
    Invalid {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A session would pair a user with themselves
    #[error("user {0} cannot be paired with themselves")]
    SelfMatch(UserId),
}

/// Session store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store cannot complete the transaction; nothing was applied
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent transaction changed a row this one depends on
    #[error("conflicting concurrent transition")]
    Conflict,

    /// The referenced session does not exist
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The requested move violates the session state machine
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Matchmaking / session lifecycle errors
///
/// Negative outcomes such as "not in a session" are results, not errors;
/// only storage failures end up here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Notification delivery errors
///
/// Never affect session state; callers log and move on.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The hub actor is gone
    #[error("hub closed")]
    HubClosed,
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Transport-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Core operation failed while setting up the connection
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}
