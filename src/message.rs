//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::UserId;

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Greeting / first contact
    Start,
    /// Look for a stranger to chat with
    Search,
    /// End the current chat or cancel the search
    End,
    /// Show the command list
    Help,
    /// Send text to the current partner
    Chat { content: String },
    /// Operator command (`start`, `stop`, `monitor`)
    Admin { token: String, command: String },
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, user handle issued
    Connected { user_id: UserId },
    /// Reply to `start`
    Welcome,
    /// Command list
    Help { text: String },
    /// Queued as a new waiting session
    Searching,
    /// Already queued; nothing changed
    AlreadyWaiting,
    /// Paired with a stranger
    PartnerFound,
    /// Already chatting; nothing changed
    AlreadyInChat,
    /// You ended the chat (or cancelled the search)
    ChatEnded,
    /// Your partner ended the chat
    PartnerEnded,
    /// There is no chat to end or send to
    NotInChat,
    /// Text relayed from the partner
    Chat { content: String },
    /// Searching is paused by the operator
    Maintenance,
    /// System switch changed
    SystemStatus { on: bool },
    /// Admin monitor report
    Status {
        on: bool,
        uptime: String,
        total_users: usize,
        total_sessions: usize,
        active_sessions: usize,
        waiting_sessions: usize,
    },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Follow-up actions a client may offer after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Search,
    Help,
    CancelSearch,
    EndChat,
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The match attempt failed; safe to retry
    MatchFailed,
    /// Ending the chat failed; safe to retry
    EndFailed,
    /// Unknown admin command
    UnknownCommand,
    /// Invalid message format
    InvalidMessage,
    /// Anything else scoped to this request
    Internal,
}

impl ServerMessage {
    /// Actions worth offering alongside this message
    pub fn suggested_actions(&self) -> &'static [Action] {
        match self {
            ServerMessage::Welcome | ServerMessage::Help { .. } => &[Action::Search, Action::Help],
            ServerMessage::Searching | ServerMessage::AlreadyWaiting => &[Action::CancelSearch],
            ServerMessage::PartnerFound | ServerMessage::AlreadyInChat => &[Action::EndChat],
            ServerMessage::ChatEnded | ServerMessage::PartnerEnded | ServerMessage::NotInChat => {
                &[Action::Search]
            }
            _ => &[],
        }
    }

    /// Serialize to the wire frame, with suggested actions attached
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let actions = self.suggested_actions();
        if !actions.is_empty() {
            if let Value::Object(map) = &mut value {
                map.insert("actions".to_string(), serde_json::to_value(actions)?);
            }
        }
        serde_json::to_string(&value)
    }

    /// Build the generic error message for a failed core operation
    ///
    /// Storage details stay in the server log.
    pub fn failure(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::MatchFailed => "Could not find a partner right now, please try again",
            ErrorCode::EndFailed => "Could not end the chat right now, please try again",
            _ => "Internal error",
        };
        ServerMessage::Error {
            code,
            message: message.to_string(),
        }
    }
}

/// Convert a JSON parse error to ServerMessage for client notification
impl From<serde_json::Error> for ServerMessage {
    fn from(err: serde_json::Error) -> Self {
        ServerMessage::Error {
            code: ErrorCode::InvalidMessage,
            message: format!("Invalid message format: {}", err),
        }
    }
}
