//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `UserId`: opaque numeric handle for an anonymous user
//! - `SessionId`: UUID-based unique chat session identifier

use serde::Serialize;
use uuid::Uuid;

/// Opaque user handle (newtype pattern)
///
/// Carries no profile data; two users are only ever compared by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique chat session identifier
///
/// Wraps a UUID v4, assigned once when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
