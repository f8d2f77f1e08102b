//! Chat session record and its state machine
//!
//! A session starts `waiting` with only an initiator, becomes `active` once a
//! second user is paired in, and ends exactly once. `ended` is terminal.

use std::fmt;
use std::time::Instant;

use crate::error::TransitionError;
use crate::types::{SessionId, UserId};

/// Lifecycle status of a chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
}

impl SessionStatus {
    /// Whether the session still holds its parties (`waiting` or `active`)
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Waiting | SessionStatus::Active)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_become(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Waiting, SessionStatus::Active)
                | (SessionStatus::Waiting, SessionStatus::Ended)
                | (SessionStatus::Active, SessionStatus::Ended)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// One matchmaking attempt and, once paired, the conversation it became
///
/// The initiator is the user who opened the session by searching with no
/// usable partner waiting. The partner is set when a match is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub id: SessionId,
    pub initiator: UserId,
    pub partner: Option<UserId>,
    pub status: SessionStatus,
    pub created_at: Instant,
}

impl ChatSession {
    /// Open a new waiting session for the given initiator
    pub fn waiting(initiator: UserId) -> Self {
        Self {
            id: SessionId::new(),
            initiator,
            partner: None,
            status: SessionStatus::Waiting,
            created_at: Instant::now(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Check if a user is a party to this session
    pub fn involves(&self, user: UserId) -> bool {
        self.initiator == user || self.partner == Some(user)
    }

    /// Get the other party for a given user
    ///
    /// Returns None if the user is not in the session or has no partner yet.
    pub fn other_party(&self, user: UserId) -> Option<UserId> {
        if self.initiator == user {
            self.partner
        } else if self.partner == Some(user) {
            Some(self.initiator)
        } else {
            None
        }
    }

    /// Check if this session ever paired exactly these two users
    pub fn pairs(&self, a: UserId, b: UserId) -> bool {
        match self.partner {
            Some(partner) => {
                (self.initiator == a && partner == b) || (self.initiator == b && partner == a)
            }
            None => false,
        }
    }

    /// Pair a second user into a waiting session
    pub fn activate(&mut self, partner: UserId) -> Result<(), TransitionError> {
        self.check_transition(SessionStatus::Active)?;
        if partner == self.initiator {
            return Err(TransitionError::SelfMatch(partner));
        }
        self.partner = Some(partner);
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// End a live session
    pub fn end(&mut self) -> Result<(), TransitionError> {
        self.check_transition(SessionStatus::Ended)?;
        self.status = SessionStatus::Ended;
        Ok(())
    }

    fn check_transition(&self, next: SessionStatus) -> Result<(), TransitionError> {
        if self.status.can_become(next) {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.status,
                to: next,
            })
        }
    }
}
