//! Session state machine
//!
//! Ends live sessions on request (or when a connection goes away) and answers
//! "who am I talking to" for message relay. Ending is the only mutation made
//! here; sessions are kept for history and same-partner avoidance.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{ChatError, StoreError};
use crate::message::ServerMessage;
use crate::notifier::Notifier;
use crate::session::{ChatSession, SessionStatus};
use crate::store::{retry_on_conflict, SessionStore, StoreTransaction};
use crate::types::UserId;

/// Result of ending a session
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// The session moved to `ended`; `partner` is the other party, if any
    Ended {
        session: ChatSession,
        partner: Option<UserId>,
    },
    /// The user had no live session; nothing changed
    NotInSession,
}

/// A user's current live session as seen by relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Idle,
    Waiting,
    Chatting { partner: UserId },
}

pub struct SessionMachine<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
}

impl<S: SessionStore> SessionMachine<S> {
    pub fn new(store: Arc<S>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// End the user's live session, telling both sides
    ///
    /// Calling it again once the session has ended reports `NotInSession`.
    pub async fn end_session(&self, user: UserId) -> Result<EndOutcome, ChatError> {
        let outcome = self.finish(user).await?;

        match &outcome {
            EndOutcome::Ended { partner, .. } => {
                self.send(user, ServerMessage::ChatEnded).await;
                if let Some(partner) = partner {
                    self.send(*partner, ServerMessage::PartnerEnded).await;
                }
            }
            EndOutcome::NotInSession => {
                self.send(user, ServerMessage::NotInChat).await;
            }
        }

        Ok(outcome)
    }

    /// End the session of a user who is no longer connected
    ///
    /// Only the other party is told.
    pub async fn abandon(&self, user: UserId) -> Result<EndOutcome, ChatError> {
        let outcome = self.finish(user).await?;
        if let EndOutcome::Ended {
            partner: Some(partner),
            ..
        } = &outcome
        {
            self.send(*partner, ServerMessage::PartnerEnded).await;
        }
        Ok(outcome)
    }

    /// Where the user currently stands
    pub async fn presence(&self, user: UserId) -> Result<Presence, ChatError> {
        let mut tx = self.store.begin().await?;
        let session = tx.find_live_session_for_user(user).await?;
        tx.rollback().await;

        let presence = match session {
            None => Presence::Idle,
            Some(session) => match (session.status, session.other_party(user)) {
                (SessionStatus::Active, Some(partner)) => Presence::Chatting { partner },
                _ => Presence::Waiting,
            },
        };
        Ok(presence)
    }

    async fn finish(&self, user: UserId) -> Result<EndOutcome, ChatError> {
        let outcome = retry_on_conflict("end", move || self.try_end(user))
            .await
            .map_err(|e| {
                error!("Ending session for user {} failed: {}", user, e);
                ChatError::from(e)
            })?;

        if let EndOutcome::Ended { session, .. } = &outcome {
            info!("User {} ended session {}", user, session.id);
        }
        Ok(outcome)
    }

    async fn try_end(&self, user: UserId) -> Result<EndOutcome, StoreError> {
        let mut tx = self.store.begin().await?;

        let Some(live) = tx.find_live_session_for_user(user).await? else {
            tx.rollback().await;
            return Ok(EndOutcome::NotInSession);
        };

        let session = tx.transition_to_ended(live.id).await?;
        tx.commit().await?;

        Ok(EndOutcome::Ended {
            partner: session.other_party(user),
            session,
        })
    }

    async fn send(&self, user: UserId, message: ServerMessage) {
        if let Err(e) = self.notifier.notify(user, message).await {
            warn!("Failed to notify user {}: {}", user, e);
        }
    }
}
