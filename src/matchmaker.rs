//! Matchmaker
//!
//! Pairs a searching user with a random waiting stranger, or queues them as
//! a new waiting session when nobody usable is waiting.
//!
//! Every decision is made inside one store transaction. Candidates are
//! drawn uniformly at random, with replacement, at most
//! [`MAX_CANDIDATE_PICKS`] times; a candidate the user was paired with before
//! is skipped. Running out of picks queues the user rather than searching
//! exhaustively. A request that keeps losing commit races is queued as well.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, StoreError};
use crate::message::ServerMessage;
use crate::notifier::Notifier;
use crate::session::{ChatSession, SessionStatus};
use crate::store::{retry_on_conflict, SessionStore, StoreTransaction};
use crate::types::UserId;

/// Upper bound on random candidate picks per match attempt
pub const MAX_CANDIDATE_PICKS: usize = 3;

/// Result of a match request
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Paired into an active session with `partner`
    Matched {
        session: ChatSession,
        partner: UserId,
    },
    /// Queued as a new waiting session
    Waiting { session: ChatSession },
    /// Was already waiting; nothing changed
    AlreadyWaiting { session: ChatSession },
    /// Was already chatting; nothing changed
    AlreadyActive {
        session: ChatSession,
        partner: Option<UserId>,
    },
}

pub struct Matchmaker<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    rng: Mutex<StdRng>,
}

impl<S: SessionStore> Matchmaker<S> {
    /// Create a matchmaker drawing candidates from an entropy-seeded RNG
    pub fn new(store: Arc<S>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_rng(store, notifier, StdRng::from_entropy())
    }

    /// Create a matchmaker with a deterministic candidate sequence
    pub fn with_seed(store: Arc<S>, notifier: Arc<dyn Notifier>, seed: u64) -> Self {
        Self::with_rng(store, notifier, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: Arc<S>, notifier: Arc<dyn Notifier>, rng: StdRng) -> Self {
        Self {
            store,
            notifier,
            rng: Mutex::new(rng),
        }
    }

    /// Find a partner for `user` or queue them
    ///
    /// Idempotent for a user who is already waiting or chatting. On a storage
    /// failure nothing is persisted and nobody is notified.
    pub async fn request_match(&self, user: UserId) -> Result<MatchOutcome, ChatError> {
        let outcome = match retry_on_conflict("match", move || self.try_match(user)).await {
            Err(StoreError::Conflict) => {
                warn!("User {} kept losing match races, queueing instead", user);
                self.queue(user).await
            }
            other => other,
        }
        .map_err(|e| {
            error!("Match attempt for user {} failed: {}", user, e);
            ChatError::from(e)
        })?;

        match &outcome {
            MatchOutcome::Matched { session, partner } => {
                info!("User {} matched with user {} in session {}", user, partner, session.id);
                self.send(user, ServerMessage::PartnerFound).await;
                self.send(*partner, ServerMessage::PartnerFound).await;
            }
            MatchOutcome::Waiting { session } => {
                info!("User {} is waiting in session {}", user, session.id);
                self.send(user, ServerMessage::Searching).await;
            }
            MatchOutcome::AlreadyWaiting { .. } => {
                self.send(user, ServerMessage::AlreadyWaiting).await;
            }
            MatchOutcome::AlreadyActive { .. } => {
                self.send(user, ServerMessage::AlreadyInChat).await;
            }
        }

        Ok(outcome)
    }

    /// One transactional match attempt
    async fn try_match(&self, user: UserId) -> Result<MatchOutcome, StoreError> {
        let mut tx = self.store.begin().await?;

        if let Some(session) = tx.find_live_session_for_user(user).await? {
            tx.rollback().await;
            return Ok(already_live(session, user));
        }

        let candidates = tx.list_waiting_sessions_excluding(user).await?;
        if let Some(candidate) = self.pick_candidate(&mut tx, user, &candidates).await? {
            match tx.transition_to_active(candidate.id, user).await {
                Ok(session) => {
                    let partner = session.other_party(user).unwrap_or(candidate.initiator);
                    tx.commit().await?;
                    return Ok(MatchOutcome::Matched { session, partner });
                }
                Err(StoreError::Conflict) => {
                    debug!(
                        "Session {} was taken before user {} could join, queueing instead",
                        candidate.id, user
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let session = tx.create_waiting_session(user).await?;
        tx.commit().await?;
        Ok(MatchOutcome::Waiting { session })
    }

    /// Open a waiting session without looking at candidates
    ///
    /// Only the user can book an idle user, so this commit does not race
    /// other searchers.
    async fn queue(&self, user: UserId) -> Result<MatchOutcome, StoreError> {
        let mut tx = self.store.begin().await?;

        if let Some(session) = tx.find_live_session_for_user(user).await? {
            tx.rollback().await;
            return Ok(already_live(session, user));
        }

        let session = tx.create_waiting_session(user).await?;
        tx.commit().await?;
        Ok(MatchOutcome::Waiting { session })
    }

    /// Draw random candidates until one passes same-partner avoidance
    async fn pick_candidate(
        &self,
        tx: &mut S::Tx,
        user: UserId,
        candidates: &[ChatSession],
    ) -> Result<Option<ChatSession>, StoreError> {
        let picks = candidates.len().min(MAX_CANDIDATE_PICKS);

        for _ in 0..picks {
            let candidate = &candidates[self.random_index(candidates.len())];
            if tx.has_prior_session_between(user, candidate.initiator).await? {
                debug!("User {}: same partner as before ({}), skipping", user, candidate.initiator);
                continue;
            }
            return Ok(Some(candidate.clone()));
        }

        Ok(None)
    }

    fn random_index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(0..len)
    }

    async fn send(&self, user: UserId, message: ServerMessage) {
        if let Err(e) = self.notifier.notify(user, message).await {
            warn!("Failed to notify user {}: {}", user, e);
        }
    }
}

fn already_live(session: ChatSession, user: UserId) -> MatchOutcome {
    match session.status {
        SessionStatus::Active => MatchOutcome::AlreadyActive {
            partner: session.other_party(user),
            session,
        },
        _ => MatchOutcome::AlreadyWaiting { session },
    }
}
