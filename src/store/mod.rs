//! Session store contract
//!
//! The store owns every user and chat session. All core decisions happen
//! inside a transaction obtained from [`SessionStore::begin`]: reads see the
//! committed state plus the transaction's own staged writes, and
//! [`StoreTransaction::commit`] applies the staged writes atomically or not at
//! all. Dropping a transaction without committing discards it.
//!
//! Commit is first-committer-wins: when two transactions both move the same
//! waiting session, the second commit fails with [`StoreError::Conflict`].

mod memory;

use std::future::Future;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::session::ChatSession;
use crate::types::{SessionId, UserId};

pub use memory::{MemoryStore, MemoryTransaction};

/// Transactions lost to a concurrent committer are retried this many times
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Aggregate counts for the admin monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_users: usize,
    pub total_sessions: usize,
    pub waiting: usize,
    pub active: usize,
    pub ended: usize,
}

/// Durable table of users and chat sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    type Tx: StoreTransaction;

    /// Open a transaction scope
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Record a user on first interaction (no-op if already known)
    async fn register_user(&self, user: UserId) -> Result<(), StoreError>;

    /// Read-only aggregate counts
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Reads and writes applied atomically on commit
#[async_trait]
pub trait StoreTransaction: Send {
    /// The unique `waiting` or `active` session the user is party to
    async fn find_live_session_for_user(
        &mut self,
        user: UserId,
    ) -> Result<Option<ChatSession>, StoreError>;

    /// All waiting sessions not opened by `user`, oldest first
    async fn list_waiting_sessions_excluding(
        &mut self,
        user: UserId,
    ) -> Result<Vec<ChatSession>, StoreError>;

    /// Whether the two users were ever paired in one session
    async fn has_prior_session_between(
        &mut self,
        a: UserId,
        b: UserId,
    ) -> Result<bool, StoreError>;

    async fn create_waiting_session(&mut self, user: UserId) -> Result<ChatSession, StoreError>;

    /// Pair `partner` into a waiting session
    ///
    /// Fails with [`StoreError::Conflict`] if the session is no longer waiting.
    async fn transition_to_active(
        &mut self,
        session_id: SessionId,
        partner: UserId,
    ) -> Result<ChatSession, StoreError>;

    /// End a live session
    ///
    /// Fails with [`StoreError::Conflict`] if the session already ended.
    async fn transition_to_ended(&mut self, session_id: SessionId)
        -> Result<ChatSession, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self);
}

/// Run a transactional operation, retrying when it loses a commit race
///
/// Each attempt must open its own transaction so that it re-reads the state
/// the winning transaction left behind.
pub async fn retry_on_conflict<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(StoreError::Conflict) if tries < MAX_COMMIT_ATTEMPTS => {
                debug!("{} lost a commit race, retrying ({}/{})", operation, tries, MAX_COMMIT_ATTEMPTS);
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), StoreError> = retry_on_conflict("test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict)
        })
        .await;

        assert_eq!(result, Err(StoreError::Conflict));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_COMMIT_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_recovers() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = retry_on_conflict("test", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Conflict)
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_other_errors() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), StoreError> = retry_on_conflict("test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
