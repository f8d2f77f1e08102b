//! In-memory session store
//!
//! Committed state lives behind an async mutex that is held only for the
//! duration of one operation. Transactions stage their writes locally and
//! validate them at commit time against row versions, so two transactions
//! racing for the same waiting session cannot both commit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{SessionStore, StoreStats, StoreTransaction};
use crate::error::StoreError;
use crate::session::{ChatSession, SessionStatus};
use crate::types::{SessionId, UserId};

/// A committed session row with its optimistic-concurrency version
#[derive(Debug, Clone)]
struct Row {
    session: ChatSession,
    version: u64,
}

/// Committed tables and their indexes
#[derive(Debug, Default)]
struct Tables {
    users: HashSet<UserId>,
    rows: HashMap<SessionId, Row>,
    /// Session creation order
    order: Vec<SessionId>,
    /// User -> the live session they are party to
    live_by_user: HashMap<UserId, SessionId>,
    /// Waiting sessions, oldest first
    waiting: Vec<SessionId>,
    /// Unordered pairs of users that were ever matched
    pairs: HashSet<(UserId, UserId)>,
}

impl Tables {
    fn apply(&mut self, staged: Staged) {
        let session = staged.session;
        let id = session.id;

        let version = match self.rows.get(&id) {
            Some(old) => {
                let old = old.session.clone();
                self.unindex(&old);
                staged.base_version.unwrap_or_default() + 1
            }
            None => {
                self.order.push(id);
                0
            }
        };

        self.index(&session);
        self.rows.insert(id, Row { session, version });
    }

    fn index(&mut self, session: &ChatSession) {
        self.users.insert(session.initiator);
        if let Some(partner) = session.partner {
            self.users.insert(partner);
            self.pairs.insert(pair_key(session.initiator, partner));
        }

        if session.is_live() {
            self.live_by_user.insert(session.initiator, session.id);
            if let Some(partner) = session.partner {
                self.live_by_user.insert(partner, session.id);
            }
        }

        if session.status == SessionStatus::Waiting {
            self.waiting.push(session.id);
        }
    }

    fn unindex(&mut self, session: &ChatSession) {
        for user in [Some(session.initiator), session.partner].into_iter().flatten() {
            if self.live_by_user.get(&user) == Some(&session.id) {
                self.live_by_user.remove(&user);
            }
        }
        self.waiting.retain(|id| *id != session.id);
    }
}

/// Whether `user` would still sit in a live session other than `session_id`
/// once the staged writes are applied
fn is_booked_elsewhere(
    tables: &Tables,
    staged: &HashMap<SessionId, Staged>,
    user: UserId,
    session_id: SessionId,
) -> bool {
    match tables.live_by_user.get(&user) {
        Some(live) if *live != session_id => match staged.get(live) {
            Some(row) => row.session.is_live() && row.session.involves(user),
            None => true,
        },
        _ => false,
    }
}

fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// In-memory implementation of [`SessionStore`]
///
/// Cheap to clone; clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the backing store going away (or coming back)
    ///
    /// While unavailable every operation, including commit, fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of every committed session, in creation order
    pub async fn sessions(&self) -> Vec<ChatSession> {
        let tables = self.tables.lock().await;
        tables
            .order
            .iter()
            .filter_map(|id| tables.rows.get(id))
            .map(|row| row.session.clone())
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        check_available(&self.available)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_available(flag: &AtomicBool) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StoreError::Unavailable("memory store is offline".to_string()))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.check_available()?;
        Ok(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            available: Arc::clone(&self.available),
            staged: HashMap::new(),
            created: Vec::new(),
        })
    }

    async fn register_user(&self, user: UserId) -> Result<(), StoreError> {
        self.check_available()?;
        self.tables.lock().await.users.insert(user);
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut stats = StoreStats {
            total_users: tables.users.len(),
            total_sessions: tables.rows.len(),
            ..StoreStats::default()
        };
        for row in tables.rows.values() {
            match row.session.status {
                SessionStatus::Waiting => stats.waiting += 1,
                SessionStatus::Active => stats.active += 1,
                SessionStatus::Ended => stats.ended += 1,
            }
        }
        Ok(stats)
    }
}

/// A staged write
///
/// `base_version` is the committed version the row was read at, or `None`
/// for a session created inside this transaction.
#[derive(Debug, Clone)]
struct Staged {
    session: ChatSession,
    base_version: Option<u64>,
}

/// Transaction handle for [`MemoryStore`]
///
/// Holds no lock between operations. Dropping it discards staged writes.
#[derive(Debug)]
pub struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    available: Arc<AtomicBool>,
    staged: HashMap<SessionId, Staged>,
    /// Creation order of sessions staged by this transaction
    created: Vec<SessionId>,
}

impl MemoryTransaction {
    /// Current view of one session: staged write first, then committed row
    fn resolve(&self, tables: &Tables, id: SessionId) -> Option<Staged> {
        if let Some(staged) = self.staged.get(&id) {
            return Some(staged.clone());
        }
        tables.rows.get(&id).map(|row| Staged {
            session: row.session.clone(),
            base_version: Some(row.version),
        })
    }

    async fn stage_transition<F>(&mut self, id: SessionId, apply: F) -> Result<ChatSession, StoreError>
    where
        F: FnOnce(&mut ChatSession) -> Result<(), StoreError> + Send,
    {
        check_available(&self.available)?;
        let current = {
            let tables = self.tables.lock().await;
            self.resolve(&tables, id)
        };
        let Some(mut staged) = current else {
            return Err(StoreError::NotFound(id));
        };

        apply(&mut staged.session)?;
        let session = staged.session.clone();
        self.staged.insert(id, staged);
        Ok(session)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_live_session_for_user(
        &mut self,
        user: UserId,
    ) -> Result<Option<ChatSession>, StoreError> {
        check_available(&self.available)?;

        if let Some(staged) = self
            .staged
            .values()
            .find(|s| s.session.is_live() && s.session.involves(user))
        {
            return Ok(Some(staged.session.clone()));
        }

        let tables = self.tables.lock().await;
        let found = tables
            .live_by_user
            .get(&user)
            // A staged copy of this row was already checked above and is not live
            .filter(|id| !self.staged.contains_key(*id))
            .and_then(|id| tables.rows.get(id))
            .map(|row| row.session.clone());
        Ok(found)
    }

    async fn list_waiting_sessions_excluding(
        &mut self,
        user: UserId,
    ) -> Result<Vec<ChatSession>, StoreError> {
        check_available(&self.available)?;
        let tables = self.tables.lock().await;

        let committed = tables
            .waiting
            .iter()
            .filter(|id| !self.staged.contains_key(*id))
            .filter_map(|id| tables.rows.get(id))
            .map(|row| &row.session);
        let staged = self
            .created
            .iter()
            .filter_map(|id| self.staged.get(id))
            .map(|s| &s.session);

        Ok(committed
            .chain(staged)
            .filter(|s| s.status == SessionStatus::Waiting && s.initiator != user)
            .cloned()
            .collect())
    }

    async fn has_prior_session_between(
        &mut self,
        a: UserId,
        b: UserId,
    ) -> Result<bool, StoreError> {
        check_available(&self.available)?;
        if self.staged.values().any(|s| s.session.pairs(a, b)) {
            return Ok(true);
        }
        let tables = self.tables.lock().await;
        Ok(tables.pairs.contains(&pair_key(a, b)))
    }

    async fn create_waiting_session(&mut self, user: UserId) -> Result<ChatSession, StoreError> {
        check_available(&self.available)?;
        let session = ChatSession::waiting(user);
        self.created.push(session.id);
        self.staged.insert(
            session.id,
            Staged {
                session: session.clone(),
                base_version: None,
            },
        );
        Ok(session)
    }

    async fn transition_to_active(
        &mut self,
        session_id: SessionId,
        partner: UserId,
    ) -> Result<ChatSession, StoreError> {
        self.stage_transition(session_id, |session| {
            if session.status != SessionStatus::Waiting {
                return Err(StoreError::Conflict);
            }
            session.activate(partner)?;
            Ok(())
        })
        .await
    }

    async fn transition_to_ended(
        &mut self,
        session_id: SessionId,
    ) -> Result<ChatSession, StoreError> {
        self.stage_transition(session_id, |session| {
            if !session.is_live() {
                return Err(StoreError::Conflict);
            }
            session.end()?;
            Ok(())
        })
        .await
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTransaction {
            tables: handle,
            available,
            mut staged,
            created,
        } = self;

        check_available(&available)?;
        if staged.is_empty() {
            return Ok(());
        }

        let mut tables = handle.lock().await;

        for (id, row) in &staged {
            let committed_version = tables.rows.get(id).map(|committed| committed.version);
            if row.base_version != committed_version {
                debug!("Commit conflict on session {}", id);
                return Err(StoreError::Conflict);
            }

            if row.session.is_live() {
                let parties = [Some(row.session.initiator), row.session.partner];
                if parties
                    .into_iter()
                    .flatten()
                    .any(|user| is_booked_elsewhere(&tables, &staged, user, *id))
                {
                    debug!("Commit conflict: session {} would double-book a user", id);
                    return Err(StoreError::Conflict);
                }
            }
        }

        // Apply updates first so that a party freed by one row can be
        // booked by a row created in the same transaction.
        let updates: Vec<Staged> = staged
            .values()
            .filter(|row| row.base_version.is_some())
            .cloned()
            .collect();
        for update in updates {
            tables.apply(update);
        }
        for id in created {
            if let Some(row) = staged.remove(&id) {
                tables.apply(row);
            }
        }
        Ok(())
    }

    async fn rollback(self) {
        debug!("Rolling back {} staged writes", self.staged.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_invisible_until_commit() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let session = tx.create_waiting_session(UserId(1)).await.unwrap();

        // Read-your-writes inside the transaction
        let live = tx.find_live_session_for_user(UserId(1)).await.unwrap();
        assert_eq!(live.map(|s| s.id), Some(session.id));
        assert!(store.sessions().await.is_empty());

        tx.commit().await.unwrap();

        let sessions = store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Waiting);
        assert_eq!(sessions[0].initiator, UserId(1));
        assert!(sessions[0].partner.is_none());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryStore::new();

        {
            let mut tx = store.begin().await.unwrap();
            tx.create_waiting_session(UserId(1)).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        tx.create_waiting_session(UserId(2)).await.unwrap();
        tx.rollback().await;

        assert!(store.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_waiting_excludes_own_and_orders_by_creation() {
        let store = MemoryStore::new();
        for user in [1, 2, 3] {
            let mut tx = store.begin().await.unwrap();
            tx.create_waiting_session(UserId(user)).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let waiting = tx.list_waiting_sessions_excluding(UserId(2)).await.unwrap();
        let initiators: Vec<UserId> = waiting.iter().map(|s| s.initiator).collect();
        assert_eq!(initiators, vec![UserId(1), UserId(3)]);
    }

    #[tokio::test]
    async fn test_transition_to_active_and_pair_index() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let session = tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.has_prior_session_between(UserId(1), UserId(2)).await.unwrap());
        let active = tx.transition_to_active(session.id, UserId(2)).await.unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.has_prior_session_between(UserId(2), UserId(1)).await.unwrap());
        let live = tx.find_live_session_for_user(UserId(2)).await.unwrap().unwrap();
        assert_eq!(live.id, session.id);
        assert!(tx
            .list_waiting_sessions_excluding(UserId(3))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_second_activation_conflicts_inside_transaction() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let session = tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut winner = store.begin().await.unwrap();
        let mut loser = store.begin().await.unwrap();

        winner.transition_to_active(session.id, UserId(2)).await.unwrap();
        winner.commit().await.unwrap();

        // Loser reads after the winner committed and sees a non-waiting row
        let err = loser.transition_to_active(session.id, UserId(3)).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict);
    }

    #[tokio::test]
    async fn test_second_activation_conflicts_at_commit() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let session = tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        // Both stage the move before either commits
        first.transition_to_active(session.id, UserId(2)).await.unwrap();
        second.transition_to_active(session.id, UserId(3)).await.unwrap();

        first.commit().await.unwrap();
        assert_eq!(second.commit().await, Err(StoreError::Conflict));

        let sessions = store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].partner, Some(UserId(2)));
    }

    #[tokio::test]
    async fn test_commit_rejects_double_booking() {
        let store = MemoryStore::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.create_waiting_session(UserId(1)).await.unwrap();
        second.create_waiting_session(UserId(1)).await.unwrap();

        first.commit().await.unwrap();
        assert_eq!(second.commit().await, Err(StoreError::Conflict));
        assert_eq!(store.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_end_then_create_in_one_transaction() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.transition_to_ended(first.id).await.unwrap();
        assert!(tx.find_live_session_for_user(UserId(1)).await.unwrap().is_none());
        tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let statuses: Vec<SessionStatus> =
            store.sessions().await.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![SessionStatus::Ended, SessionStatus::Waiting]);
    }

    #[tokio::test]
    async fn test_ending_twice_conflicts() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let session = tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.transition_to_ended(session.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.transition_to_ended(session.id).await.unwrap_err(),
            StoreError::Conflict
        );
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let missing = SessionId::new();

        assert_eq!(
            tx.transition_to_ended(missing).await.unwrap_err(),
            StoreError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_applies_nothing() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.create_waiting_session(UserId(1)).await.unwrap();
        store.set_available(false);

        assert!(matches!(tx.commit().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.begin().await, Err(StoreError::Unavailable(_))));

        store.set_available(true);
        assert!(store.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryStore::new();
        store.register_user(UserId(9)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let session = tx.create_waiting_session(UserId(1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.transition_to_active(session.id, UserId(2)).await.unwrap();
        tx.create_waiting_session(UserId(3)).await.unwrap();
        tx.commit().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total_users: 4,
                total_sessions: 2,
                waiting: 1,
                active: 1,
                ended: 0,
            }
        );
    }
}
