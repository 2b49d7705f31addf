//! Per-conversation state: bounded history, pending confirmations, and the
//! active cart, keyed by an opaque session id.
//!
//! Each session sits behind its own `Mutex`, so duplicate requests for the
//! same id serialize their mutations instead of interleaving. Expired
//! sessions are purged lazily on access; a session whose lock is currently
//! held (an in-flight turn) is never purged.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use chatcart_core::config::SessionConfig;
use chatcart_core::{CartId, ChatTurn, LastIntent, PendingAction, SessionSnapshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session id must not be empty")]
    EmptySessionId,
}

#[derive(Debug)]
struct Session {
    turns: VecDeque<ChatTurn>,
    pending_action: Option<PendingAction>,
    cart_id: Option<CartId>,
    last_intent: Option<LastIntent>,
    last_access: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            turns: VecDeque::new(),
            pending_action: None,
            cart_id: None,
            last_intent: None,
            last_access: Instant::now(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            history: self.turns.iter().cloned().collect(),
            pending_action: self.pending_action,
            cart_id: self.cart_id,
            last_intent: self.last_intent,
        }
    }
}

pub struct SessionStore {
    ttl: Duration,
    max_turns: usize,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_limits(Duration::from_secs(config.ttl_secs), config.max_turns)
    }

    pub fn with_limits(ttl: Duration, max_turns: usize) -> Self {
        Self { ttl, max_turns, sessions: RwLock::new(HashMap::new()) }
    }

    /// Returns a point-in-time copy of the session, creating it when the id
    /// is unknown or expired. Purges expired sessions as a side effect and
    /// refreshes the session's access time.
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let handle = self.live_session(session_id, true).await?.expect("created on demand");
        let mut session = handle.lock().await;
        session.last_access = Instant::now();
        Ok(session.snapshot())
    }

    /// Appends a turn, creating the session if needed, and drops oldest
    /// turns until the history fits the configured bound.
    pub async fn append_turn(&self, session_id: &str, turn: ChatTurn) -> Result<(), SessionError> {
        self.mutate(session_id, |session| {
            session.turns.push_back(turn);
            while session.turns.len() > self.max_turns {
                session.turns.pop_front();
            }
        })
        .await
    }

    pub async fn set_pending_action(
        &self,
        session_id: &str,
        action: Option<PendingAction>,
    ) -> Result<(), SessionError> {
        self.mutate(session_id, |session| session.pending_action = action).await
    }

    pub async fn pending_action(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingAction>, SessionError> {
        Ok(self.read(session_id).await?.and_then(|snapshot| snapshot.pending_action))
    }

    pub async fn set_cart_id(&self, session_id: &str, cart_id: CartId) -> Result<(), SessionError> {
        self.mutate(session_id, |session| session.cart_id = Some(cart_id)).await
    }

    pub async fn cart_id(&self, session_id: &str) -> Result<Option<CartId>, SessionError> {
        Ok(self.read(session_id).await?.and_then(|snapshot| snapshot.cart_id))
    }

    pub async fn set_last_intent(
        &self,
        session_id: &str,
        intent: LastIntent,
    ) -> Result<(), SessionError> {
        self.mutate(session_id, |session| session.last_intent = Some(intent)).await
    }

    pub async fn last_intent(&self, session_id: &str) -> Result<Option<LastIntent>, SessionError> {
        Ok(self.read(session_id).await?.and_then(|snapshot| snapshot.last_intent))
    }

    /// Explicit removal, independent of the TTL.
    pub async fn clear(&self, session_id: &str) -> Result<(), SessionError> {
        validate_id(session_id)?;
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn mutate(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut Session),
    ) -> Result<(), SessionError> {
        let handle = self.live_session(session_id, true).await?.expect("created on demand");
        let mut session = handle.lock().await;
        apply(&mut session);
        session.last_access = Instant::now();
        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionSnapshot>, SessionError> {
        match self.live_session(session_id, false).await? {
            Some(handle) => {
                let session = handle.lock().await;
                Ok(Some(session.snapshot()))
            }
            None => Ok(None),
        }
    }

    /// Looks up a non-expired session, sweeping expired entries first.
    /// With `create` set, a missing (or just-expired) id gets a fresh empty
    /// session.
    async fn live_session(
        &self,
        session_id: &str,
        create: bool,
    ) -> Result<Option<Arc<Mutex<Session>>>, SessionError> {
        validate_id(session_id)?;

        let mut sessions = self.sessions.write().await;
        let ttl = self.ttl;
        sessions.retain(|id, handle| match handle.try_lock() {
            Ok(session) => {
                let live = session.last_access.elapsed() <= ttl;
                if !live {
                    debug!(session_id = %id, "session expired");
                }
                live
            }
            // locked means an in-flight turn; never evict under it
            Err(_) => true,
        });

        if let Some(handle) = sessions.get(session_id) {
            return Ok(Some(Arc::clone(handle)));
        }
        if !create {
            return Ok(None);
        }

        let handle = Arc::new(Mutex::new(Session::new()));
        sessions.insert(session_id.to_string(), Arc::clone(&handle));
        Ok(Some(handle))
    }
}

fn validate_id(session_id: &str) -> Result<(), SessionError> {
    if session_id.trim().is_empty() {
        return Err(SessionError::EmptySessionId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatcart_core::{CartId, ChatTurn, PendingAction};

    use super::{SessionError, SessionStore};

    fn store(max_turns: usize) -> SessionStore {
        SessionStore::with_limits(Duration::from_secs(60), max_turns)
    }

    #[tokio::test]
    async fn history_truncates_fifo_at_the_bound() {
        let store = store(50);
        for index in 0..55 {
            store.append_turn("s1", ChatTurn::user(format!("m{index}"))).await.expect("append");
        }

        let snapshot = store.get_or_create("s1").await.expect("snapshot");
        assert_eq!(snapshot.history.len(), 50);
        assert_eq!(snapshot.history.first().unwrap().content, "m5");
        assert_eq!(snapshot.history.last().unwrap().content, "m54");
    }

    #[tokio::test]
    async fn expired_sessions_are_replaced_fresh_on_next_access() {
        let store = SessionStore::with_limits(Duration::from_millis(5), 10);
        store.append_turn("s1", ChatTurn::user("hello")).await.expect("append");
        store.set_pending_action("s1", Some(PendingAction::AdjustStockAndCreateCart))
            .await
            .expect("set pending");

        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = store.get_or_create("s1").await.expect("snapshot");
        assert!(snapshot.history.is_empty());
        assert!(snapshot.pending_action.is_none());
    }

    #[tokio::test]
    async fn state_fields_round_trip() {
        let store = store(10);
        store.set_cart_id("s1", CartId(7)).await.expect("set cart");
        store
            .set_pending_action("s1", Some(PendingAction::AdjustStockAndUpdateCart))
            .await
            .expect("set pending");

        assert_eq!(store.cart_id("s1").await.expect("cart"), Some(CartId(7)));
        assert_eq!(
            store.pending_action("s1").await.expect("pending"),
            Some(PendingAction::AdjustStockAndUpdateCart)
        );

        store.set_pending_action("s1", None).await.expect("clear pending");
        assert_eq!(store.pending_action("s1").await.expect("pending"), None);
    }

    #[tokio::test]
    async fn reads_of_unknown_sessions_do_not_create_them() {
        let store = store(10);
        assert_eq!(store.pending_action("ghost").await.expect("read"), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn clear_removes_the_session() {
        let store = store(10);
        store.append_turn("s1", ChatTurn::user("hello")).await.expect("append");
        store.clear("s1").await.expect("clear");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn empty_session_id_is_a_caller_error() {
        let store = store(10);
        let error = store.get_or_create("  ").await.expect_err("must fail");
        assert_eq!(error, SessionError::EmptySessionId);
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_session_lose_nothing() {
        let store = std::sync::Arc::new(store(200));
        let mut tasks = Vec::new();
        for worker in 0..10 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for index in 0..10 {
                    store
                        .append_turn("s1", ChatTurn::user(format!("w{worker}-{index}")))
                        .await
                        .expect("append");
                }
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        let snapshot = store.get_or_create("s1").await.expect("snapshot");
        assert_eq!(snapshot.history.len(), 100);
    }
}
