//! In-memory registry of live sessions.
//!
//! Each session is wrapped in its own `tokio::sync::Mutex` so that at most
//! one turn runs against it at a time — a second call that tries to drive
//! the same session while a turn is in flight waits for the lock rather
//! than interleaving with it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::session::model::Session;

pub type SharedSession = Arc<AsyncMutex<Session>>;

/// Registry of sessions currently held in memory. Persistence to disk is
/// handled separately by [`crate::session::persistence`]; this store only
/// tracks what's live right now.
pub struct SessionStore {
    sessions: std::sync::Mutex<HashMap<Uuid, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Register a freshly created or restored session and return a shared
    /// handle to it.
    pub fn insert(&self, session: Session) -> SharedSession {
        let id = session.id;
        let shared = Arc::new(AsyncMutex::new(session));
        self.sessions.lock().unwrap().insert(id, shared.clone());
        shared
    }

    pub fn get(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    pub fn has(&self, id: Uuid) -> bool {
        self.sessions.lock().unwrap().contains_key(&id)
    }

    pub fn delete(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.lock().unwrap().remove(&id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::providers::mock::MockProvider;
    use std::path::PathBuf;

    fn new_session() -> Session {
        Session::new(
            PathBuf::from("/tmp/ws"),
            PathBuf::from("/tmp/log.jsonl"),
            Arc::new(MockProvider::new()),
            "mock".to_string(),
            8,
            20,
        )
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = SessionStore::new();
        let session = new_session();
        let id = session.id;
        store.insert(session);
        assert!(store.has(id));
        assert!(store.get(id).is_some());
    }

    #[test]
    fn get_missing_returns_none() {
        let store = SessionStore::new();
        assert!(store.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn delete_removes_session() {
        let store = SessionStore::new();
        let session = new_session();
        let id = session.id;
        store.insert(session);
        assert!(store.delete(id).is_some());
        assert!(!store.has(id));
    }

    #[tokio::test]
    async fn shared_session_mutex_serializes_access() {
        let store = SessionStore::new();
        let session = new_session();
        let id = session.id;
        let shared = store.insert(session);

        let guard = shared.lock().await;
        assert_eq!(guard.id, id);
        drop(guard);

        let handle = store.get(id).unwrap();
        let mut guard = handle.lock().await;
        guard.bump_workspace_version();
        assert_eq!(guard.workspace_version, 1);
    }
}
