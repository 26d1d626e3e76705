//! Persistence contract and the in-memory store used for tests and embedding.
//!
//! The engine writes back after every mutation and relies on read-after-write
//! consistency within the process. Retry policy belongs to the adapter, not
//! here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use learn_core::content::GameDefinition;
use learn_core::state::{Progress, Session};

/// Errors raised by persistence adapters.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage backend failure: {message}")]
    Backend { message: String },
}

/// Read/write contract for sessions, progress records, and game content.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, PersistenceError>;

    async fn save_session(&self, session: &Session) -> Result<(), PersistenceError>;

    async fn load_progress(
        &self,
        user_id: &str,
        subject: &str,
    ) -> Result<Option<Progress>, PersistenceError>;

    async fn save_progress(&self, progress: &Progress) -> Result<(), PersistenceError>;

    async fn load_game_definition(
        &self,
        game_id: &str,
    ) -> Result<Option<GameDefinition>, PersistenceError>;
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    // Keyed by (user_id, subject).
    progress: HashMap<(String, String), Progress>,
    games: HashMap<String, GameDefinition>,
}

/// Hash-map backed store with last-write-wins semantics.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().expect("in-memory store lock poisoned")
    }

    /// Seeds a game definition; the engine only ever reads these.
    pub fn insert_game_definition(&self, definition: GameDefinition) {
        self.tables()
            .games
            .insert(definition.id.clone(), definition);
    }

    pub fn session_count(&self) -> usize {
        self.tables().sessions.len()
    }
}

#[async_trait]
impl Persistence for InMemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, PersistenceError> {
        Ok(self.tables().sessions.get(session_id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), PersistenceError> {
        self.tables()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_progress(
        &self,
        user_id: &str,
        subject: &str,
    ) -> Result<Option<Progress>, PersistenceError> {
        Ok(self
            .tables()
            .progress
            .get(&(user_id.to_string(), subject.to_string()))
            .cloned())
    }

    async fn save_progress(&self, progress: &Progress) -> Result<(), PersistenceError> {
        self.tables().progress.insert(
            (progress.user_id.clone(), progress.subject.clone()),
            progress.clone(),
        );
        Ok(())
    }

    async fn load_game_definition(
        &self,
        game_id: &str,
    ) -> Result<Option<GameDefinition>, PersistenceError> {
        Ok(self.tables().games.get(game_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_round_trip() {
        let store = InMemoryStore::new();
        let session = Session::new("game-1", "user-1");
        let id = session.id.clone();

        store.save_session(&session).await.unwrap();
        let loaded = store.load_session(&id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert!(store.load_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_is_keyed_by_user_and_subject() {
        let store = InMemoryStore::new();
        store
            .save_progress(&Progress::new("user-1", "math"))
            .await
            .unwrap();

        assert!(store.load_progress("user-1", "math").await.unwrap().is_some());
        assert!(store.load_progress("user-1", "art").await.unwrap().is_none());
        assert!(store.load_progress("user-2", "math").await.unwrap().is_none());
    }
}
