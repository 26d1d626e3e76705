//! Engine orchestrator: wires sessions, games, lifecycle, events, advice,
//! and persistence together.
//!
//! One engine instance is constructed at startup (via [`EngineBuilder`]) and
//! handed to every caller; there are no module-level singletons. Mutating
//! calls for one session id must come from one logical caller at a time; the
//! per-session lock makes the aggregate updates atomic, not concurrent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use learn_core::Sensitivity;
use learn_core::lifecycle::{GamePhase, LifecycleError};
use learn_core::state::{
    Progress, ProgressError, Session, SessionError, SessionProgressPatch, SessionStatus,
};

use crate::adaptive::DifficultyAdvisor;
use crate::events::{EventBus, names};
use crate::game::{
    AdaptOutcome, AnswerOutcome, GameError, GameRegistry, GameRuntime, RegistryError,
};
use crate::lifecycle::LifecycleManager;
use crate::persistence::{Persistence, PersistenceError};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session {id} is not active")]
    SessionNotActive { id: String },

    #[error("session {id} not found")]
    SessionNotFound { id: String },

    #[error("game {id} not found")]
    GameNotFound { id: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

struct ActiveSession {
    session: Session,
    subject: String,
    game: Box<dyn GameRuntime>,
}

type ActiveHandle = Arc<tokio::sync::Mutex<ActiveSession>>;

/// Builder for [`GameEngine`]; only the persistence adapter is mandatory.
pub struct EngineBuilder {
    store: Arc<dyn Persistence>,
    bus: Option<EventBus>,
    registry: Option<GameRegistry>,
    advisor: Option<DifficultyAdvisor>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self {
            store,
            bus: None,
            registry: None,
            advisor: None,
        }
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn registry(mut self, registry: GameRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn advisor(mut self, advisor: DifficultyAdvisor) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn build(self) -> GameEngine {
        let bus = self.bus.unwrap_or_default();
        GameEngine {
            lifecycle: LifecycleManager::new(bus.clone()),
            bus,
            registry: self.registry.unwrap_or_default(),
            store: self.store,
            advisor: self
                .advisor
                .unwrap_or_else(|| DifficultyAdvisor::new(Sensitivity::default())),
            active: Mutex::new(HashMap::new()),
        }
    }
}

/// The top-level orchestrator for game sessions.
///
/// Every mutation is written back to persistence before the operation
/// returns; persistence failures propagate to the caller.
pub struct GameEngine {
    bus: EventBus,
    lifecycle: LifecycleManager,
    registry: GameRegistry,
    store: Arc<dyn Persistence>,
    advisor: DifficultyAdvisor,
    active: Mutex<HashMap<String, ActiveHandle>>,
}

impl GameEngine {
    pub fn builder(store: Arc<dyn Persistence>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveHandle>> {
        self.active.lock().expect("active session table poisoned")
    }

    fn entry(&self, session_id: &str) -> Result<ActiveHandle> {
        self.active()
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotActive {
                id: session_id.to_string(),
            })
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.active().keys().cloned().collect()
    }

    /// Creates a fresh session for `user_id` on `game_id`, drives the game
    /// through load/initialize/start, and returns the new session id.
    pub async fn start_game(&self, game_id: &str, user_id: &str) -> Result<String> {
        let definition = self
            .store
            .load_game_definition(game_id)
            .await?
            .ok_or_else(|| EngineError::GameNotFound {
                id: game_id.to_string(),
            })?;
        let subject = definition.subject.clone();
        let mut game = self.registry.create(definition)?;

        let mut session = Session::new(game_id, user_id);
        let session_id = session.id.clone();

        let startup = async {
            self.lifecycle.load(&session_id, game_id).await?;
            game.initialize(&mut session, &self.bus).await?;
            self.lifecycle.initialize(&session_id, game_id).await?;
            game.start(&mut session, &self.bus).await?;
            self.lifecycle.start(&session_id, game_id).await?;
            Ok::<(), EngineError>(())
        };
        if let Err(err) = startup.await {
            // A half-started instance has no legal path out of its phase;
            // drop it so failed starts leave no lifecycle residue.
            self.lifecycle.discard(&session_id);
            return Err(err);
        }

        self.store.save_session(&session).await?;
        info!(
            target: "runtime::engine",
            session = session_id,
            game = game_id,
            user = user_id,
            "session started"
        );

        self.active().insert(
            session_id.clone(),
            Arc::new(tokio::sync::Mutex::new(ActiveSession {
                session,
                subject,
                game,
            })),
        );
        Ok(session_id)
    }

    /// Suspends an active session.
    pub async fn pause_session(&self, session_id: &str) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        session.pause()?;
        game.pause(session, &self.bus).await?;
        self.lifecycle.pause(session_id, &session.game_id).await?;
        self.store.save_session(session).await?;
        Ok(())
    }

    /// Resumes a session, rehydrating it from persistence when it is no
    /// longer in memory. A rehydrated game is restored from the session's
    /// latest checkpoint when one exists.
    pub async fn resume_session(&self, session_id: &str) -> Result<()> {
        if let Ok(entry) = self.entry(session_id) {
            let mut active = entry.lock().await;
            let ActiveSession { session, game, .. } = &mut *active;
            session.resume()?;
            game.resume(session, &self.bus).await?;
            self.lifecycle.resume(session_id, &session.game_id).await?;
            self.store.save_session(session).await?;
            return Ok(());
        }

        let mut session = self
            .store
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        if session.status.is_terminal() {
            return Err(SessionError::Closed {
                id: session.id.clone(),
                status: session.status,
            }
            .into());
        }

        let definition = self
            .store
            .load_game_definition(&session.game_id)
            .await?
            .ok_or_else(|| EngineError::GameNotFound {
                id: session.game_id.clone(),
            })?;
        let subject = definition.subject.clone();
        let mut game = self.registry.create(definition)?;
        let game_id = session.game_id.clone();

        let startup = async {
            self.lifecycle.load(session_id, &game_id).await?;
            game.initialize(&mut session, &self.bus).await?;
            if let Some(checkpoint) = session.latest_checkpoint().cloned() {
                game.restore_from_checkpoint(&mut session, &checkpoint)?;
                self.bus
                    .publish(
                        names::CHECKPOINT_RESTORED,
                        json!({
                            "session_id": session_id,
                            "game_id": game_id,
                            "checkpoint_id": checkpoint.id,
                        }),
                    )
                    .await;
            }
            self.lifecycle.initialize(session_id, &game_id).await?;
            game.start(&mut session, &self.bus).await?;
            self.lifecycle.start(session_id, &game_id).await?;
            Ok::<(), EngineError>(())
        };
        if let Err(err) = startup.await {
            self.lifecycle.discard(session_id);
            return Err(err);
        }

        if session.status == SessionStatus::Paused {
            session.resume()?;
        }
        self.store.save_session(&session).await?;
        info!(
            target: "runtime::engine",
            session = session_id,
            "session rehydrated"
        );

        self.active().insert(
            session_id.to_string(),
            Arc::new(tokio::sync::Mutex::new(ActiveSession {
                session,
                subject,
                game,
            })),
        );
        Ok(())
    }

    /// Submits an answer to the session's active question. Completes the
    /// session automatically when the question queue is exhausted.
    pub async fn submit_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
        response_time_ms: u64,
    ) -> Result<AnswerOutcome> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        let outcome = game
            .submit_answer(session, &self.bus, question_id, answer, response_time_ms)
            .await?;

        if outcome.finished {
            self.finish_locked(&mut active).await?;
            drop(active);
            self.active().remove(session_id);
        } else {
            self.store.save_session(&active.session).await?;
        }
        Ok(outcome)
    }

    /// Skips the active question, when the game allows it.
    pub async fn skip_question(&self, session_id: &str) -> Result<AnswerOutcome> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        let outcome = game.skip_question(session, &self.bus).await?;

        if outcome.finished {
            self.finish_locked(&mut active).await?;
            drop(active);
            self.active().remove(session_id);
        } else {
            self.store.save_session(&active.session).await?;
        }
        Ok(outcome)
    }

    /// Reveals the active question's hint, charging it to the session.
    pub async fn use_hint(&self, session_id: &str) -> Result<Option<String>> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        let hint = game.use_hint(session, &self.bus).await?;
        self.store.save_session(session).await?;
        Ok(hint)
    }

    /// Applies a partial progress update through the game.
    pub async fn update_progress(
        &self,
        session_id: &str,
        patch: SessionProgressPatch,
    ) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        game.update_progress(session, patch).await?;
        self.bus
            .publish(
                names::PROGRESS,
                json!({
                    "session_id": session_id,
                    "game_id": session.game_id,
                    "current_level": session.progress.current_level,
                    "current_question": session.progress.current_question,
                    "total_questions": session.progress.total_questions,
                }),
            )
            .await;
        self.store.save_session(session).await?;
        Ok(())
    }

    /// Snapshots the game's resumable state onto the session.
    pub async fn save_checkpoint(&self, session_id: &str) -> Result<String> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        let checkpoint_id = session.save_checkpoint(game.checkpoint_data())?;
        self.bus
            .publish(
                names::CHECKPOINT_SAVED,
                json!({
                    "session_id": session_id,
                    "checkpoint_id": checkpoint_id,
                }),
            )
            .await;
        self.store.save_session(session).await?;
        Ok(checkpoint_id)
    }

    /// Asks the advisor for a difficulty decision and applies it to the game.
    ///
    /// The advisor never fails; the game may still refuse the recommendation
    /// (see [`AdaptOutcome::applied`]).
    pub async fn adapt_difficulty(&self, session_id: &str) -> Result<AdaptOutcome> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        let recommendation = self.advisor.advise(session, game.current_difficulty()).await;
        let outcome = game
            .adapt_difficulty(session, &self.bus, &recommendation)
            .await?;
        self.store.save_session(session).await?;
        Ok(outcome)
    }

    /// Completes an active session explicitly.
    pub async fn complete_session(&self, session_id: &str) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        self.finish_locked(&mut active).await?;
        drop(active);
        self.active().remove(session_id);
        Ok(())
    }

    /// Abandons an active session: terminal for the session, no progress
    /// aggregation.
    pub async fn abandon_session(&self, session_id: &str) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut active = entry.lock().await;
        let ActiveSession { session, game, .. } = &mut *active;

        session.abandon();
        game.cleanup().await?;
        self.store.save_session(session).await?;

        let game_id = session.game_id.clone();
        if let Err(err) = self.lifecycle.complete(session_id, &game_id).await {
            warn!(
                target: "runtime::engine",
                session = session_id,
                error = %err,
                "lifecycle teardown on abandon"
            );
        }
        if let Err(err) = self.lifecycle.unload(session_id, &game_id).await {
            warn!(
                target: "runtime::engine",
                session = session_id,
                error = %err,
                "lifecycle unload on abandon"
            );
        }

        drop(active);
        self.active().remove(session_id);
        Ok(())
    }

    /// Completion path shared by auto-complete and explicit completion:
    /// finalize the session, fold it into the user's progress record, and
    /// tear the instance down.
    ///
    /// Resumable: a persistence failure after the session turned terminal
    /// leaves the entry active, and a retry skips the already-committed
    /// steps. The caller removes the entry only once this returns `Ok`, so
    /// a session is never dropped before its progress is durably saved.
    async fn finish_locked(&self, active: &mut ActiveSession) -> Result<()> {
        let ActiveSession {
            session,
            subject,
            game,
        } = active;

        if session.status != SessionStatus::Completed {
            game.complete(session, &self.bus).await?;
            session.complete();
        }
        if self.lifecycle.phase(&session.id) != GamePhase::Completed {
            self.lifecycle.complete(&session.id, &session.game_id).await?;
        }
        self.store.save_session(session).await?;

        let mut progress = self
            .store
            .load_progress(&session.user_id, subject)
            .await?
            .unwrap_or_else(|| Progress::new(session.user_id.clone(), subject.clone()));
        progress.update_from_game_result(session)?;
        self.store.save_progress(&progress).await?;

        // Progress is saved; teardown failures must not fail the completion
        // (a retry would fold the session into progress a second time).
        if let Err(err) = game.cleanup().await {
            warn!(
                target: "runtime::engine",
                session = session.id,
                error = %err,
                "game cleanup after completion"
            );
        }
        if let Err(err) = self.lifecycle.unload(&session.id, &session.game_id).await {
            warn!(
                target: "runtime::engine",
                session = session.id,
                error = %err,
                "lifecycle unload after completion"
            );
        }
        info!(
            target: "runtime::engine",
            session = session.id,
            score = session.score,
            "session completed"
        );
        Ok(())
    }

    /// Current snapshot of a session, from memory if active, else storage.
    pub async fn session(&self, session_id: &str) -> Result<Option<Session>> {
        if let Ok(entry) = self.entry(session_id) {
            return Ok(Some(entry.lock().await.session.clone()));
        }
        Ok(self.store.load_session(session_id).await?)
    }

    /// The user's progress record for a subject, if one exists yet.
    pub async fn progress(&self, user_id: &str, subject: &str) -> Result<Option<Progress>> {
        Ok(self.store.load_progress(user_id, subject).await?)
    }
}
