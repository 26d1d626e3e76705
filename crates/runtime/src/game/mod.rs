//! The polymorphic game contract, its quiz variant, and the type registry.

mod quiz;
mod registry;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use learn_core::Recommendation;
use learn_core::content::{ContentError, Question};
use learn_core::state::{Checkpoint, Session, SessionError, SessionProgressPatch};

use crate::events::EventBus;

pub use quiz::QuizGame;
pub use registry::{GameConstructor, GameRegistry, RegistryError};

pub type GameResult<T> = Result<T, GameError>;

/// Errors raised by game variants.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("game {game_id} is not initialized")]
    NotInitialized { game_id: String },

    #[error("game {game_id} is not running")]
    NotRunning { game_id: String },

    #[error("question {question_id} is not the active question of game {game_id}")]
    UnknownQuestion {
        game_id: String,
        question_id: String,
    },

    #[error("game {game_id} does not allow skipping questions")]
    SkipNotAllowed { game_id: String },

    #[error("game {game_id} does not expose hints")]
    HintsDisabled { game_id: String },

    #[error("failed to encode or decode variant state")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Outcome of one answer submission (or skip).
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub points: i32,
    /// True when the question queue is exhausted and the session should
    /// complete.
    pub finished: bool,
    pub next_question: Option<Question>,
}

/// Outcome of a difficulty adaptation attempt.
#[derive(Debug, Clone)]
pub struct AdaptOutcome {
    /// False when the variant refused the recommendation.
    pub applied: bool,
    pub difficulty: u8,
    /// How many queued questions were swapped for the new difficulty.
    pub questions_replaced: usize,
}

/// One playable game variant driven by the engine.
///
/// Lifecycle methods validate their own preconditions and run variant
/// behavior; phase bookkeeping and lifecycle events are the engine's and the
/// lifecycle manager's concern. The session passed in is the single source
/// of truth for results and scoring; variants mutate it only through its
/// aggregate methods.
#[async_trait]
pub trait GameRuntime: Send {
    fn game_id(&self) -> &str;

    fn current_difficulty(&self) -> u8;

    async fn initialize(&mut self, session: &mut Session, bus: &EventBus) -> GameResult<()>;

    async fn start(&mut self, session: &mut Session, bus: &EventBus) -> GameResult<()>;

    async fn pause(&mut self, session: &mut Session, bus: &EventBus) -> GameResult<()>;

    async fn resume(&mut self, session: &mut Session, bus: &EventBus) -> GameResult<()>;

    async fn complete(&mut self, session: &mut Session, bus: &EventBus) -> GameResult<()>;

    /// Judges and records an answer to the active question.
    async fn submit_answer(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
        question_id: &str,
        answer: &str,
        response_time_ms: u64,
    ) -> GameResult<AnswerOutcome>;

    /// Records the active question as skipped, when the variant allows it.
    async fn skip_question(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
    ) -> GameResult<AnswerOutcome>;

    /// Reveals the active question's hint and charges it to the session.
    async fn use_hint(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
    ) -> GameResult<Option<String>>;

    async fn update_progress(
        &mut self,
        session: &mut Session,
        patch: SessionProgressPatch,
    ) -> GameResult<()>;

    /// Applies (or refuses) a difficulty recommendation.
    async fn adapt_difficulty(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
        recommendation: &Recommendation,
    ) -> GameResult<AdaptOutcome>;

    /// Variant state snapshot suitable for [`Session::save_checkpoint`].
    fn checkpoint_data(&self) -> Value;

    /// Rebuilds variant state from a checkpoint and re-syncs the session's
    /// positional progress.
    fn restore_from_checkpoint(
        &mut self,
        session: &mut Session,
        checkpoint: &Checkpoint,
    ) -> GameResult<()>;

    async fn cleanup(&mut self) -> GameResult<()>;
}
