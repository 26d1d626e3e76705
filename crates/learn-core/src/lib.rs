//! Core domain logic for the adaptive learning game engine.
//!
//! This crate holds the pure, synchronous parts of the system: the session
//! and progress aggregates, the lifecycle phase table, the deterministic
//! difficulty-adaptation rule, and the static game content types. No async,
//! no I/O; orchestration lives in the `runtime` crate.
pub mod adaptive;
pub mod content;
pub mod ids;
pub mod lifecycle;
pub mod state;

pub use adaptive::{
    MAX_DIFFICULTY, MIN_DIFFICULTY, PerformanceSignals, Recommendation, Sensitivity, Thresholds,
    fallback_recommendation,
};
pub use content::{ContentError, GameConfig, GameDefinition, Question, QuestionKind, ScoringConfig};
pub use lifecycle::{GamePhase, LifecycleError};
pub use state::{
    Adaptation, Checkpoint, CompletedGame, CompletionSummary, DifficultyChange, Performance,
    Progress, ProgressError, QuestionResult, Session, SessionError, SessionEvent, SessionProgress,
    SessionProgressPatch, SessionStatus, SkillMastery,
};
