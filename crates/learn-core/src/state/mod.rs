//! Mutable aggregates: the per-play-through session and the longitudinal
//! per-user-per-subject progress record.

mod progress;
mod session;

pub use progress::{
    Achievement, CompletedGame, LearningPathItem, MonthlySnapshot, Progress, ProgressError,
    ProgressStats, SkillMastery, StudyRecommendation, WeeklyGoal,
};
pub use session::{
    Adaptation, Checkpoint, CompletionSummary, DifficultyChange, Performance, QuestionResult,
    Session, SessionError, SessionEvent, SessionProgress, SessionProgressPatch, SessionStatus,
};
