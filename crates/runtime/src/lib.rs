//! Async orchestration for the adaptive learning game engine.
//!
//! This crate drives the pure domain logic in `learn-core`: the event bus,
//! the lifecycle manager, the polymorphic game contract and its quiz
//! variant, the difficulty advisor, and the engine that ties them to a
//! persistence adapter. Construct one [`GameEngine`] per process via
//! [`EngineBuilder`] and share it; there are no global instances.

pub mod adaptive;
pub mod engine;
pub mod events;
pub mod game;
pub mod lifecycle;
pub mod persistence;

pub use adaptive::{DifficultyAdvisor, RecommendationError, RecommendationService};
pub use engine::{EngineBuilder, EngineError, GameEngine};
pub use events::{
    AsyncEventHandler, EventBus, EventBusError, EventRecord, EventStats, HandlerError,
    SubscriptionId, WILDCARD, names,
};
pub use game::{
    AdaptOutcome, AnswerOutcome, GameError, GameRegistry, GameResult, GameRuntime, QuizGame,
    RegistryError,
};
pub use lifecycle::{
    HookContext, HookCriticality, HookError, HookPoint, LifecycleHook, LifecycleManager,
};
pub use persistence::{InMemoryStore, Persistence, PersistenceError};
