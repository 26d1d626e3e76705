//! In-process publish/subscribe event plumbing for the game runtime.

mod bus;

pub use bus::{
    AsyncEventHandler, EventBus, EventBusError, EventRecord, EventStats, HandlerError,
    SubscriptionId, WILDCARD,
};

/// Well-known event names published by the runtime.
pub mod names {
    // Lifecycle events
    pub const INITIALIZED: &str = "game:initialized";
    pub const STARTED: &str = "game:started";
    pub const PAUSED: &str = "game:paused";
    pub const RESUMED: &str = "game:resumed";
    pub const COMPLETED: &str = "game:completed";
    pub const ERROR: &str = "game:error";

    // Progress events
    pub const PROGRESS: &str = "game:progress";
    pub const CHECKPOINT_SAVED: &str = "game:checkpoint-saved";
    pub const CHECKPOINT_RESTORED: &str = "game:checkpoint-restored";

    // Interaction events
    pub const ANSWER_RECORDED: &str = "game:answer-recorded";
    pub const HINT_USED: &str = "game:hint-used";
    pub const DIFFICULTY_CHANGED: &str = "game:difficulty-changed";
    pub const QUESTION_SHOWN: &str = "quiz:question-shown";

    // System events
    pub const LOADED: &str = "game:loaded";
    pub const UNLOADED: &str = "game:unloaded";
    pub const STATE_CHANGED: &str = "game:state-changed";
    pub const BUS_ERROR: &str = "eventbus:error";
}
