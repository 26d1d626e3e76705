//! Type-tag registry mapping game types to variant constructors.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use learn_core::content::GameDefinition;

use super::{GameRuntime, QuizGame};

/// Errors raised by registry configuration and lookup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("game type `{game_type}` is already registered")]
    DuplicateType { game_type: String },

    #[error("no game variant registered for type `{game_type}`")]
    UnknownType { game_type: String },
}

pub type GameConstructor = Arc<dyn Fn(GameDefinition) -> Box<dyn GameRuntime> + Send + Sync>;

/// Flat map from a definition's type tag to a variant constructor.
///
/// Registration is a startup-time concern; lookups during gameplay never
/// mutate the map.
pub struct GameRegistry {
    constructors: HashMap<String, GameConstructor>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in variants ("quiz").
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let registered = registry.register("quiz", |definition| {
            Box::new(QuizGame::new(definition)) as Box<dyn GameRuntime>
        });
        debug_assert!(registered.is_ok());
        registry
    }

    pub fn register(
        &mut self,
        game_type: impl Into<String>,
        constructor: impl Fn(GameDefinition) -> Box<dyn GameRuntime> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let game_type = game_type.into();
        if self.constructors.contains_key(&game_type) {
            return Err(RegistryError::DuplicateType { game_type });
        }
        debug!(target: "runtime::game", game_type, "variant registered");
        self.constructors.insert(game_type, Arc::new(constructor));
        Ok(())
    }

    /// Instantiates the variant named by the definition's type tag.
    pub fn create(&self, definition: GameDefinition) -> Result<Box<dyn GameRuntime>, RegistryError> {
        let constructor = self.constructors.get(&definition.game_type).ok_or_else(|| {
            RegistryError::UnknownType {
                game_type: definition.game_type.clone(),
            }
        })?;
        Ok(constructor(definition))
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
