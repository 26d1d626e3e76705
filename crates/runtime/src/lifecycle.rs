//! Async lifecycle manager driving per-instance phase transitions.
//!
//! The legal-move table lives in `learn_core::lifecycle`; this module tracks
//! the current phase of each loaded instance, runs before/after hooks around
//! every transition, and emits state-changed events on the bus. Hooks are
//! best-effort observers: their failures are logged and never abort the
//! transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info};

use learn_core::lifecycle::{GamePhase, LifecycleError};

use crate::events::{EventBus, EventRecord, names};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// How loudly a hook failure is reported. No level aborts the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookCriticality {
    #[default]
    Important,
    Optional,
}

/// Observer invoked around a phase transition.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn criticality(&self) -> HookCriticality {
        HookCriticality::Important
    }

    async fn run(&self, ctx: &HookContext) -> Result<(), HookError>;
}

/// Transition edge handed to hooks.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub instance_id: String,
    pub from: GamePhase,
    pub to: GamePhase,
}

/// Where a hook fires relative to the phase commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    Before(GamePhase),
    After(GamePhase),
}

/// Tracks the phase of every loaded instance and gatekeeps transitions.
///
/// An instance id that has never been seen is in [`GamePhase::Unloaded`].
/// Callers must serialize transitions per instance id; distinct instances
/// may transition concurrently.
pub struct LifecycleManager {
    bus: EventBus,
    phases: Mutex<HashMap<String, GamePhase>>,
    hooks: Mutex<HashMap<HookPoint, Vec<Arc<dyn LifecycleHook>>>>,
}

impl LifecycleManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            phases: Mutex::new(HashMap::new()),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    fn phases(&self) -> MutexGuard<'_, HashMap<String, GamePhase>> {
        self.phases.lock().expect("lifecycle phase map poisoned")
    }

    pub fn register_hook(&self, point: HookPoint, hook: Arc<dyn LifecycleHook>) {
        self.hooks
            .lock()
            .expect("lifecycle hook map poisoned")
            .entry(point)
            .or_default()
            .push(hook);
    }

    /// Current phase of an instance; unseen ids are `Unloaded`.
    pub fn phase(&self, instance_id: &str) -> GamePhase {
        self.phases()
            .get(instance_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn can_transition(&self, instance_id: &str, target: GamePhase) -> bool {
        self.phase(instance_id).can_transition(target)
    }

    /// Moves an instance to `target`, running before/after hooks and emitting
    /// a state-changed event.
    ///
    /// Fails without mutating anything if the move is not in the adjacency
    /// table. Hook failures are logged per criticality and do not abort.
    pub async fn transition(
        &self,
        instance_id: &str,
        target: GamePhase,
    ) -> Result<(), LifecycleError> {
        let from = self.phase(instance_id);
        if !from.can_transition(target) {
            return Err(LifecycleError::InvalidTransition {
                instance: instance_id.to_string(),
                from,
                to: target,
            });
        }

        let ctx = HookContext {
            instance_id: instance_id.to_string(),
            from,
            to: target,
        };

        self.run_hooks(HookPoint::Before(target), &ctx).await;

        self.phases().insert(instance_id.to_string(), target);
        info!(
            target: "runtime::lifecycle",
            instance = instance_id,
            from = %from,
            to = %target,
            "phase transition"
        );
        self.bus
            .publish(
                names::STATE_CHANGED,
                json!({
                    "instance_id": instance_id,
                    "from": from,
                    "to": target,
                }),
            )
            .await;

        self.run_hooks(HookPoint::After(target), &ctx).await;
        Ok(())
    }

    /// Runs a multi-step transition, validating every leg before committing
    /// the first so a failure cannot leave the instance half-moved.
    pub async fn transition_chain(
        &self,
        instance_id: &str,
        steps: &[GamePhase],
    ) -> Result<(), LifecycleError> {
        let mut current = self.phase(instance_id);
        for &step in steps {
            if !current.can_transition(step) {
                return Err(LifecycleError::InvalidTransition {
                    instance: instance_id.to_string(),
                    from: current,
                    to: step,
                });
            }
            current = step;
        }
        for &step in steps {
            self.transition(instance_id, step).await?;
        }
        Ok(())
    }

    async fn run_hooks(&self, point: HookPoint, ctx: &HookContext) {
        let hooks: Vec<Arc<dyn LifecycleHook>> = self
            .hooks
            .lock()
            .expect("lifecycle hook map poisoned")
            .get(&point)
            .cloned()
            .unwrap_or_default();

        for hook in hooks {
            if let Err(err) = hook.run(ctx).await {
                match hook.criticality() {
                    HookCriticality::Important => error!(
                        target: "runtime::lifecycle",
                        hook = hook.name(),
                        instance = ctx.instance_id,
                        phase = %ctx.to,
                        error = %err,
                        "lifecycle hook failed, continuing"
                    ),
                    HookCriticality::Optional => debug!(
                        target: "runtime::lifecycle",
                        hook = hook.name(),
                        instance = ctx.instance_id,
                        phase = %ctx.to,
                        error = %err,
                        "optional lifecycle hook failed"
                    ),
                }
            }
        }
    }

    /// unloaded -> loading -> loaded.
    pub async fn load(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition_chain(instance_id, &[GamePhase::Loading, GamePhase::Loaded])
            .await?;
        self.publish_lifecycle(names::LOADED, instance_id, game_id).await;
        Ok(())
    }

    /// loaded -> initializing -> initialized.
    pub async fn initialize(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition_chain(
            instance_id,
            &[GamePhase::Initializing, GamePhase::Initialized],
        )
        .await?;
        self.publish_lifecycle(names::INITIALIZED, instance_id, game_id)
            .await;
        Ok(())
    }

    /// initialized -> starting -> running.
    pub async fn start(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition_chain(instance_id, &[GamePhase::Starting, GamePhase::Running])
            .await?;
        self.publish_lifecycle(names::STARTED, instance_id, game_id).await;
        Ok(())
    }

    /// running -> paused.
    pub async fn pause(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition(instance_id, GamePhase::Paused).await?;
        self.publish_lifecycle(names::PAUSED, instance_id, game_id).await;
        Ok(())
    }

    /// paused -> resuming -> running.
    pub async fn resume(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition_chain(instance_id, &[GamePhase::Resuming, GamePhase::Running])
            .await?;
        self.publish_lifecycle(names::RESUMED, instance_id, game_id).await;
        Ok(())
    }

    /// running|paused -> completing -> completed.
    pub async fn complete(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition_chain(instance_id, &[GamePhase::Completing, GamePhase::Completed])
            .await?;
        self.publish_lifecycle(names::COMPLETED, instance_id, game_id)
            .await;
        Ok(())
    }

    /// Any error-adjacent phase -> error.
    pub async fn fail(
        &self,
        instance_id: &str,
        game_id: &str,
        message: &str,
    ) -> Result<(), LifecycleError> {
        self.transition(instance_id, GamePhase::Error).await?;
        self.bus
            .publish(
                names::ERROR,
                json!({
                    "session_id": instance_id,
                    "game_id": game_id,
                    "message": message,
                }),
            )
            .await;
        Ok(())
    }

    /// Returns the instance to `Unloaded` and drops its tracked state.
    pub async fn unload(&self, instance_id: &str, game_id: &str) -> Result<(), LifecycleError> {
        self.transition(instance_id, GamePhase::Unloaded).await?;
        self.phases().remove(instance_id);
        self.publish_lifecycle(names::UNLOADED, instance_id, game_id).await;
        Ok(())
    }

    /// Drops an instance's tracked phase without hooks or events.
    ///
    /// For tearing down instances whose startup failed partway, where the
    /// phase reached has no legal path to `Error` or `Unloaded`.
    pub fn discard(&self, instance_id: &str) {
        self.phases().remove(instance_id);
    }

    async fn publish_lifecycle(&self, event: &str, instance_id: &str, game_id: &str) {
        self.bus
            .publish(
                event,
                json!({ "session_id": instance_id, "game_id": game_id }),
            )
            .await;
    }

    /// Ids of all instances currently in `Running`.
    pub fn running_instances(&self) -> Vec<String> {
        self.phases()
            .iter()
            .filter(|(_, phase)| **phase == GamePhase::Running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Instance counts by phase, over tracked instances.
    pub fn phase_stats(&self) -> HashMap<GamePhase, usize> {
        let mut stats = HashMap::new();
        for phase in self.phases().values() {
            *stats.entry(*phase).or_insert(0) += 1;
        }
        stats
    }

    /// State-changed history for one instance, reconstructed from the bus.
    pub fn state_history(&self, instance_id: &str, limit: usize) -> Vec<EventRecord> {
        self.bus
            .history(Some(names::STATE_CHANGED), usize::MAX)
            .into_iter()
            .filter(|e| e.payload["instance_id"] == json!(instance_id))
            .rev()
            .take(limit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}
