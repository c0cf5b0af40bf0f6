// cascade.rs — Reusable lifecycle listeners.
//
// A cascade is bound to its target when it is built and attached to a
// source goal's signal. When the source transitions, the cascade changes
// state somewhere else: another goal, or (in kpai-agent) the owning unit
// and its processor.
//
// Cascades never hold a direct reference to what they change. Goal
// targets are kept as ids and re-resolved through a Weak registry handle
// at fire time, because the target goal (or the registry itself) may be
// gone by then. A missing target is a normal outcome and is skipped.

use std::sync::{Arc, Weak};

use crate::error::GoalError;
use crate::goal::{Goal, GoalId, GoalSignal, Transition};
use crate::registry::{GoalRegistry, ListenerId};

/// A listener object that reacts to a source goal's transition.
pub trait Cascade: Send + Sync {
    /// Called synchronously, on the thread performing the transition, with
    /// a snapshot of the source goal.
    fn fire(&self, source: &Goal);
}

/// Attach `cascade` to `signal` on goal `source`.
pub fn attach(
    registry: &GoalRegistry,
    source: GoalId,
    signal: GoalSignal,
    cascade: impl Cascade + 'static,
) -> Result<ListenerId, GoalError> {
    registry.connect(source, signal, Arc::new(move |goal: &Goal| cascade.fire(goal)))
}

/// Applies a fixed transition to a target goal when fired.
pub struct TransitionGoal {
    registry: Weak<GoalRegistry>,
    target: GoalId,
    transition: Transition,
}

impl TransitionGoal {
    pub fn new(registry: &Arc<GoalRegistry>, target: GoalId, transition: Transition) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            target,
            transition,
        }
    }

    /// Abort `target` when fired.
    pub fn abort(registry: &Arc<GoalRegistry>, target: GoalId) -> Self {
        Self::new(registry, target, Transition::Abort)
    }

    /// Complete `target` when fired.
    pub fn complete(registry: &Arc<GoalRegistry>, target: GoalId) -> Self {
        Self::new(registry, target, Transition::Complete)
    }

    /// Start `target` when fired.
    pub fn start(registry: &Arc<GoalRegistry>, target: GoalId) -> Self {
        Self::new(registry, target, Transition::Start)
    }
}

impl Cascade for TransitionGoal {
    fn fire(&self, source: &Goal) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.transition_if_unfinished(self.target, self.transition) {
            Ok(Some(_)) => tracing::debug!(
                "cascade: {} of goal {} applied {} to goal {}",
                source.phase,
                source.id,
                self.transition,
                self.target
            ),
            Ok(None) => {}
            Err(GoalError::NotFound(_)) => {
                tracing::debug!("cascade target {} already removed", self.target)
            }
            Err(e) => tracing::warn!("cascade to {} failed: {}", self.target, e),
        }
    }
}
