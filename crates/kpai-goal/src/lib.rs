//! # kpai-goal
//!
//! Goal lifecycle, guarded goal registry, and priority ordering for the
//! KP AI.
//!
//! A [`Goal`] is one schedulable unit of intent for a unit: a type, a
//! priority, a parameter payload, and a lifecycle phase. Every goal is
//! owned by a [`GoalRegistry`]; everything else holds [`GoalId`]s and
//! re-resolves them, because goals are removed by cascades at any time.
//!
//! ## Key components
//!
//! - [`Goal`] / [`GoalPhase`] — the phase machine (NotStarted → Executing
//!   → Suspended ⇄ ToContinue → Completed | Aborted)
//! - [`GoalRegistry`] — the mutex-guarded owning table, lifecycle signals,
//!   and removal-implies-abort
//! - [`GoalQueue`] and [`GoalRegistry::sort_by_priority`] — priority ordering
//! - [`Cascade`] / [`TransitionGoal`] — listeners that propagate one goal's
//!   transition to another
//! - [`GoalEvent`] / [`EventDispatcher`] / [`NotificationSink`] — lifecycle
//!   events for outside observers

pub mod cascade;
pub mod error;
pub mod events;
pub mod goal;
pub mod ordering;
pub mod registry;

pub use cascade::{attach, Cascade, TransitionGoal};
pub use error::GoalError;
pub use events::{EventDispatcher, GoalEvent, LogSink, MemorySink, NotificationSink};
pub use goal::{
    Frame, Goal, GoalId, GoalParam, GoalPhase, GoalSignal, GoalType, Position, Transition,
};
pub use ordering::GoalQueue;
pub use registry::{GoalRegistry, Listener, ListenerId};
