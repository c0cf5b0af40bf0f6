//! # kpai-agent
//!
//! Per-unit goal processors and host event translation for the KP AI.
//!
//! Each finished unit gets a [`UnitAi`] holding a priority-sorted stack of
//! goal ids. On every scheduled frame the processor walks that stack and
//! turns the first eligible goal into a [`Command`] for the host.
//! [`TeamAi`] sits in front of the processors and translates
//! [`HostEvent`]s into unit bookkeeping, goal completions and retreats.
//!
//! ## Key components
//!
//! - [`UnitAi`] — the per-unit state machine (dispatch, preemption,
//!   timeouts, chained goals, agent destruction)
//! - [`ClearCurrentGoal`] / [`ClearProducing`] — cascades wired to
//!   expansion builds
//! - [`TeamAi`] — host event translation and goal ownership
//! - [`CommandSink`] / [`ConfigProvider`] — the host seams
//! - [`AiConfig`] — `ai.toml` with scheduler cadence, tunables and role tables

pub mod config;
pub mod error;
pub mod host;
pub mod team;
pub mod unit;
pub mod unit_ai;

pub use config::{AiConfig, RoleTable, SchedulerConfig, StaticConfig, Tunables};
pub use error::AgentError;
pub use host::{
    Command, CommandSink, ConfigProvider, HostEvent, RecordingSink, UnitId,
    BUILDER_RETREAT_TIMEOUT, DEFAULT_BUILDER_RETREAT_TIMEOUT, DEFAULT_RETREAT_PRIORITY,
    RETREAT_PRIORITY,
};
pub use team::TeamAi;
pub use unit::{Unit, UnitRole, UnitStatus};
pub use unit_ai::{AiContext, ClearCurrentGoal, ClearProducing, KilledListener, UnitAi};
