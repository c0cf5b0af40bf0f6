// host.rs — The boundary with the simulation host.
//
// The host drives the AI: it delivers discrete events (units created,
// finished, destroyed, damaged, idle; enemies sighted; chat; frame ticks)
// and accepts orders. The AI sees the host only through the types here:
//
// - HostEvent      — everything the host can tell us
// - CommandSink    — fire-and-forget order delivery
// - ConfigProvider — tunables looked up lazily, per use
//
// Command success is never observed synchronously. It comes back later
// as host events (UnitFinished, UnitIdle, UnitMoveFailed).

use std::fmt;
use std::sync::Mutex;

use kpai_goal::{Frame, Position};
use serde::{Deserialize, Serialize};

/// A host unit id (friendly or enemy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An order for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Move to a position.
    Move { target: Position },

    /// Build a unit of the named definition, at a position for structures
    /// or in place for factories.
    Build {
        unit_def: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<Position>,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { target } => write!(f, "move to {}", target),
            Command::Build { unit_def, at: Some(at) } => write!(f, "build {} at {}", unit_def, at),
            Command::Build { unit_def, at: None } => write!(f, "build {}", unit_def),
        }
    }
}

/// Receives orders from the AI. Delivery is fire-and-forget.
pub trait CommandSink: Send + Sync {
    fn issue_command(&self, unit: UnitId, command: Command);
}

/// Logs every command and keeps a copy, in issue order.
#[derive(Default)]
pub struct RecordingSink {
    issued: Mutex<Vec<(UnitId, Command)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything issued so far.
    pub fn issued(&self) -> Vec<(UnitId, Command)> {
        match self.issued.lock() {
            Ok(issued) => issued.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.issued().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandSink for RecordingSink {
    fn issue_command(&self, unit: UnitId, command: Command) {
        tracing::info!("unit {}: {}", unit, command);
        match self.issued.lock() {
            Ok(mut issued) => issued.push((unit, command)),
            Err(poisoned) => poisoned.into_inner().push((unit, command)),
        }
    }
}

/// Events delivered by the host.
///
/// The `type` tag makes scenario files read naturally:
/// `{ type = "unit_idle", unit = 3 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A friendly unit started being built.
    UnitCreated {
        unit: UnitId,
        def_name: String,
        #[serde(default)]
        builder: Option<UnitId>,
    },

    /// A friendly unit finished building.
    UnitFinished { unit: UnitId, position: Position },

    UnitDestroyed {
        unit: UnitId,
        #[serde(default)]
        attacker: Option<UnitId>,
    },

    /// A friendly unit has nothing left to do.
    UnitIdle { unit: UnitId },

    UnitDamaged {
        unit: UnitId,
        #[serde(default)]
        attacker: Option<UnitId>,
        #[serde(default)]
        damage: f32,
    },

    UnitMoveFailed { unit: UnitId },

    EnemyEnterLos { enemy: UnitId },
    EnemyLeaveLos { enemy: UnitId },
    EnemyEnterRadar { enemy: UnitId },
    EnemyLeaveRadar { enemy: UnitId },

    EnemyDamaged {
        enemy: UnitId,
        #[serde(default)]
        attacker: Option<UnitId>,
    },

    EnemyDestroyed {
        enemy: UnitId,
        #[serde(default)]
        attacker: Option<UnitId>,
    },

    ChatMessage { text: String, player: u32 },

    /// The periodic simulation tick.
    Frame { frame: Frame },
}

/// Config key for how long a damaged builder keeps retreating.
pub const BUILDER_RETREAT_TIMEOUT: &str = "builder_retreat_timeout";
/// Config key for the priority of retreat goals.
pub const RETREAT_PRIORITY: &str = "retreat_priority";

/// Fallback for [`BUILDER_RETREAT_TIMEOUT`], in frames.
pub const DEFAULT_BUILDER_RETREAT_TIMEOUT: i64 = 900;
/// Fallback for [`RETREAT_PRIORITY`].
pub const DEFAULT_RETREAT_PRIORITY: i64 = 100;

/// Key → value lookup for tunable parameters.
///
/// Values may depend on the current frame (a script can make builders
/// braver late in the game), so callers ask again at every use instead of
/// caching.
pub trait ConfigProvider: Send + Sync {
    fn int_value(&self, key: &str, frame: Frame) -> Option<i64>;

    /// Frames a damaged builder keeps its retreat goal before it times out.
    fn builder_retreat_timeout(&self, frame: Frame) -> Frame {
        self.int_value(BUILDER_RETREAT_TIMEOUT, frame)
            .and_then(|v| Frame::try_from(v).ok())
            .unwrap_or(DEFAULT_BUILDER_RETREAT_TIMEOUT as Frame)
    }

    fn retreat_priority(&self, frame: Frame) -> i32 {
        self.int_value(RETREAT_PRIORITY, frame)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(DEFAULT_RETREAT_PRIORITY as i32)
    }
}
