// unit.rs — A friendly unit as the AI sees it.
//
// Identity and role are fixed at creation. Everything that changes during
// play lives in UnitStatus behind a Mutex, because cascades fired from
// other units' goal transitions flip the `producing` flag.

use std::sync::{Mutex, MutexGuard};

use kpai_goal::{Frame, Position};
use serde::{Deserialize, Serialize};

use crate::host::UnitId;

/// What a unit is for. A unit may hold several roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRole {
    /// Builds expansions in the field.
    pub constructor: bool,
    /// Factory that builds constructors.
    pub base: bool,
    /// Field structure a constructor puts up; finishing one completes the
    /// builder's expansion order.
    pub expansion: bool,
}

/// Mutable per-unit state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitStatus {
    pub complete: bool,
    pub killed: bool,
    /// An order that occupies the unit (an expansion build) is in flight.
    pub producing: bool,
    pub last_idle_frame: Option<Frame>,
    pub last_attacked_frame: Option<Frame>,
    /// Where the unit was when it finished building.
    pub position: Option<Position>,
}

pub struct Unit {
    pub id: UnitId,
    pub def_name: String,
    pub role: UnitRole,
    status: Mutex<UnitStatus>,
}

impl Unit {
    pub fn new(id: UnitId, def_name: impl Into<String>, role: UnitRole) -> Self {
        Self {
            id,
            def_name: def_name.into(),
            role,
            status: Mutex::new(UnitStatus::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, UnitStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current status.
    pub fn status(&self) -> UnitStatus {
        self.lock().clone()
    }

    pub fn is_producing(&self) -> bool {
        self.lock().producing
    }

    pub fn set_producing(&self, producing: bool) {
        self.lock().producing = producing;
    }

    /// The unit finished building at `position`.
    pub fn complete(&self, position: Position) {
        let mut status = self.lock();
        status.complete = true;
        status.position = Some(position);
    }

    pub fn destroy(&self) {
        self.lock().killed = true;
    }

    pub fn mark_idle(&self, frame: Frame) {
        self.lock().last_idle_frame = Some(frame);
    }

    pub fn mark_attacked(&self, frame: Frame) {
        self.lock().last_attacked_frame = Some(frame);
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("def_name", &self.def_name)
            .field("role", &self.role)
            .field("status", &self.status())
            .finish()
    }
}
