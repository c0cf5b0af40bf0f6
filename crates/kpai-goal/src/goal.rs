// goal.rs — Goal: a single schedulable unit of intent.
//
// A Goal carries a type tag, a priority, a parameter payload, and a
// lifecycle phase. The phase machine is:
//
//   NotStarted → Executing → (Suspended ⇄ ToContinue → Executing)
//     → Completed | Aborted
//
// Completed and Aborted are the two FINISHED phases. Nothing leaves a
// finished phase. Lifecycle listeners live in the registry entry, not
// here, so a Goal is plain data that can be cloned out of the guarded
// table and handed to callers freely.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GoalError;

/// Simulation tick number.
pub type Frame = u64;

/// Process-unique goal identifier. Assigned monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub u64);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a goal asks its unit to do. The parameters are interpreted per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Attack,
    AttackArea,
    DefendArea,
    BuildConstructor,
    BuildUnit,
    BuildExpansion,
    BuildWeapon,
    Move,
    Retreat,
    NoType,
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalType::Attack => "attack",
            GoalType::AttackArea => "attack_area",
            GoalType::DefendArea => "defend_area",
            GoalType::BuildConstructor => "build_constructor",
            GoalType::BuildUnit => "build_unit",
            GoalType::BuildExpansion => "build_expansion",
            GoalType::BuildWeapon => "build_weapon",
            GoalType::Move => "move",
            GoalType::Retreat => "retreat",
            GoalType::NoType => "no_type",
        };
        f.write_str(name)
    }
}

/// A point in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One entry of a goal's parameter list.
///
/// `#[serde(untagged)]` keeps scenario files readable: `10`, `"socket"`
/// and `{ x = 1.0, y = 0.0, z = 2.0 }` all parse to the right variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GoalParam {
    Int(i64),
    Position(Position),
    Text(String),
}

impl GoalParam {
    fn tag(&self) -> &'static str {
        match self {
            GoalParam::Int(_) => "int",
            GoalParam::Position(_) => "position",
            GoalParam::Text(_) => "text",
        }
    }

    fn mismatch(&self, index: usize, expected: &'static str) -> GoalError {
        GoalError::ParamType {
            index,
            expected,
            found: self.tag(),
        }
    }

    pub fn as_int(&self, index: usize) -> Result<i64, GoalError> {
        match self {
            GoalParam::Int(v) => Ok(*v),
            other => Err(other.mismatch(index, "int")),
        }
    }

    pub fn as_position(&self, index: usize) -> Result<Position, GoalError> {
        match self {
            GoalParam::Position(p) => Ok(*p),
            other => Err(other.mismatch(index, "position")),
        }
    }

    pub fn as_text(&self, index: usize) -> Result<&str, GoalError> {
        match self {
            GoalParam::Text(s) => Ok(s),
            other => Err(other.mismatch(index, "text")),
        }
    }
}

impl From<Position> for GoalParam {
    fn from(p: Position) -> Self {
        GoalParam::Position(p)
    }
}

impl From<i64> for GoalParam {
    fn from(v: i64) -> Self {
        GoalParam::Int(v)
    }
}

impl From<&str> for GoalParam {
    fn from(s: &str) -> Self {
        GoalParam::Text(s.to_string())
    }
}

/// The lifecycle phase of a goal. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPhase {
    /// Created, never dispatched.
    NotStarted,
    /// Occupying (or about to occupy) its unit's action slot.
    Executing,
    /// Put aside by a higher-priority goal.
    Suspended,
    /// Asked to resume but not yet re-entered by the processor.
    ToContinue,
    /// FINISHED, successfully.
    Completed,
    /// FINISHED, cancelled.
    Aborted,
}

impl fmt::Display for GoalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalPhase::NotStarted => "not_started",
            GoalPhase::Executing => "executing",
            GoalPhase::Suspended => "suspended",
            GoalPhase::ToContinue => "to_continue",
            GoalPhase::Completed => "completed",
            GoalPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

impl GoalPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, GoalPhase::Completed | GoalPhase::Aborted)
    }

    /// Check whether `transition` is legal from this phase.
    ///
    /// Everything except `DoContinue` only requires "not finished";
    /// `DoContinue` requires the pending `ToContinue` phase.
    pub fn permits(self, transition: Transition) -> bool {
        match transition {
            Transition::DoContinue => self == GoalPhase::ToContinue,
            _ => !self.is_finished(),
        }
    }
}

/// A requested phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Start,
    Suspend,
    Continue,
    DoContinue,
    Complete,
    Abort,
}

impl Transition {
    /// The phase a goal lands in after this transition.
    pub fn target(self) -> GoalPhase {
        match self {
            Transition::Start | Transition::DoContinue => GoalPhase::Executing,
            Transition::Suspend => GoalPhase::Suspended,
            Transition::Continue => GoalPhase::ToContinue,
            Transition::Complete => GoalPhase::Completed,
            Transition::Abort => GoalPhase::Aborted,
        }
    }

    /// The signal fired by this transition. `DoContinue` is the silent
    /// second half of a resume: `Continue` already announced it.
    pub fn signal(self) -> Option<GoalSignal> {
        match self {
            Transition::Start => Some(GoalSignal::Start),
            Transition::Suspend => Some(GoalSignal::Suspend),
            Transition::Continue => Some(GoalSignal::Continue),
            Transition::DoContinue => None,
            Transition::Complete => Some(GoalSignal::Complete),
            Transition::Abort => Some(GoalSignal::Abort),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Start => "start",
            Transition::Suspend => "suspend",
            Transition::Continue => "continue",
            Transition::DoContinue => "do_continue",
            Transition::Complete => "complete",
            Transition::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// The lifecycle signal slots every goal exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSignal {
    Start,
    Suspend,
    Continue,
    Complete,
    Abort,
}

/// A goal's data. Instances live inside the registry; callers only ever
/// see clones taken under the registry guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,

    /// Higher value wins.
    pub priority: i32,

    pub goal_type: GoalType,

    #[serde(default)]
    pub params: Vec<GoalParam>,

    /// The goal that spawned this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<GoalId>,

    /// Goals chained to run after this one completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_goals: Vec<GoalId>,

    /// Absolute frame after which the goal is stale. `None` means never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_frame: Option<Frame>,

    pub phase: GoalPhase,
}

impl Goal {
    pub(crate) fn new(id: GoalId, priority: i32, goal_type: GoalType) -> Self {
        Self {
            id,
            priority,
            goal_type,
            params: Vec::new(),
            parent: None,
            next_goals: Vec::new(),
            timeout_frame: None,
            phase: GoalPhase::NotStarted,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_finished()
    }

    pub fn is_executing(&self) -> bool {
        self.phase == GoalPhase::Executing
    }

    /// True when the goal has a timeout and `frame` has reached it.
    pub fn is_expired(&self, frame: Frame) -> bool {
        self.timeout_frame.is_some_and(|t| t <= frame)
    }

    /// Parameter at `index`, or `MissingParam`.
    pub fn param(&self, index: usize) -> Result<&GoalParam, GoalError> {
        self.params
            .get(index)
            .ok_or(GoalError::MissingParam { index })
    }

    /// Shorthand for the common "first parameter is a position" layout.
    pub fn position_param(&self, index: usize) -> Result<Position, GoalError> {
        self.param(index)?.as_position(index)
    }

    /// Apply `transition` to the phase, enforcing the precondition.
    pub(crate) fn apply(&mut self, transition: Transition) -> Result<GoalPhase, GoalError> {
        if !self.phase.permits(transition) {
            return Err(GoalError::InvalidTransition {
                goal_id: self.id,
                from: self.phase.to_string(),
                to: transition.to_string(),
            });
        }
        let previous = self.phase;
        self.phase = transition.target();
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_goal() -> Goal {
        Goal::new(GoalId(1), 5, GoalType::Move)
    }

    #[test]
    fn new_goal_starts_not_started() {
        let g = test_goal();
        assert_eq!(g.phase, GoalPhase::NotStarted);
        assert!(!g.is_finished());
        assert!(!g.is_executing());
        assert!(g.parent.is_none());
        assert!(g.timeout_frame.is_none());
    }

    #[test]
    fn suspend_continue_resume_cycle() {
        let mut g = test_goal();
        g.apply(Transition::Start).unwrap();
        g.apply(Transition::Suspend).unwrap();
        assert_eq!(g.phase, GoalPhase::Suspended);
        g.apply(Transition::Continue).unwrap();
        assert_eq!(g.phase, GoalPhase::ToContinue);
        g.apply(Transition::DoContinue).unwrap();
        assert!(g.is_executing());
    }

    #[test]
    fn do_continue_requires_to_continue() {
        let mut g = test_goal();
        g.apply(Transition::Start).unwrap();
        let result = g.apply(Transition::DoContinue);
        assert!(matches!(result, Err(GoalError::InvalidTransition { .. })));
        assert!(g.is_executing());
    }

    #[test]
    fn finished_goal_rejects_everything() {
        let mut g = test_goal();
        g.apply(Transition::Complete).unwrap();
        for t in [
            Transition::Start,
            Transition::Suspend,
            Transition::Continue,
            Transition::DoContinue,
            Transition::Complete,
            Transition::Abort,
        ] {
            assert!(g.apply(t).is_err(), "{} accepted on finished goal", t);
            assert_eq!(g.phase, GoalPhase::Completed);
        }
    }

    #[test]
    fn expiry_is_inclusive() {
        let mut g = test_goal();
        assert!(!g.is_expired(u64::MAX));
        g.timeout_frame = Some(300);
        assert!(!g.is_expired(299));
        assert!(g.is_expired(300));
        assert!(g.is_expired(301));
    }

    #[test]
    fn param_accessors_report_tag_mismatch() {
        let mut g = test_goal();
        g.params.push(GoalParam::Text("socket".into()));
        g.params.push(Position::new(10.0, 0.0, 10.0).into());

        assert_eq!(g.param(0).unwrap().as_text(0).unwrap(), "socket");
        assert_eq!(g.position_param(1).unwrap(), Position::new(10.0, 0.0, 10.0));

        let err = g.position_param(0).unwrap_err();
        assert!(matches!(
            err,
            GoalError::ParamType {
                index: 0,
                expected: "position",
                found: "text"
            }
        ));
        assert!(matches!(
            g.param(2),
            Err(GoalError::MissingParam { index: 2 })
        ));
    }

    #[test]
    fn params_parse_untagged_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            params: Vec<GoalParam>,
        }
        let w: Wrapper =
            toml::from_str("params = [7, \"port\", { x = 1.0, y = 0.0, z = 2.0 }]").unwrap();
        assert_eq!(w.params[0], GoalParam::Int(7));
        assert_eq!(w.params[1], GoalParam::Text("port".into()));
        assert_eq!(w.params[2], GoalParam::Position(Position::new(1.0, 0.0, 2.0)));
    }

    #[test]
    fn display_formats() {
        assert_eq!(GoalId(42).to_string(), "#42");
        assert_eq!(GoalType::BuildExpansion.to_string(), "build_expansion");
        assert_eq!(GoalPhase::ToContinue.to_string(), "to_continue");
    }
}
