// scenario.rs — Scripted host events and goal assignments.
//
// A scenario is a TOML file with two arrays of tables:
//
//   [[event]]            a host event delivered at `frame`
//   frame = 0
//   type = "unit_created"
//   unit = 1
//   def_name = "kernel"
//
//   [[goal]]             a goal assigned to a unit at `frame`
//   frame = 0
//   unit = 1
//   priority = 10
//   type = "build_constructor"
//   params = [{ x = 1.0, y = 0.0, z = 2.0 }]
//
// Frame ticks are generated by the replay itself. A scripted `frame`
// event cannot parse: the entry's own `frame` key shadows the event's.

use std::path::Path;

use anyhow::{Context, Result};
use kpai_agent::{HostEvent, UnitId};
use kpai_goal::{Frame, GoalParam, GoalType};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "event")]
    pub events: Vec<ScheduledEvent>,

    #[serde(default, rename = "goal")]
    pub goals: Vec<ScheduledGoal>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledEvent {
    pub frame: Frame,
    #[serde(flatten)]
    pub event: HostEvent,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledGoal {
    pub frame: Frame,
    pub unit: UnitId,
    #[serde(default)]
    pub priority: i32,
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    #[serde(default)]
    pub params: Vec<GoalParam>,
    /// Frames after assignment before the goal times out.
    #[serde(default)]
    pub timeout: Option<Frame>,
}

impl Scenario {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid scenario {}", path.display()))
    }

    /// Frame of the last scripted entry.
    pub fn last_frame(&self) -> Frame {
        let events = self.events.iter().map(|e| e.frame);
        let goals = self.goals.iter().map(|g| g.frame);
        events.chain(goals).max().unwrap_or(0)
    }

    /// Host events due at `frame`, in file order.
    pub fn events_at(&self, frame: Frame) -> impl Iterator<Item = &HostEvent> {
        self.events
            .iter()
            .filter(move |e| e.frame == frame)
            .map(|e| &e.event)
    }

    /// Goal assignments due at `frame`, in file order.
    pub fn goals_at(&self, frame: Frame) -> impl Iterator<Item = &ScheduledGoal> {
        self.goals.iter().filter(move |g| g.frame == frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpai_goal::Position;
    use tempfile::tempdir;

    #[test]
    fn parses_events_and_goals() {
        let scenario = Scenario::parse(
            r#"
name = "tiny"

[[event]]
frame = 0
type = "unit_created"
unit = 1
def_name = "kernel"

[[event]]
frame = 5
type = "unit_finished"
unit = 1
position = { x = 1.0, y = 0.0, z = 2.0 }

[[goal]]
frame = 5
unit = 1
priority = 3
type = "move"
params = [{ x = 4.0, y = 0.0, z = 4.0 }, "spare", 7]
timeout = 60
"#,
        )
        .unwrap();

        assert_eq!(scenario.name.as_deref(), Some("tiny"));
        assert_eq!(scenario.last_frame(), 5);
        assert_eq!(scenario.events_at(0).count(), 1);
        assert!(matches!(
            scenario.events_at(5).next(),
            Some(HostEvent::UnitFinished { unit: UnitId(1), .. })
        ));

        let goal = scenario.goals_at(5).next().unwrap();
        assert_eq!(goal.goal_type, GoalType::Move);
        assert_eq!(goal.timeout, Some(60));
        assert_eq!(
            goal.params,
            vec![
                GoalParam::Position(Position::new(4.0, 0.0, 4.0)),
                GoalParam::Text("spare".into()),
                GoalParam::Int(7),
            ]
        );
    }

    #[test]
    fn scripted_frame_event_is_rejected() {
        assert!(Scenario::parse("[[event]]\nframe = 30\ntype = \"frame\"\n").is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[[goal]]\nunit = 1\n").unwrap();
        let err = Scenario::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }
}
