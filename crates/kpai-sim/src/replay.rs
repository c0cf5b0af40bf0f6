// replay.rs — Drives a TeamAi through a scenario, one frame at a time.
//
// Per frame: scripted host events first (file order), then scripted goal
// assignments, then the frame tick. Entries the controller rejects are
// logged and counted, never fatal.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use kpai_agent::{
    AiConfig, AiContext, Command, RecordingSink, StaticConfig, TeamAi, UnitId,
};
use kpai_goal::{EventDispatcher, Frame, GoalRegistry, LogSink, MemorySink};

use crate::scenario::Scenario;

pub struct Replay {
    team: TeamAi,
    commands: Arc<RecordingSink>,
    events: Arc<MemorySink>,
    update_interval: Frame,
}

/// What a finished run left behind.
#[derive(Debug)]
pub struct Summary {
    pub frames: Frame,
    pub commands: Vec<(UnitId, Command)>,
    pub goals_remaining: usize,
    pub units_alive: usize,
    pub rejected: usize,
    pub events_by_type: BTreeMap<String, usize>,
}

impl Replay {
    /// Build a team with a private registry. Lifecycle events go to memory
    /// and, if `events_log` is set, to a JSONL file.
    pub fn new(config: AiConfig, events_log: Option<&Path>) -> Self {
        let events = Arc::new(MemorySink::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(Arc::clone(&events)));
        if let Some(path) = events_log {
            dispatcher.add_sink(Box::new(LogSink::new(path)));
        }

        let registry = Arc::new(GoalRegistry::with_dispatcher(dispatcher));
        let commands = Arc::new(RecordingSink::new());
        let provider = Arc::new(StaticConfig::new(config.tunables.clone()));
        let update_interval = config.scheduler.update_interval;
        let ctx = AiContext::new(registry, commands.clone(), config);

        Self {
            team: TeamAi::new(ctx, provider),
            commands,
            events,
            update_interval,
        }
    }

    /// Frames to run when none are given: one scheduling interval past the
    /// last scripted entry, so the final entries get a pass.
    pub fn default_frames(&self, scenario: &Scenario) -> Frame {
        scenario.last_frame() + self.update_interval
    }

    /// Replay frames `0..=frames`.
    pub fn run(&mut self, scenario: &Scenario, frames: Frame) -> Summary {
        let mut rejected = 0;
        for frame in 0..=frames {
            for event in scenario.events_at(frame) {
                if let Err(e) = self.team.handle(event.clone()) {
                    tracing::warn!("frame {}: rejected {:?}: {}", frame, event, e);
                    rejected += 1;
                }
            }

            for goal in scenario.goals_at(frame) {
                let assigned = self.team.assign_goal(
                    goal.unit,
                    goal.priority,
                    goal.goal_type,
                    goal.params.clone(),
                );
                match assigned {
                    Ok(id) => {
                        if let Some(timeout) = goal.timeout {
                            if let Err(e) =
                                self.team.registry().set_timeout(id, Some(frame + timeout))
                            {
                                tracing::warn!("frame {}: {}", frame, e);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("frame {}: goal for unit {} rejected: {}", frame, goal.unit, e);
                        rejected += 1;
                    }
                }
            }

            self.team.update(frame);
        }

        let mut events_by_type = BTreeMap::new();
        for event in self.events.events() {
            *events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }

        Summary {
            frames,
            commands: self.commands.issued(),
            goals_remaining: self.team.registry().len(),
            units_alive: self.team.unit_count(),
            rejected,
            events_by_type,
        }
    }
}
