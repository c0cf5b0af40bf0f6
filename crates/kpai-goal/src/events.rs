// events.rs — Lifecycle event model and notification dispatch.
//
// The registry and the unit processors emit a GoalEvent at every
// observable lifecycle point. Sinks (a JSONL log file, an in-memory
// buffer for tests and the simulator) subscribe through an
// EventDispatcher.
//
// These events are for observers outside the AI. In-process reactions to
// a transition (cascades) use the per-goal listener lists in the
// registry instead, which fire synchronously and in order.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GoalError;
use crate::goal::{Frame, GoalId, GoalPhase, GoalType};

/// Events emitted at goal and agent lifecycle points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GoalEvent {
    /// A goal was inserted into the registry.
    GoalCreated {
        goal_id: GoalId,
        priority: i32,
        goal_type: GoalType,
        timestamp: DateTime<Utc>,
    },

    /// A goal changed phase.
    GoalTransitioned {
        goal_id: GoalId,
        from: GoalPhase,
        to: GoalPhase,
        timestamp: DateTime<Utc>,
    },

    /// A goal was erased from the registry.
    GoalRemoved {
        goal_id: GoalId,
        final_phase: GoalPhase,
        timestamp: DateTime<Utc>,
    },

    /// A goal passed its timeout frame and was aborted.
    GoalTimedOut {
        goal_id: GoalId,
        unit_id: u32,
        frame: Frame,
        timestamp: DateTime<Utc>,
    },

    /// A unit died; its processor dropped every goal on its stack.
    AgentDestroyed {
        unit_id: u32,
        goals_removed: Vec<GoalId>,
        timestamp: DateTime<Utc>,
    },

    /// A command was sent to the host for a unit.
    CommandIssued {
        unit_id: u32,
        goal_id: GoalId,
        command: String,
        timestamp: DateTime<Utc>,
    },
}

impl GoalEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            GoalEvent::GoalCreated { .. } => "goal_created",
            GoalEvent::GoalTransitioned { .. } => "goal_transitioned",
            GoalEvent::GoalRemoved { .. } => "goal_removed",
            GoalEvent::GoalTimedOut { .. } => "goal_timed_out",
            GoalEvent::AgentDestroyed { .. } => "agent_destroyed",
            GoalEvent::CommandIssued { .. } => "command_issued",
        }
    }

    pub fn goal_created(goal_id: GoalId, priority: i32, goal_type: GoalType) -> Self {
        GoalEvent::GoalCreated {
            goal_id,
            priority,
            goal_type,
            timestamp: Utc::now(),
        }
    }

    pub fn goal_transitioned(goal_id: GoalId, from: GoalPhase, to: GoalPhase) -> Self {
        GoalEvent::GoalTransitioned {
            goal_id,
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    pub fn goal_removed(goal_id: GoalId, final_phase: GoalPhase) -> Self {
        GoalEvent::GoalRemoved {
            goal_id,
            final_phase,
            timestamp: Utc::now(),
        }
    }

    pub fn goal_timed_out(goal_id: GoalId, unit_id: u32, frame: Frame) -> Self {
        GoalEvent::GoalTimedOut {
            goal_id,
            unit_id,
            frame,
            timestamp: Utc::now(),
        }
    }

    pub fn agent_destroyed(unit_id: u32, goals_removed: Vec<GoalId>) -> Self {
        GoalEvent::AgentDestroyed {
            unit_id,
            goals_removed,
            timestamp: Utc::now(),
        }
    }

    pub fn command_issued(unit_id: u32, goal_id: GoalId, command: impl Into<String>) -> Self {
        GoalEvent::CommandIssued {
            unit_id,
            goal_id,
            command: command.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Trait for receiving goal events.
///
/// Sinks are shared between the registry and every unit processor, which
/// may sit on different threads, hence `Send + Sync`.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the system.
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError>;
}

/// Appends events as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| GoalError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| GoalError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| GoalError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<GoalEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    pub fn events(&self) -> Vec<GoalEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of received events of the given type.
    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl NotificationSink for MemorySink {
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError> {
        self.events
            .lock()
            .map_err(|e| GoalError::NotificationError(format!("memory sink poisoned: {}", e)))?
            .push(event.clone());
        Ok(())
    }
}

// Lets callers keep a handle on a sink they also hand to the dispatcher.
impl<T: NotificationSink + ?Sized> NotificationSink for std::sync::Arc<T> {
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError> {
        (**self).send(event)
    }
}

/// Dispatches events to multiple sinks.
///
/// Errors from individual sinks are logged (via tracing) but don't
/// prevent other sinks from receiving the event.
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with no sinks.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a notification sink.
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Dispatch an event to all sinks.
    pub fn dispatch(&self, event: &GoalEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!("notification sink error: {}", e);
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn event_serialization_uses_snake_case_tag() {
        let event = GoalEvent::goal_created(GoalId(3), 5, GoalType::Move);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"goal_created\""));
        assert!(json.contains("\"goal_type\":\"move\""));

        let restored: GoalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.event_type(), "goal_created");
    }

    #[test]
    fn log_sink_appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let sink = LogSink::new(&path);

        sink.send(&GoalEvent::goal_created(GoalId(1), 0, GoalType::NoType))
            .unwrap();
        sink.send(&GoalEvent::goal_removed(GoalId(1), GoalPhase::Aborted))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("goal_removed"));
    }

    #[test]
    fn dispatcher_sends_to_all_sinks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let memory = Arc::new(MemorySink::new());

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(LogSink::new(&path)));
        dispatcher.add_sink(Box::new(Arc::clone(&memory)));

        dispatcher.dispatch(&GoalEvent::agent_destroyed(7, vec![GoalId(1), GoalId(2)]));

        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("agent_destroyed"));
        assert_eq!(memory.count("agent_destroyed"), 1);
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        struct Broken;
        impl NotificationSink for Broken {
            fn send(&self, _event: &GoalEvent) -> Result<(), GoalError> {
                Err(GoalError::NotificationError("down".into()))
            }
        }

        let memory = Arc::new(MemorySink::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(Broken));
        dispatcher.add_sink(Box::new(Arc::clone(&memory)));

        dispatcher.dispatch(&GoalEvent::goal_timed_out(GoalId(9), 4, 600));
        assert_eq!(memory.events().len(), 1);
    }
}
