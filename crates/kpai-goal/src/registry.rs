// registry.rs — GoalRegistry: the exclusive owner of every Goal.
//
// All goals live in one table keyed by GoalId behind a Mutex. Every read
// and every write takes the guard; nothing hands out a reference that
// outlives it. Callers get clones (`Goal` is plain data) or keep ids and
// re-resolve them.
//
// Lifecycle listeners are stored next to each goal. A transition runs in
// three steps:
//
//   1. lock, check the precondition, change the phase, snapshot the goal
//      and clone the listener list, unlock
//   2. dispatch a GoalEvent to the notification sinks
//   3. invoke the snapshot listeners in registration order
//
// Because the guard is released before step 3, a listener may freely call
// back into the registry (remove or complete another goal, even this one)
// without deadlocking, and a listener that connects or disconnects other
// listeners mid-dispatch does not disturb the list being iterated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::error::GoalError;
use crate::events::{EventDispatcher, GoalEvent};
use crate::goal::{Frame, Goal, GoalId, GoalParam, GoalSignal, GoalType, Transition};

/// A lifecycle callback. Receives a snapshot of the goal taken right after
/// the transition.
pub type Listener = Arc<dyn Fn(&Goal) + Send + Sync>;

/// Handle returned by `connect`, used to disconnect a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// One counter per process so ids stay unique even across registries.
static NEXT_GOAL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: OnceLock<Arc<GoalRegistry>> = OnceLock::new();

#[derive(Default)]
struct Signals {
    start: Vec<(ListenerId, Listener)>,
    suspend: Vec<(ListenerId, Listener)>,
    resume: Vec<(ListenerId, Listener)>,
    complete: Vec<(ListenerId, Listener)>,
    abort: Vec<(ListenerId, Listener)>,
}

impl Signals {
    fn slot_mut(&mut self, signal: GoalSignal) -> &mut Vec<(ListenerId, Listener)> {
        match signal {
            GoalSignal::Start => &mut self.start,
            GoalSignal::Suspend => &mut self.suspend,
            GoalSignal::Continue => &mut self.resume,
            GoalSignal::Complete => &mut self.complete,
            GoalSignal::Abort => &mut self.abort,
        }
    }

    fn snapshot(&mut self, signal: GoalSignal) -> Vec<Listener> {
        self.slot_mut(signal)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}

pub(crate) struct Entry {
    pub(crate) goal: Goal,
    signals: Signals,
}

/// The process-wide goal table.
pub struct GoalRegistry {
    table: Mutex<HashMap<GoalId, Entry>>,
    dispatcher: EventDispatcher,
}

impl GoalRegistry {
    /// An empty registry with no notification sinks.
    pub fn new() -> Self {
        Self::with_dispatcher(EventDispatcher::new())
    }

    /// An empty registry that reports lifecycle events to `dispatcher`.
    pub fn with_dispatcher(dispatcher: EventDispatcher) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            dispatcher,
        }
    }

    /// The shared registry used when the embedder does not bring its own.
    pub fn global() -> Arc<GoalRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(GoalRegistry::new())))
    }

    pub(crate) fn table(&self) -> MutexGuard<'_, HashMap<GoalId, Entry>> {
        self.table.lock().unwrap_or_else(|poisoned| {
            // The table is a plain map; a panic elsewhere cannot leave it
            // half-updated.
            tracing::warn!("goal registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Send an event to this registry's notification sinks. Unit
    /// processors use this for timeouts, commands and agent deaths so all
    /// lifecycle events land in one stream.
    pub fn emit(&self, event: GoalEvent) {
        if !self.dispatcher.is_empty() {
            self.dispatcher.dispatch(&event);
        }
    }

    // ── Creation and lookup ──────────────────────────────────────

    /// Create a goal and return its fresh id.
    pub fn create(&self, priority: i32, goal_type: GoalType) -> GoalId {
        self.create_with_params(priority, goal_type, Vec::new())
    }

    /// Create a `NoType` goal at priority 0.
    pub fn create_default(&self) -> GoalId {
        self.create(0, GoalType::NoType)
    }

    /// Create a goal with its parameter payload already attached.
    pub fn create_with_params(
        &self,
        priority: i32,
        goal_type: GoalType,
        params: Vec<GoalParam>,
    ) -> GoalId {
        let id = GoalId(NEXT_GOAL_ID.fetch_add(1, Ordering::Relaxed));
        let mut goal = Goal::new(id, priority, goal_type);
        goal.params = params;
        self.table().insert(
            id,
            Entry {
                goal,
                signals: Signals::default(),
            },
        );
        tracing::debug!("created goal {} ({}, priority {})", id, goal_type, priority);
        self.emit(GoalEvent::goal_created(id, priority, goal_type));
        id
    }

    /// Snapshot of a goal, or `None` if it was never created or was removed.
    pub fn get(&self, id: GoalId) -> Option<Goal> {
        self.table().get(&id).map(|e| e.goal.clone())
    }

    pub fn contains(&self, id: GoalId) -> bool {
        self.table().contains_key(&id)
    }

    /// Snapshots of every goal, ordered by id.
    pub fn list(&self) -> Vec<Goal> {
        let mut goals: Vec<Goal> = self.table().values().map(|e| e.goal.clone()).collect();
        goals.sort_by_key(|g| g.id);
        goals
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    // ── Data mutation (never touches the phase) ──────────────────

    fn modify<R>(&self, id: GoalId, f: impl FnOnce(&mut Goal) -> R) -> Result<R, GoalError> {
        let mut table = self.table();
        let entry = table.get_mut(&id).ok_or(GoalError::NotFound(id))?;
        Ok(f(&mut entry.goal))
    }

    pub fn set_priority(&self, id: GoalId, priority: i32) -> Result<(), GoalError> {
        self.modify(id, |g| g.priority = priority)
    }

    pub fn add_param(&self, id: GoalId, param: impl Into<GoalParam>) -> Result<(), GoalError> {
        let param = param.into();
        self.modify(id, |g| g.params.push(param))
    }

    pub fn set_parent(&self, id: GoalId, parent: Option<GoalId>) -> Result<(), GoalError> {
        self.modify(id, |g| g.parent = parent)
    }

    pub fn push_next_goal(&self, id: GoalId, next: GoalId) -> Result<(), GoalError> {
        self.modify(id, |g| g.next_goals.push(next))
    }

    pub fn set_timeout(&self, id: GoalId, timeout_frame: Option<Frame>) -> Result<(), GoalError> {
        self.modify(id, |g| g.timeout_frame = timeout_frame)
    }

    // ── Lifecycle signals ────────────────────────────────────────

    /// Subscribe `listener` to one of the goal's signals. Listeners fire in
    /// the order they were connected.
    pub fn connect(
        &self,
        id: GoalId,
        signal: GoalSignal,
        listener: Listener,
    ) -> Result<ListenerId, GoalError> {
        let listener_id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        let mut table = self.table();
        let entry = table.get_mut(&id).ok_or(GoalError::NotFound(id))?;
        entry.signals.slot_mut(signal).push((listener_id, listener));
        Ok(listener_id)
    }

    /// Remove a listener. Returns false if it (or the goal) is gone.
    pub fn disconnect(&self, id: GoalId, signal: GoalSignal, listener_id: ListenerId) -> bool {
        let mut table = self.table();
        let Some(entry) = table.get_mut(&id) else {
            return false;
        };
        let slot = entry.signals.slot_mut(signal);
        let before = slot.len();
        slot.retain(|(lid, _)| *lid != listener_id);
        slot.len() != before
    }

    pub fn on_start(
        &self,
        id: GoalId,
        f: impl Fn(&Goal) + Send + Sync + 'static,
    ) -> Result<ListenerId, GoalError> {
        self.connect(id, GoalSignal::Start, Arc::new(f))
    }

    pub fn on_suspend(
        &self,
        id: GoalId,
        f: impl Fn(&Goal) + Send + Sync + 'static,
    ) -> Result<ListenerId, GoalError> {
        self.connect(id, GoalSignal::Suspend, Arc::new(f))
    }

    pub fn on_continue(
        &self,
        id: GoalId,
        f: impl Fn(&Goal) + Send + Sync + 'static,
    ) -> Result<ListenerId, GoalError> {
        self.connect(id, GoalSignal::Continue, Arc::new(f))
    }

    pub fn on_complete(
        &self,
        id: GoalId,
        f: impl Fn(&Goal) + Send + Sync + 'static,
    ) -> Result<ListenerId, GoalError> {
        self.connect(id, GoalSignal::Complete, Arc::new(f))
    }

    pub fn on_abort(
        &self,
        id: GoalId,
        f: impl Fn(&Goal) + Send + Sync + 'static,
    ) -> Result<ListenerId, GoalError> {
        self.connect(id, GoalSignal::Abort, Arc::new(f))
    }

    // ── Phase transitions ────────────────────────────────────────

    /// Apply `transition` to goal `id` and fire its listeners.
    ///
    /// Transitioning a finished goal (or `DoContinue` outside
    /// `ToContinue`) is a programming error: debug builds panic, release
    /// builds log it and return `InvalidTransition` with the goal
    /// untouched. Use [`transition_if_unfinished`](Self::transition_if_unfinished)
    /// when "already finished" is an expected outcome.
    pub fn transition(&self, id: GoalId, transition: Transition) -> Result<Goal, GoalError> {
        match self.apply_transition(id, transition, false)? {
            Some(goal) => Ok(goal),
            // Unreachable: only the lenient path returns None.
            None => Err(GoalError::NotFound(id)),
        }
    }

    /// Like [`transition`](Self::transition) but returns `Ok(None)` without
    /// complaint when the goal is already finished. Checked under the same
    /// guard as the phase change, so there is no check-then-act window.
    pub fn transition_if_unfinished(
        &self,
        id: GoalId,
        transition: Transition,
    ) -> Result<Option<Goal>, GoalError> {
        self.apply_transition(id, transition, true)
    }

    fn apply_transition(
        &self,
        id: GoalId,
        transition: Transition,
        lenient: bool,
    ) -> Result<Option<Goal>, GoalError> {
        let (from, snapshot, listeners) = {
            let mut table = self.table();
            let entry = table.get_mut(&id).ok_or(GoalError::NotFound(id))?;
            if lenient && entry.goal.is_finished() {
                return Ok(None);
            }
            match entry.goal.apply(transition) {
                Ok(from) => {
                    let listeners = match transition.signal() {
                        Some(signal) => entry.signals.snapshot(signal),
                        None => Vec::new(),
                    };
                    (from, entry.goal.clone(), listeners)
                }
                Err(err) => {
                    drop(table);
                    tracing::error!("rejected goal transition: {}", err);
                    debug_assert!(false, "precondition violated: {}", err);
                    return Err(err);
                }
            }
        };

        self.emit(GoalEvent::goal_transitioned(id, from, snapshot.phase));
        for listener in &listeners {
            listener(&snapshot);
        }
        Ok(Some(snapshot))
    }

    pub fn start(&self, id: GoalId) -> Result<Goal, GoalError> {
        self.transition(id, Transition::Start)
    }

    pub fn suspend(&self, id: GoalId) -> Result<Goal, GoalError> {
        self.transition(id, Transition::Suspend)
    }

    /// Mark the goal `ToContinue`: resumption requested, not yet re-entered.
    pub fn continue_goal(&self, id: GoalId) -> Result<Goal, GoalError> {
        self.transition(id, Transition::Continue)
    }

    /// Re-enter a `ToContinue` goal as `Executing`.
    pub fn do_continue(&self, id: GoalId) -> Result<Goal, GoalError> {
        self.transition(id, Transition::DoContinue)
    }

    pub fn complete(&self, id: GoalId) -> Result<Goal, GoalError> {
        self.transition(id, Transition::Complete)
    }

    pub fn abort(&self, id: GoalId) -> Result<Goal, GoalError> {
        self.transition(id, Transition::Abort)
    }

    // ── Removal ──────────────────────────────────────────────────

    /// Erase a goal. An unfinished goal is aborted first, so every
    /// listener sees a terminal transition before the id goes dark.
    ///
    /// Returns the goal's final state.
    pub fn remove(&self, id: GoalId) -> Result<Goal, GoalError> {
        let aborted = self.transition_if_unfinished(id, Transition::Abort)?;

        let erased = self.table().remove(&id).map(|e| e.goal);
        match (erased, aborted) {
            (Some(goal), _) => {
                tracing::debug!("removed goal {} ({})", id, goal.phase);
                self.emit(GoalEvent::goal_removed(id, goal.phase));
                Ok(goal)
            }
            // An abort listener already removed it.
            (None, Some(goal)) => Ok(goal),
            (None, None) => Err(GoalError::NotFound(id)),
        }
    }

    /// Abort every goal in `ids` whose timeout frame is at or before
    /// `frame`. Returns the ids that were aborted by this call.
    pub fn abort_expired(&self, ids: &[GoalId], frame: Frame) -> Vec<GoalId> {
        let expired: Vec<GoalId> = {
            let table = self.table();
            ids.iter()
                .copied()
                .filter(|id| {
                    table
                        .get(id)
                        .is_some_and(|e| !e.goal.is_finished() && e.goal.is_expired(frame))
                })
                .collect()
        };

        expired
            .into_iter()
            .filter(|id| {
                matches!(
                    self.transition_if_unfinished(*id, Transition::Abort),
                    Ok(Some(_))
                )
            })
            .collect()
    }
}

impl Default for GoalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
