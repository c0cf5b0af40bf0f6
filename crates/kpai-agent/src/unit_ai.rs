// unit_ai.rs — UnitAi: the per-unit goal processor.
//
// Each finished unit gets one UnitAi. It holds an ordered stack of goal
// ids and a "current goal" (the goal occupying the unit's action slot).
// It never owns goals: every id is re-resolved through the registry,
// because cascades from other units can remove goals at any time.
//
// On every scheduled frame (frame % update_interval == 0) a pass runs:
//
//   1. chained follow-up goals from last pass join the stack
//   2. sort the stack by priority, highest first
//   3. dump the stack to the debug log
//   4. abort goals whose timeout frame has passed
//   5. walk the stack from the top: each candidate is either popped
//      (finished, missing, malformed, unsupported) and the walk continues,
//      or the walk stops (something is running, or a goal was dispatched)
//
// The processor's own state sits behind Arc<Mutex<..>> so that cascades
// attached to goals can clear the current goal from whichever thread
// completes the goal. The lock is never held across a registry call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use kpai_goal::{
    attach, Cascade, Frame, Goal, GoalError, GoalEvent, GoalId, GoalPhase, GoalRegistry,
    GoalSignal, GoalType, Transition,
};

use crate::config::AiConfig;
use crate::host::{Command, CommandSink, UnitId};
use crate::unit::Unit;

/// Everything a processor needs from its surroundings.
#[derive(Clone)]
pub struct AiContext {
    pub registry: Arc<GoalRegistry>,
    pub commands: Arc<dyn CommandSink>,
    pub config: Arc<AiConfig>,
}

impl AiContext {
    pub fn new(
        registry: Arc<GoalRegistry>,
        commands: Arc<dyn CommandSink>,
        config: AiConfig,
    ) -> Self {
        Self {
            registry,
            commands,
            config: Arc::new(config),
        }
    }
}

/// What to do with the candidate at the top of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessDecision {
    /// Drop it from the stack and look at the next one.
    PopContinue,
    /// Stop this pass.
    Break,
}

#[derive(Debug, Default)]
struct ProcessorState {
    current_goal: Option<GoalId>,
}

fn lock_state(state: &Mutex<ProcessorState>) -> MutexGuard<'_, ProcessorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Callback for the "agent destroyed" signal.
pub type KilledListener = Arc<dyn Fn(UnitId) + Send + Sync>;

pub struct UnitAi {
    unit_id: UnitId,
    owner: Option<Arc<Unit>>,
    ctx: AiContext,
    goals: Vec<GoalId>,
    /// Follow-ups of goals completed last pass, pushed at the next one.
    chained: Vec<GoalId>,
    /// Goals that already carry this processor's slot cascades.
    cascaded: HashSet<GoalId>,
    state: Arc<Mutex<ProcessorState>>,
    on_killed: Vec<KilledListener>,
}

impl UnitAi {
    pub fn new(owner: Arc<Unit>, ctx: AiContext) -> Self {
        Self {
            unit_id: owner.id,
            owner: Some(owner),
            ctx,
            goals: Vec::new(),
            chained: Vec::new(),
            cascaded: HashSet::new(),
            state: Arc::new(Mutex::new(ProcessorState::default())),
            on_killed: Vec::new(),
        }
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// The owning unit, or `None` once the unit has been destroyed.
    pub fn owner(&self) -> Option<&Arc<Unit>> {
        self.owner.as_ref()
    }

    pub fn is_detached(&self) -> bool {
        self.owner.is_none()
    }

    /// The goal stack, in the order of the last sort.
    pub fn goals(&self) -> &[GoalId] {
        &self.goals
    }

    /// Chained follow-up goals waiting for the next pass.
    pub fn pending_chained(&self) -> &[GoalId] {
        &self.chained
    }

    pub fn current_goal(&self) -> Option<GoalId> {
        lock_state(&self.state).current_goal
    }

    fn set_current_goal(&self, id: Option<GoalId>) {
        lock_state(&self.state).current_goal = id;
    }

    /// Snapshot of the current goal, if it is still in the registry.
    pub fn current_goal_snapshot(&self) -> Option<Goal> {
        self.current_goal().and_then(|id| self.ctx.registry.get(id))
    }

    /// Put a goal on this unit's stack. Pushing an id twice is a no-op.
    pub fn push_goal(&mut self, id: GoalId) {
        if !self.goals.contains(&id) {
            self.goals.push(id);
        }
    }

    /// Subscribe to the "agent destroyed" signal.
    pub fn on_killed(&mut self, f: impl Fn(UnitId) + Send + Sync + 'static) {
        self.on_killed.push(Arc::new(f));
    }

    // ── Scheduling ───────────────────────────────────────────────

    /// Host tick. Runs a pass only on scheduled frames.
    pub fn update(&mut self, frame: Frame) {
        if self.owner.is_none() {
            tracing::warn!("update on detached processor of unit {}", self.unit_id);
            return;
        }
        let interval = self.ctx.config.scheduler.update_interval.max(1);
        if frame % interval == 0 {
            self.process_goal_stack(frame);
        }
    }

    /// One full pass over the stack, regardless of cadence.
    pub fn process_goal_stack(&mut self, frame: Frame) {
        let Some(owner) = self.owner.clone() else {
            return;
        };

        for id in std::mem::take(&mut self.chained) {
            self.push_goal(id);
        }
        self.ctx.registry.sort_by_priority(&mut self.goals);
        tracing::debug!("{}", self.dump_goal_stack("Unit"));
        self.expire_goals(frame);

        while let Some(&top) = self.goals.first() {
            let goal = self.ctx.registry.get(top);
            match self.process_goal(&owner, goal.as_ref()) {
                ProcessDecision::PopContinue => {
                    self.goals.remove(0);
                    self.cascaded.remove(&top);
                    if let Some(goal) = goal {
                        if goal.phase == GoalPhase::Completed {
                            self.chained.extend(goal.next_goals);
                        }
                    }
                }
                ProcessDecision::Break => break,
            }
        }
    }

    fn expire_goals(&mut self, frame: Frame) {
        for id in self.ctx.registry.abort_expired(&self.goals, frame) {
            tracing::info!(
                "goal {} on unit {} timed out at frame {}",
                id,
                self.unit_id,
                frame
            );
            self.ctx
                .registry
                .emit(GoalEvent::goal_timed_out(id, self.unit_id.0, frame));
            if self.current_goal() == Some(id) {
                self.set_current_goal(None);
            }
        }
    }

    /// Decide what to do with one candidate.
    fn process_goal(&mut self, owner: &Arc<Unit>, goal: Option<&Goal>) -> ProcessDecision {
        let Some(goal) = goal else {
            return ProcessDecision::PopContinue;
        };
        if goal.is_finished() {
            return ProcessDecision::PopContinue;
        }

        // Lower or equal priority never preempts a running goal.
        if let Some(current) = self.current_goal_snapshot() {
            if current.is_executing() && current.priority >= goal.priority {
                return ProcessDecision::Break;
            }
        }

        if goal.is_executing() {
            return ProcessDecision::Break;
        }

        tracing::info!(
            "executing goal {} ({}) on unit {}",
            goal.id,
            goal.goal_type,
            self.unit_id
        );

        match goal.goal_type {
            GoalType::BuildExpansion => self.execute_build_expansion(owner, goal),
            GoalType::BuildConstructor => self.execute_build_constructor(owner, goal),
            GoalType::Move | GoalType::Retreat => self.execute_move(goal),
            _ => ProcessDecision::PopContinue,
        }
    }

    fn execute_build_expansion(&mut self, owner: &Arc<Unit>, goal: &Goal) -> ProcessDecision {
        if !owner.role.constructor {
            tracing::error!(
                "build_expansion goal {} issued to non-constructor unit {} ({})",
                goal.id,
                owner.id,
                owner.def_name
            );
            return ProcessDecision::PopContinue;
        }
        let target = match goal.position_param(0) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!("build_expansion goal {} has no site: {}", goal.id, e);
                return ProcessDecision::PopContinue;
            }
        };
        let Some(unit_def) = self.ctx.config.roles.expansion_for(&owner.def_name) else {
            tracing::error!(
                "no expansion known for constructor {} ({})",
                owner.id,
                owner.def_name
            );
            return ProcessDecision::PopContinue;
        };
        let command = Command::Build {
            unit_def: unit_def.to_string(),
            at: Some(target),
        };

        self.preempt_current(goal.id);
        self.issue(goal.id, command);
        self.attach_slot_cascades(owner, goal.id);
        owner.set_producing(true);
        if !self.enter(goal) {
            owner.set_producing(false);
            return ProcessDecision::PopContinue;
        }
        self.set_current_goal(Some(goal.id));
        ProcessDecision::Break
    }

    fn execute_build_constructor(&mut self, owner: &Arc<Unit>, goal: &Goal) -> ProcessDecision {
        if !owner.role.base {
            tracing::error!(
                "build_constructor goal {} issued to non-base unit {} ({})",
                goal.id,
                owner.id,
                owner.def_name
            );
            return ProcessDecision::PopContinue;
        }
        if goal.is_executing() {
            return ProcessDecision::Break;
        }
        let Some(unit_def) = self.ctx.config.roles.constructor_for(&owner.def_name) else {
            tracing::error!(
                "no constructor known for base {} ({})",
                owner.id,
                owner.def_name
            );
            return ProcessDecision::PopContinue;
        };
        self.issue(
            goal.id,
            Command::Build {
                unit_def: unit_def.to_string(),
                at: None,
            },
        );
        // The factory gives no progress signal for the queued unit, so the
        // goal is done as soon as the order is out.
        if let Err(e) = self
            .ctx
            .registry
            .transition_if_unfinished(goal.id, Transition::Complete)
        {
            tracing::warn!("could not complete goal {}: {}", goal.id, e);
        }
        ProcessDecision::Break
    }

    fn execute_move(&mut self, goal: &Goal) -> ProcessDecision {
        let target = match goal.position_param(0) {
            Ok(target) => target,
            Err(GoalError::MissingParam { .. }) => {
                tracing::error!("no params on {} goal {}", goal.goal_type, goal.id);
                return ProcessDecision::PopContinue;
            }
            Err(e) => {
                tracing::error!("invalid param on {} goal {}: {}", goal.goal_type, goal.id, e);
                return ProcessDecision::PopContinue;
            }
        };

        self.preempt_current(goal.id);
        self.issue(goal.id, Command::Move { target });
        if !self.enter(goal) {
            return ProcessDecision::PopContinue;
        }
        self.set_current_goal(Some(goal.id));
        ProcessDecision::Break
    }

    fn issue(&self, goal_id: GoalId, command: Command) {
        let description = command.to_string();
        self.ctx.commands.issue_command(self.unit_id, command);
        self.ctx
            .registry
            .emit(GoalEvent::command_issued(self.unit_id.0, goal_id, description));
    }

    /// Suspend the running goal that `candidate` is about to displace.
    fn preempt_current(&self, candidate: GoalId) {
        let Some(current) = self.current_goal_snapshot() else {
            return;
        };
        if current.id == candidate || !current.is_executing() {
            return;
        }
        match self
            .ctx
            .registry
            .transition_if_unfinished(current.id, Transition::Suspend)
        {
            Ok(Some(_)) => tracing::info!(
                "suspending goal {} on unit {} for goal {}",
                current.id,
                self.unit_id,
                candidate
            ),
            Ok(None) | Err(GoalError::NotFound(_)) => {}
            Err(e) => tracing::warn!("could not suspend goal {}: {}", current.id, e),
        }
    }

    /// Move a dispatched goal into Executing: start it, or resume it if it
    /// was suspended or already marked to continue.
    fn enter(&self, goal: &Goal) -> bool {
        let registry = &self.ctx.registry;
        let entered = match goal.phase {
            GoalPhase::ToContinue => {
                registry.transition_if_unfinished(goal.id, Transition::DoContinue)
            }
            GoalPhase::Suspended => registry
                .transition_if_unfinished(goal.id, Transition::Continue)
                .and_then(|resumed| match resumed {
                    Some(_) => registry.transition_if_unfinished(goal.id, Transition::DoContinue),
                    None => Ok(None),
                }),
            _ => registry.transition_if_unfinished(goal.id, Transition::Start),
        };
        match entered {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("could not enter goal {}: {}", goal.id, e);
                false
            }
        }
    }

    fn attach_slot_cascades(&mut self, owner: &Arc<Unit>, goal_id: GoalId) {
        if !self.cascaded.insert(goal_id) {
            return;
        }
        for signal in [GoalSignal::Complete, GoalSignal::Abort] {
            let attached = attach(
                &self.ctx.registry,
                goal_id,
                signal,
                ClearCurrentGoal::new(self),
            )
            .and_then(|_| {
                attach(
                    &self.ctx.registry,
                    goal_id,
                    signal,
                    ClearProducing::new(owner),
                )
            });
            if let Err(e) = attached {
                tracing::warn!("could not attach cascades to goal {}: {}", goal_id, e);
            }
        }
    }

    // ── Out-of-band transitions ──────────────────────────────────

    /// The unit died: signal listeners, clear the slot, remove every goal
    /// on the stack, and detach. The processor is inert afterwards.
    pub fn owner_killed(&mut self) {
        if self.owner.is_none() {
            return;
        }

        let listeners = self.on_killed.clone();
        for listener in &listeners {
            listener(self.unit_id);
        }

        self.set_current_goal(None);
        let removed: Vec<GoalId> = std::mem::take(&mut self.goals)
            .into_iter()
            .filter(|id| self.ctx.registry.remove(*id).is_ok())
            .collect();
        self.chained.clear();
        self.cascaded.clear();

        tracing::info!(
            "unit {} destroyed, removed {} goals",
            self.unit_id,
            removed.len()
        );
        self.ctx
            .registry
            .emit(GoalEvent::agent_destroyed(self.unit_id.0, removed));
        self.owner = None;
    }

    /// Complete whatever holds the action slot. For callers that learn of
    /// completion from the host (a build finishing) rather than from the
    /// goal itself.
    pub fn complete_current_goal(&mut self) {
        if let Some(id) = self.current_goal() {
            match self
                .ctx
                .registry
                .transition_if_unfinished(id, Transition::Complete)
            {
                Ok(_) | Err(GoalError::NotFound(_)) => {}
                Err(e) => tracing::warn!("could not complete goal {}: {}", id, e),
            }
        }
        self.set_current_goal(None);
        if let Some(owner) = &self.owner {
            owner.set_producing(false);
        }
    }

    /// The structure this unit was ordered to build has finished. Completes
    /// the expansion build that gave the order, even if a higher-priority
    /// goal has suspended it since. The slot is only freed if the build
    /// still holds it.
    pub fn complete_expansion_build(&mut self) -> Option<GoalId> {
        let registry = &self.ctx.registry;
        let id = self.goals.iter().copied().find(|id| {
            registry.get(*id).is_some_and(|g| {
                g.goal_type == GoalType::BuildExpansion
                    && matches!(
                        g.phase,
                        GoalPhase::Executing | GoalPhase::Suspended | GoalPhase::ToContinue
                    )
            })
        })?;
        if let Err(e) = registry.transition_if_unfinished(id, Transition::Complete) {
            tracing::warn!("could not complete goal {}: {}", id, e);
            return None;
        }
        if self.current_goal() == Some(id) {
            self.set_current_goal(None);
        }
        if let Some(owner) = &self.owner {
            owner.set_producing(false);
        }
        Some(id)
    }

    /// Abort whatever holds the action slot and free it.
    pub fn abort_current_goal(&mut self) {
        if let Some(id) = self.current_goal() {
            match self
                .ctx
                .registry
                .transition_if_unfinished(id, Transition::Abort)
            {
                Ok(_) | Err(GoalError::NotFound(_)) => {}
                Err(e) => tracing::warn!("could not abort goal {}: {}", id, e),
            }
        }
        self.set_current_goal(None);
    }

    /// Human-readable stack dump.
    pub fn dump_goal_stack(&self, label: &str) -> String {
        let current = self
            .current_goal()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        let mut out = format!(
            "{} {} goal stack ({} goals, current {})",
            label,
            self.unit_id,
            self.goals.len(),
            current
        );
        for id in &self.goals {
            match self.ctx.registry.get(*id) {
                Some(g) => out.push_str(&format!(
                    "\n  {} {} priority {} {}",
                    g.id, g.goal_type, g.priority, g.phase
                )),
                None => out.push_str(&format!("\n  {} (removed)", id)),
            }
        }
        out
    }
}

/// Clears the processor's current goal when the source goal finishes,
/// provided the source is still the current goal.
pub struct ClearCurrentGoal {
    unit_id: UnitId,
    state: Weak<Mutex<ProcessorState>>,
}

impl ClearCurrentGoal {
    pub fn new(ai: &UnitAi) -> Self {
        Self {
            unit_id: ai.unit_id,
            state: Arc::downgrade(&ai.state),
        }
    }
}

impl Cascade for ClearCurrentGoal {
    fn fire(&self, source: &Goal) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock_state(&state);
        if state.current_goal == Some(source.id) {
            state.current_goal = None;
            tracing::info!("cleaning current goal on unit {}", self.unit_id);
        }
    }
}

/// Clears a unit's producing flag when the source goal finishes.
pub struct ClearProducing {
    unit: Weak<Unit>,
}

impl ClearProducing {
    pub fn new(unit: &Arc<Unit>) -> Self {
        Self {
            unit: Arc::downgrade(unit),
        }
    }
}

impl Cascade for ClearProducing {
    fn fire(&self, _source: &Goal) {
        if let Some(unit) = self.unit.upgrade() {
            unit.set_producing(false);
            tracing::info!("cleaning producing flag on unit {}", unit.id);
        }
    }
}
