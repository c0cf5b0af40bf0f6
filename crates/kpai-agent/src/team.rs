// team.rs — TeamAi: translates host events into registry and processor
// operations.
//
// TeamAi owns the unit table and one UnitAi per finished unit. Goals it
// creates through `assign_goal` are tracked, and once no unit's stack
// refers to a goal any more it is removed from the registry. Goals a
// processor discarded without running (bad params, wrong role) are
// aborted on the way out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kpai_goal::{Frame, GoalId, GoalParam, GoalRegistry, GoalType, Position};

use crate::error::AgentError;
use crate::host::{ConfigProvider, HostEvent, UnitId};
use crate::unit::Unit;
use crate::unit_ai::{AiContext, UnitAi};

pub struct TeamAi {
    ctx: AiContext,
    provider: Arc<dyn ConfigProvider>,
    units: HashMap<UnitId, Arc<Unit>>,
    processors: BTreeMap<UnitId, UnitAi>,
    /// Unit under construction → the unit building it.
    builders: HashMap<UnitId, UnitId>,
    owned_goals: Vec<GoalId>,
    frame: Frame,
}

impl TeamAi {
    pub fn new(ctx: AiContext, provider: Arc<dyn ConfigProvider>) -> Self {
        Self {
            ctx,
            provider,
            units: HashMap::new(),
            processors: BTreeMap::new(),
            builders: HashMap::new(),
            owned_goals: Vec::new(),
            frame: 0,
        }
    }

    pub fn registry(&self) -> &Arc<GoalRegistry> {
        &self.ctx.registry
    }

    /// Last frame seen from the host.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn unit(&self, id: UnitId) -> Option<&Arc<Unit>> {
        self.units.get(&id)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn processor(&self, id: UnitId) -> Option<&UnitAi> {
        self.processors.get(&id)
    }

    pub fn processors(&self) -> impl Iterator<Item = &UnitAi> {
        self.processors.values()
    }

    /// Goals created by this team that are still in the registry.
    pub fn owned_goals(&self) -> &[GoalId] {
        &self.owned_goals
    }

    /// Create a goal and push it onto a finished unit's stack.
    pub fn assign_goal(
        &mut self,
        unit: UnitId,
        priority: i32,
        goal_type: GoalType,
        params: Vec<GoalParam>,
    ) -> Result<GoalId, AgentError> {
        if !self.units.contains_key(&unit) {
            return Err(AgentError::UnknownUnit(unit));
        }
        let processor = self
            .processors
            .get_mut(&unit)
            .ok_or(AgentError::ProcessorDetached(unit))?;
        let id = self
            .ctx
            .registry
            .create_with_params(priority, goal_type, params);
        processor.push_goal(id);
        self.owned_goals.push(id);
        tracing::info!(
            "assigned goal {} ({}, priority {}) to unit {}",
            id,
            goal_type,
            priority,
            unit
        );
        Ok(id)
    }

    pub fn handle(&mut self, event: HostEvent) -> Result<(), AgentError> {
        match event {
            HostEvent::UnitCreated {
                unit,
                def_name,
                builder,
            } => self.unit_created(unit, def_name, builder),
            HostEvent::UnitFinished { unit, position } => self.unit_finished(unit, position),
            HostEvent::UnitDestroyed { unit, attacker } => self.unit_destroyed(unit, attacker),
            HostEvent::UnitIdle { unit } => self.unit_idle(unit),
            HostEvent::UnitDamaged {
                unit,
                attacker,
                damage,
            } => self.unit_damaged(unit, attacker, damage),
            HostEvent::UnitMoveFailed { unit } => self.unit_move_failed(unit),
            HostEvent::Frame { frame } => {
                self.update(frame);
                Ok(())
            }
            other => {
                tracing::debug!("ignoring host event {:?}", other);
                Ok(())
            }
        }
    }

    fn unit_created(
        &mut self,
        id: UnitId,
        def_name: String,
        builder: Option<UnitId>,
    ) -> Result<(), AgentError> {
        if self.units.contains_key(&id) {
            return Err(AgentError::DuplicateUnit(id));
        }
        let role = self.ctx.config.roles.classify(&def_name);
        tracing::info!("unit {} ({}) created", id, def_name);
        self.units.insert(id, Arc::new(Unit::new(id, def_name, role)));
        if let Some(builder) = builder {
            self.builders.insert(id, builder);
        }
        Ok(())
    }

    fn unit_finished(&mut self, id: UnitId, position: Position) -> Result<(), AgentError> {
        let unit = self.units.get(&id).ok_or(AgentError::UnknownUnit(id))?;
        unit.complete(position);
        if !self.processors.contains_key(&id) {
            let processor = UnitAi::new(Arc::clone(unit), self.ctx.clone());
            self.processors.insert(id, processor);
        }
        tracing::info!("unit {} ({}) finished at {}", id, unit.def_name, position);

        // A finished expansion is its builder's build order coming true.
        let is_expansion = unit.role.expansion;
        let Some(builder) = self.builders.remove(&id) else {
            return Ok(());
        };
        if !is_expansion {
            return Ok(());
        }
        if let Some(processor) = self.processors.get_mut(&builder) {
            match processor.complete_expansion_build() {
                Some(goal) => tracing::info!(
                    "expansion {} finished goal {} of builder {}",
                    id,
                    goal,
                    builder
                ),
                None => tracing::debug!("expansion {} had no build goal on {}", id, builder),
            }
        }
        Ok(())
    }

    fn unit_destroyed(&mut self, id: UnitId, attacker: Option<UnitId>) -> Result<(), AgentError> {
        let unit = self.units.remove(&id).ok_or(AgentError::UnknownUnit(id))?;
        unit.destroy();
        match attacker {
            Some(attacker) => tracing::info!("unit {} killed by {}", id, attacker),
            None => tracing::info!("unit {} destroyed", id),
        }
        if let Some(mut processor) = self.processors.remove(&id) {
            processor.owner_killed();
        }
        self.builders.remove(&id);
        self.collect_dropped();
        Ok(())
    }

    fn unit_idle(&mut self, id: UnitId) -> Result<(), AgentError> {
        let unit = self.units.get(&id).ok_or(AgentError::UnknownUnit(id))?;
        unit.mark_idle(self.frame);
        let Some(processor) = self.processors.get_mut(&id) else {
            return Ok(());
        };
        // Idle after a move means the unit got there.
        if let Some(current) = processor.current_goal_snapshot() {
            if current.is_executing() && is_movement(current.goal_type) {
                processor.complete_current_goal();
            }
        }
        Ok(())
    }

    fn unit_damaged(
        &mut self,
        id: UnitId,
        attacker: Option<UnitId>,
        damage: f32,
    ) -> Result<(), AgentError> {
        let unit = self.units.get(&id).ok_or(AgentError::UnknownUnit(id))?;
        unit.mark_attacked(self.frame);
        tracing::debug!("unit {} took {} damage from {:?}", id, damage, attacker);
        if !unit.role.constructor {
            return Ok(());
        }
        let Some(processor) = self.processors.get(&id) else {
            return Ok(());
        };
        if self.has_pending_retreat(processor) {
            return Ok(());
        }
        let Some(target) = self.retreat_target() else {
            tracing::debug!("builder {} damaged but no base to retreat to", id);
            return Ok(());
        };

        let frame = self.frame;
        let priority = self.provider.retreat_priority(frame);
        let timeout = frame + self.provider.builder_retreat_timeout(frame);
        let goal = self.assign_goal(id, priority, GoalType::Retreat, vec![target.into()])?;
        self.ctx.registry.set_timeout(goal, Some(timeout))?;
        tracing::info!(
            "builder {} retreating to {} until frame {}",
            id,
            target,
            timeout
        );
        Ok(())
    }

    fn unit_move_failed(&mut self, id: UnitId) -> Result<(), AgentError> {
        if !self.units.contains_key(&id) {
            return Err(AgentError::UnknownUnit(id));
        }
        let processor = self
            .processors
            .get_mut(&id)
            .ok_or(AgentError::ProcessorDetached(id))?;
        if let Some(current) = processor.current_goal_snapshot() {
            if is_movement(current.goal_type) {
                tracing::warn!("unit {} could not reach target of goal {}", id, current.id);
                processor.abort_current_goal();
            }
        }
        Ok(())
    }

    /// Advance to `frame`: run every processor, then drop finished goals.
    pub fn update(&mut self, frame: Frame) {
        self.frame = frame;
        for processor in self.processors.values_mut() {
            processor.update(frame);
        }
        self.collect_dropped();
    }

    /// Remove owned goals that no stack refers to any more. Returns how
    /// many were removed.
    pub fn collect_dropped(&mut self) -> usize {
        let registry = Arc::clone(&self.ctx.registry);
        let processors = &self.processors;
        let before = self.owned_goals.len();
        self.owned_goals.retain(|id| {
            if !registry.contains(*id) {
                return false;
            }
            let referenced = processors
                .values()
                .any(|p| p.goals().contains(id) || p.pending_chained().contains(id));
            referenced || registry.remove(*id).is_err()
        });
        before - self.owned_goals.len()
    }

    fn has_pending_retreat(&self, processor: &UnitAi) -> bool {
        processor.goals().iter().any(|id| {
            self.ctx
                .registry
                .get(*id)
                .is_some_and(|g| g.goal_type == GoalType::Retreat && !g.is_finished())
        })
    }

    /// Position of the lowest-id finished base.
    fn retreat_target(&self) -> Option<Position> {
        self.units
            .values()
            .filter(|u| u.role.base)
            .filter_map(|u| u.status().position.map(|p| (u.id, p)))
            .min_by_key(|(id, _)| *id)
            .map(|(_, p)| p)
    }
}

fn is_movement(goal_type: GoalType) -> bool {
    matches!(goal_type, GoalType::Move | GoalType::Retreat)
}
