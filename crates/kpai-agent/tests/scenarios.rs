// scenarios.rs — End-to-end scenarios for unit processors and the team
// controller.
//
// Each test builds a private registry with an in-memory event sink, a
// recording command sink, and either a bare UnitAi or a full TeamAi, then
// drives it the way the host would:
//
//   - single-unit passes: dispatch, preemption, role mismatch, death
//   - controller flows: base builds a constructor, constructor builds an
//     expansion, damaged builder retreats and times out, move failures
//
// VERIFY: commands issued, goal phases, current-goal pointers, producing
// flags, and the lifecycle events seen by outside observers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kpai_agent::{
    AiConfig, AiContext, Command, ConfigProvider, HostEvent, RecordingSink, StaticConfig, TeamAi,
    Tunables, Unit, UnitAi, UnitId,
};
use kpai_goal::{
    EventDispatcher, Frame, GoalPhase, GoalRegistry, GoalType, MemorySink, Position,
};

struct Harness {
    registry: Arc<GoalRegistry>,
    events: Arc<MemorySink>,
    commands: Arc<RecordingSink>,
    ctx: AiContext,
}

fn harness() -> Harness {
    let events = Arc::new(MemorySink::new());
    let mut dispatcher = EventDispatcher::new();
    dispatcher.add_sink(Box::new(Arc::clone(&events)));
    let registry = Arc::new(GoalRegistry::with_dispatcher(dispatcher));
    let commands = Arc::new(RecordingSink::new());
    let ctx = AiContext::new(Arc::clone(&registry), commands.clone(), AiConfig::default());
    Harness {
        registry,
        events,
        commands,
        ctx,
    }
}

fn unit_ai(h: &Harness, id: u32, def_name: &str) -> (Arc<Unit>, UnitAi) {
    let role = h.ctx.config.roles.classify(def_name);
    let unit = Arc::new(Unit::new(UnitId(id), def_name, role));
    let ai = UnitAi::new(Arc::clone(&unit), h.ctx.clone());
    (unit, ai)
}

fn at(x: f32, z: f32) -> Position {
    Position::new(x, 0.0, z)
}

// =========================================================
// Single-unit passes
// =========================================================

#[test]
fn move_goal_is_dispatched_on_first_pass() {
    let h = harness();
    let (_unit, mut ai) = unit_ai(&h, 1, "assembler");
    let goal = h
        .registry
        .create_with_params(5, GoalType::Move, vec![at(10.0, 10.0).into()]);
    ai.push_goal(goal);

    ai.update(0);

    assert_eq!(
        h.commands.issued(),
        vec![(UnitId(1), Command::Move { target: at(10.0, 10.0) })]
    );
    assert_eq!(h.registry.get(goal).unwrap().phase, GoalPhase::Executing);
    assert_eq!(ai.current_goal(), Some(goal));
    assert_eq!(h.events.count("command_issued"), 1);
}

#[test]
fn lower_priority_retreat_waits_behind_running_goal() {
    let h = harness();
    let (_unit, mut ai) = unit_ai(&h, 1, "assembler");
    let running = h
        .registry
        .create_with_params(5, GoalType::Move, vec![at(10.0, 10.0).into()]);
    ai.push_goal(running);
    ai.update(0);

    let retreat = h
        .registry
        .create_with_params(3, GoalType::Retreat, vec![at(0.0, 0.0).into()]);
    ai.push_goal(retreat);
    ai.update(30);

    assert_eq!(h.commands.len(), 1);
    assert_eq!(ai.goals(), &[running, retreat]);
    assert_eq!(h.registry.get(retreat).unwrap().phase, GoalPhase::NotStarted);
    assert_eq!(ai.current_goal(), Some(running));
}

#[test]
fn equal_priority_never_preempts() {
    let h = harness();
    let (_unit, mut ai) = unit_ai(&h, 1, "assembler");
    let running = h
        .registry
        .create_with_params(5, GoalType::Move, vec![at(1.0, 1.0).into()]);
    ai.push_goal(running);
    ai.update(0);

    for frame in [30, 60, 90] {
        let rival = h
            .registry
            .create_with_params(5, GoalType::Move, vec![at(2.0, 2.0).into()]);
        ai.push_goal(rival);
        ai.update(frame);
        assert_eq!(ai.current_goal(), Some(running));
    }
    assert_eq!(h.commands.len(), 1);
}

#[test]
fn build_expansion_on_non_constructor_is_discarded() {
    let h = harness();
    let (unit, mut ai) = unit_ai(&h, 1, "kernel");
    let goal = h
        .registry
        .create_with_params(5, GoalType::BuildExpansion, vec![at(50.0, 50.0).into()]);
    ai.push_goal(goal);

    ai.update(0);

    assert!(h.commands.is_empty());
    assert!(ai.goals().is_empty());
    assert_eq!(h.registry.get(goal).unwrap().phase, GoalPhase::NotStarted);
    assert_eq!(unit.status(), kpai_agent::UnitStatus::default());
    assert!(ai.current_goal().is_none());
}

#[test]
fn build_expansion_cascades_fire_once_each() {
    let h = harness();
    let (unit, mut ai) = unit_ai(&h, 1, "trojan");
    let goal = h
        .registry
        .create_with_params(5, GoalType::BuildExpansion, vec![at(50.0, 50.0).into()]);
    ai.push_goal(goal);
    ai.update(0);
    assert!(unit.is_producing());

    // Observer registered after the processor's cascades sees their result.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let producing = Arc::clone(&unit);
    h.registry
        .on_complete(goal, move |_| {
            seen_in.lock().unwrap().push(producing.is_producing());
        })
        .unwrap();

    h.registry.complete(goal).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert!(ai.current_goal().is_none());
    assert!(!unit.is_producing());
    assert_eq!(
        h.commands.issued()[0].1,
        Command::Build {
            unit_def: "window".into(),
            at: Some(at(50.0, 50.0))
        }
    );
}

#[test]
fn destroyed_agent_aborts_and_removes_its_stack() {
    let h = harness();
    let (_unit, mut ai) = unit_ai(&h, 7, "assembler");
    let aborts = Arc::new(AtomicUsize::new(0));
    let mut goals = Vec::new();
    for priority in [1, 2, 3] {
        let id = h
            .registry
            .create_with_params(priority, GoalType::Move, vec![at(1.0, 1.0).into()]);
        let counter = Arc::clone(&aborts);
        h.registry
            .on_abort(id, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        ai.push_goal(id);
        goals.push(id);
    }
    ai.update(0);
    assert!(ai.current_goal().is_some());

    let deaths = Arc::new(AtomicUsize::new(0));
    let deaths_in = Arc::clone(&deaths);
    ai.on_killed(move |unit| {
        assert_eq!(unit, UnitId(7));
        deaths_in.fetch_add(1, Ordering::SeqCst);
    });

    ai.owner_killed();

    assert_eq!(deaths.load(Ordering::SeqCst), 1);
    assert_eq!(aborts.load(Ordering::SeqCst), 3);
    assert!(goals.iter().all(|id| !h.registry.contains(*id)));
    assert!(ai.current_goal().is_none());
    assert!(ai.is_detached());
    assert_eq!(h.events.count("agent_destroyed"), 1);
    assert_eq!(h.events.count("goal_removed"), 3);
}

// =========================================================
// Team controller
// =========================================================

fn team(h: &Harness, provider: Arc<dyn ConfigProvider>) -> TeamAi {
    TeamAi::new(h.ctx.clone(), provider)
}

fn spawn(team: &mut TeamAi, unit: u32, def_name: &str, builder: Option<u32>, position: Position) {
    team.handle(HostEvent::UnitCreated {
        unit: UnitId(unit),
        def_name: def_name.into(),
        builder: builder.map(UnitId),
    })
    .unwrap();
    team.handle(HostEvent::UnitFinished {
        unit: UnitId(unit),
        position,
    })
    .unwrap();
}

fn tick(team: &mut TeamAi, frame: Frame) {
    team.handle(HostEvent::Frame { frame }).unwrap();
}

#[test]
fn base_builds_constructor_which_builds_expansion() {
    let h = harness();
    let mut team = team(&h, Arc::new(StaticConfig::default()));
    spawn(&mut team, 1, "kernel", None, at(0.0, 0.0));

    team.assign_goal(UnitId(1), 10, GoalType::BuildConstructor, vec![])
        .unwrap();
    tick(&mut team, 0);
    assert_eq!(
        h.commands.issued().last().unwrap().1,
        Command::Build {
            unit_def: "assembler".into(),
            at: None
        }
    );

    spawn(&mut team, 2, "assembler", Some(1), at(5.0, 5.0));
    let expansion = team
        .assign_goal(UnitId(2), 5, GoalType::BuildExpansion, vec![at(80.0, 20.0).into()])
        .unwrap();
    tick(&mut team, 30);
    let builder = team.processor(UnitId(2)).unwrap();
    assert_eq!(builder.current_goal(), Some(expansion));
    assert!(team.unit(UnitId(2)).unwrap().is_producing());

    // The structure going up and finishing completes the builder's goal.
    team.handle(HostEvent::UnitCreated {
        unit: UnitId(3),
        def_name: "socket".into(),
        builder: Some(UnitId(2)),
    })
    .unwrap();
    assert!(team.unit(UnitId(2)).unwrap().is_producing());
    team.handle(HostEvent::UnitFinished {
        unit: UnitId(3),
        position: at(80.0, 20.0),
    })
    .unwrap();

    assert_eq!(
        h.registry.get(expansion).unwrap().phase,
        GoalPhase::Completed
    );
    assert!(!team.unit(UnitId(2)).unwrap().is_producing());
    assert!(team.processor(UnitId(2)).unwrap().current_goal().is_none());
    assert!(team.unit(UnitId(3)).unwrap().role.expansion);

    // Both finished goals are gone after the next pass pops them.
    tick(&mut team, 60);
    assert!(team.owned_goals().is_empty());
    assert!(h.registry.is_empty());
}

#[test]
fn expansion_finishing_during_retreat_completes_the_suspended_build() {
    let h = harness();
    let mut team = team(&h, Arc::new(StaticConfig::default()));
    spawn(&mut team, 1, "kernel", None, at(0.0, 0.0));
    spawn(&mut team, 2, "assembler", Some(1), at(5.0, 5.0));
    let expansion = team
        .assign_goal(UnitId(2), 5, GoalType::BuildExpansion, vec![at(80.0, 20.0).into()])
        .unwrap();
    tick(&mut team, 0);

    team.handle(HostEvent::UnitCreated {
        unit: UnitId(3),
        def_name: "socket".into(),
        builder: Some(UnitId(2)),
    })
    .unwrap();
    team.handle(HostEvent::UnitDamaged {
        unit: UnitId(2),
        attacker: Some(UnitId(500)),
        damage: 20.0,
    })
    .unwrap();
    tick(&mut team, 30);
    let retreat = team.processor(UnitId(2)).unwrap().current_goal().unwrap();
    assert_eq!(
        h.registry.get(expansion).unwrap().phase,
        GoalPhase::Suspended
    );
    assert!(team.unit(UnitId(2)).unwrap().is_producing());

    team.handle(HostEvent::UnitFinished {
        unit: UnitId(3),
        position: at(80.0, 20.0),
    })
    .unwrap();

    // The build is done; the retreat keeps the slot.
    assert_eq!(
        h.registry.get(expansion).unwrap().phase,
        GoalPhase::Completed
    );
    assert!(h.registry.get(retreat).unwrap().is_executing());
    assert_eq!(
        team.processor(UnitId(2)).unwrap().current_goal(),
        Some(retreat)
    );
    assert!(!team.unit(UnitId(2)).unwrap().is_producing());

    // Nothing resumes the finished build or orders the socket again.
    tick(&mut team, 60);
    team.handle(HostEvent::UnitIdle { unit: UnitId(2) }).unwrap();
    tick(&mut team, 90);
    let builds = h
        .commands
        .issued()
        .into_iter()
        .filter(|(_, c)| matches!(c, Command::Build { .. }))
        .count();
    assert_eq!(builds, 1);
    assert_eq!(h.commands.len(), 2);
    assert!(team.processor(UnitId(2)).unwrap().current_goal().is_none());
    assert!(h.registry.is_empty());
}

#[test]
fn damaged_builder_retreats_to_base_and_arrives() {
    let h = harness();
    let mut team = team(&h, Arc::new(StaticConfig::default()));
    spawn(&mut team, 1, "hole", None, at(3.0, 4.0));
    spawn(&mut team, 2, "trojan", Some(1), at(40.0, 40.0));
    let errand = team
        .assign_goal(UnitId(2), 5, GoalType::Move, vec![at(90.0, 90.0).into()])
        .unwrap();
    tick(&mut team, 0);

    team.handle(HostEvent::UnitDamaged {
        unit: UnitId(2),
        attacker: Some(UnitId(500)),
        damage: 12.5,
    })
    .unwrap();
    // A second hit before the next pass does not pile up retreats.
    team.handle(HostEvent::UnitDamaged {
        unit: UnitId(2),
        attacker: None,
        damage: 3.0,
    })
    .unwrap();
    assert_eq!(team.owned_goals().len(), 2);

    tick(&mut team, 30);
    let retreat = team.processor(UnitId(2)).unwrap().current_goal().unwrap();
    let goal = h.registry.get(retreat).unwrap();
    assert_eq!(goal.goal_type, GoalType::Retreat);
    assert_eq!(goal.priority, 100);
    assert_eq!(goal.timeout_frame, Some(900));
    assert_eq!(
        h.registry.get(errand).unwrap().phase,
        GoalPhase::Suspended
    );
    assert_eq!(
        h.commands.issued().last().unwrap().1,
        Command::Move { target: at(3.0, 4.0) }
    );

    team.handle(HostEvent::UnitIdle { unit: UnitId(2) }).unwrap();
    assert_eq!(h.registry.get(retreat).unwrap().phase, GoalPhase::Completed);

    // The interrupted errand picks up again.
    tick(&mut team, 60);
    assert_eq!(
        team.processor(UnitId(2)).unwrap().current_goal(),
        Some(errand)
    );
    assert_eq!(
        h.commands.issued().last().unwrap().1,
        Command::Move { target: at(90.0, 90.0) }
    );
}

/// Serves a short retreat timeout only while the game is young.
struct EarlyGame;

impl ConfigProvider for EarlyGame {
    fn int_value(&self, key: &str, frame: Frame) -> Option<i64> {
        match key {
            kpai_agent::BUILDER_RETREAT_TIMEOUT if frame < 1000 => Some(30),
            kpai_agent::RETREAT_PRIORITY => Some(50),
            _ => None,
        }
    }
}

#[test]
fn retreat_times_out_using_provider_value_at_damage_time() {
    let h = harness();
    let mut team = team(&h, Arc::new(EarlyGame));
    spawn(&mut team, 1, "carrier", None, at(0.0, 0.0));
    spawn(&mut team, 2, "gateway", Some(1), at(10.0, 10.0));
    tick(&mut team, 0);

    team.handle(HostEvent::UnitDamaged {
        unit: UnitId(2),
        attacker: None,
        damage: 1.0,
    })
    .unwrap();
    let retreat = team.owned_goals()[0];
    assert_eq!(h.registry.get(retreat).unwrap().timeout_frame, Some(30));
    assert_eq!(h.registry.get(retreat).unwrap().priority, 50);

    // Expires before it is ever dispatched.
    tick(&mut team, 30);
    assert_eq!(h.events.count("goal_timed_out"), 1);
    assert!(team.processor(UnitId(2)).unwrap().current_goal().is_none());
    assert!(h.commands.is_empty());
}

#[test]
fn move_failure_aborts_current_move() {
    let h = harness();
    let mut team = team(&h, Arc::new(StaticConfig::new(Tunables::default())));
    spawn(&mut team, 4, "bit", None, at(0.0, 0.0));
    let goal = team
        .assign_goal(UnitId(4), 1, GoalType::Move, vec![at(9.0, 9.0).into()])
        .unwrap();
    tick(&mut team, 0);

    team.handle(HostEvent::UnitMoveFailed { unit: UnitId(4) })
        .unwrap();

    assert_eq!(h.registry.get(goal).unwrap().phase, GoalPhase::Aborted);
    assert!(team.processor(UnitId(4)).unwrap().current_goal().is_none());
}

#[test]
fn destroyed_unit_takes_its_goals_with_it() {
    let h = harness();
    let mut team = team(&h, Arc::new(StaticConfig::default()));
    spawn(&mut team, 1, "packet", None, at(0.0, 0.0));
    for priority in [1, 2, 3] {
        team.assign_goal(UnitId(1), priority, GoalType::Move, vec![at(1.0, 1.0).into()])
            .unwrap();
    }
    tick(&mut team, 0);

    team.handle(HostEvent::UnitDestroyed {
        unit: UnitId(1),
        attacker: Some(UnitId(99)),
    })
    .unwrap();

    assert!(team.unit(UnitId(1)).is_none());
    assert!(team.processor(UnitId(1)).is_none());
    assert!(h.registry.is_empty());
    assert!(team.owned_goals().is_empty());
    assert_eq!(h.events.count("agent_destroyed"), 1);
}
