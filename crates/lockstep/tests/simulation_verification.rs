//! # Simulation Verification Tests
//!
//! End-to-end checks across store, core, scheduler and persistence:
//!
//! 1. **Tick determinism**: shutdown after exactly 12 ticks of 16 ms ends at 192 ms
//! 2. **Execution equivalence**: parallel and sequential runs end in the same state
//! 3. **Persistence**: snapshot encoding is byte-stable through a file round trip
//!
//! Run with: cargo test --package lockstep --test simulation_verification

use std::time::Duration;

use lockstep::lockstep_core::{Component, ComponentRegistry, DoubleBuffered, EntityId};
use lockstep::{
    persistence, AccessSet, Core, EngineConfig, ExecutionMode, FnRoutine, Scheduler, SimEvent,
    TickContext,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// FIXTURES
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum WorldEvent {
    Shutdown,
    Pulse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum WorldEventKind {
    Shutdown,
    Pulse,
}

impl SimEvent for WorldEvent {
    type Kind = WorldEventKind;
    const SHUTDOWN: WorldEventKind = WorldEventKind::Shutdown;

    fn kind(&self) -> WorldEventKind {
        match self {
            WorldEvent::Shutdown => WorldEventKind::Shutdown,
            WorldEvent::Pulse => WorldEventKind::Pulse,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Position {
    owner: EntityId,
    x: DoubleBuffered<i64>,
}

impl Component for Position {
    const KIND: &'static str = "position";

    fn entity(&self) -> EntityId {
        self.owner
    }

    fn switch_buffers(&self) {
        self.x.switch_buffer();
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Energy {
    owner: EntityId,
    level: DoubleBuffered<u32>,
}

impl Component for Energy {
    const KIND: &'static str = "energy";

    fn entity(&self) -> EntityId {
        self.owner
    }

    fn switch_buffers(&self) {
        self.level.switch_buffer();
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Tag {
    owner: EntityId,
    label: String,
}

impl Component for Tag {
    const KIND: &'static str = "tag";

    fn entity(&self) -> EntityId {
        self.owner
    }
}

fn registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry
        .register::<Position>()
        .and_then(|r| r.register::<Energy>())
        .and_then(|r| r.register::<Tag>())
        .unwrap();
    registry
}

/// Three independent routines over three entities, plus one spawner.
fn populated_core(execution: ExecutionMode) -> Core {
    let mut core = Core::new(execution);
    for n in 0..3 {
        let id = core.spawn_entity();
        core.add_component(Position {
            owner: id,
            x: DoubleBuffered::new(n),
        });
        core.add_component(Energy {
            owner: id,
            level: DoubleBuffered::new(100),
        });
    }

    core.add_routine(FnRoutine::new(
        "movement",
        AccessSet::new().writes::<Position>().reads::<Energy>(),
        |ctx: &TickContext<'_>| {
            for position in ctx.store().all_for_type::<Position>().iter() {
                let energy = ctx
                    .store()
                    .for_entity_and_type::<Energy>(position.owner)
                    .first()
                    .map_or(0, |e| e.level.get());
                if energy > 0 {
                    position.x.update(|x| x + 2);
                }
            }
        },
    ))
    .unwrap();

    core.add_routine(FnRoutine::new(
        "drain",
        AccessSet::new().writes::<Energy>(),
        |ctx: &TickContext<'_>| {
            for energy in ctx.store().all_for_type::<Energy>().iter() {
                energy.level.update(|level| level.saturating_sub(15));
            }
        },
    ))
    .unwrap();

    core.add_routine(FnRoutine::new(
        "spawner",
        AccessSet::new().writes::<Tag>(),
        |ctx: &TickContext<'_>| {
            if ctx.tick() % 4 == 3 {
                let id = ctx.spawn();
                ctx.add_component(Tag {
                    owner: id,
                    label: format!("born-{}", ctx.clock_ms()),
                });
            }
        },
    ))
    .unwrap();

    core
}

// ============================================================================
// TICK DETERMINISM
// ============================================================================

#[test]
fn verify_twelve_ticks_end_at_192ms_in_real_time() {
    let mut scheduler = Scheduler::<WorldEvent>::from_config(EngineConfig::default()).unwrap();
    let queue = scheduler.queue();
    scheduler
        .core_mut()
        .add_routine(FnRoutine::new("timer", AccessSet::new(), move |ctx: &TickContext<'_>| {
            if ctx.tick() + 1 == 12 {
                queue.try_add(WorldEvent::Shutdown, ctx.clock_ms() + ctx.dt_ms());
            }
        }))
        .unwrap();

    let summary = scheduler.run();

    assert_eq!(summary.ticks, 12);
    assert_eq!(summary.clock_ms, 12 * 16);
    assert!(!scheduler.core().is_running());
}

#[test]
fn verify_pending_events_are_never_dispatched_after_stop() {
    let mut scheduler = Scheduler::<WorldEvent>::from_config(EngineConfig::default()).unwrap();
    let pulses = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&pulses);
    scheduler.add_event_sink(
        move |_: &WorldEvent| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        },
        WorldEventKind::Pulse,
    );

    scheduler.enqueue_event(WorldEvent::Pulse, 16);
    scheduler.enqueue_event(WorldEvent::Shutdown, 32);
    scheduler.enqueue_event(WorldEvent::Pulse, 48);

    scheduler.advance(Duration::from_secs(10));
    let summary = scheduler.run();

    assert_eq!(summary.clock_ms, 32);
    assert_eq!(pulses.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(scheduler.queue().len(), 1);
}

// ============================================================================
// EXECUTION EQUIVALENCE
// ============================================================================

fn run_scenario(execution: ExecutionMode) -> (u64, u64, String) {
    let config = EngineConfig {
        execution,
        ..EngineConfig::default()
    };
    let mut scheduler =
        Scheduler::<WorldEvent>::new(populated_core(execution), config).unwrap();
    scheduler.enqueue_event(WorldEvent::Shutdown, 160);

    while scheduler.core().is_running() {
        scheduler.advance(Duration::from_millis(16));
    }

    let snapshot = scheduler.core().snapshot().unwrap();
    (
        scheduler.tick_count(),
        scheduler.clock_ms(),
        persistence::to_json(&snapshot).unwrap(),
    )
}

#[test]
fn verify_parallel_and_sequential_runs_match() {
    let parallel = run_scenario(ExecutionMode::Parallel);
    let sequential = run_scenario(ExecutionMode::Sequential);

    assert_eq!(parallel.0, 10);
    assert_eq!(parallel.1, 160);
    assert_eq!(parallel, sequential);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn verify_snapshot_file_round_trip_is_byte_stable() {
    let mut core = populated_core(ExecutionMode::Parallel);
    for _ in 0..6 {
        core.tick(16);
    }
    // leave something queued so the pending collections are exercised
    let queued = core.spawn_entity();
    core.add_component(Tag {
        owner: queued,
        label: "queued".to_owned(),
    });

    let snapshot = core.snapshot().unwrap();
    let first = persistence::to_json(&snapshot).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.json");
    persistence::save(&path, &snapshot).unwrap();
    let loaded = persistence::load(&path).unwrap();
    assert_eq!(persistence::to_json(&loaded).unwrap(), first);

    let mut restored = Core::new(ExecutionMode::Sequential);
    restored.restore(&loaded, &registry()).unwrap();
    let second = persistence::to_json(&restored.snapshot().unwrap()).unwrap();
    assert_eq!(first, second);

    assert_eq!(restored.store().count_for_type::<Position>(), 3);
    assert_eq!(restored.store().count_for_type::<Tag>(), 1);
    assert_eq!(restored.pending_len(), (1, 1));
}

#[test]
fn verify_unknown_kind_aborts_restore() {
    let mut core = populated_core(ExecutionMode::Sequential);
    core.tick(16);
    let snapshot = core.snapshot().unwrap();

    let mut partial = ComponentRegistry::new();
    partial.register::<Position>().unwrap();

    let mut target = Core::new(ExecutionMode::Sequential);
    assert!(target.restore(&snapshot, &partial).is_err());
    assert!(target.entities().is_empty());
    assert!(target.store().is_empty());
}
