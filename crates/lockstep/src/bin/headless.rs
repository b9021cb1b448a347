//! # Headless Counter Scenario
//!
//! Runs the scheduler with no renderer: a handful of entities, each with a
//! counter that one routine increments every tick, a background source that
//! schedules milestones and the final shutdown, and a sink that logs them.
//!
//! Usage: `lockstep_headless [config.toml] [snapshot.json]`

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use lockstep::lockstep_core::{Component, DoubleBuffered, EntityId};
use lockstep::{persistence, AccessSet, EngineConfig, FnRoutine, Scheduler, SimEvent, TickContext};
use serde::{Deserialize, Serialize};

/// Simulated run length.
const RUN_MS: u64 = 2_000;
/// Spacing of milestone events.
const MILESTONE_MS: u64 = 250;
const ENTITIES: u64 = 8;

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    owner: EntityId,
    ticks: DoubleBuffered<u64>,
}

impl Component for Counter {
    const KIND: &'static str = "counter";

    fn entity(&self) -> EntityId {
        self.owner
    }

    fn switch_buffers(&self) {
        self.ticks.switch_buffer();
    }
}

#[derive(Clone, Debug)]
enum DemoEvent {
    Shutdown,
    Milestone(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum DemoEventKind {
    Shutdown,
    Milestone,
}

impl SimEvent for DemoEvent {
    type Kind = DemoEventKind;
    const SHUTDOWN: DemoEventKind = DemoEventKind::Shutdown;

    fn kind(&self) -> DemoEventKind {
        match self {
            DemoEvent::Shutdown => DemoEventKind::Shutdown,
            DemoEvent::Milestone(_) => DemoEventKind::Milestone,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let snapshot_path = args.next();

    println!("LOCKSTEP headless: {config:?}");

    let mut scheduler = Scheduler::<DemoEvent>::from_config(config)?;

    let core = scheduler.core_mut();
    for _ in 0..ENTITIES {
        let id = core.spawn_entity();
        core.add_component(Counter {
            owner: id,
            ticks: DoubleBuffered::new(0),
        });
    }
    core.add_routine(FnRoutine::new(
        "count",
        AccessSet::new().writes::<Counter>(),
        |ctx: &TickContext<'_>| {
            for counter in ctx.store().all_for_type::<Counter>().iter() {
                counter.ticks.update(|n| n + 1);
            }
        },
    ))?;

    let milestones = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&milestones);
    scheduler.add_event_sink(
        move |event: &DemoEvent| {
            if let DemoEvent::Milestone(at) = event {
                seen.fetch_add(1, Ordering::Relaxed);
                println!("  milestone at {at} ms");
            }
        },
        DemoEventKind::Milestone,
    );

    let (tx, rx) = unbounded();
    scheduler.add_event_source(rx)?;
    let producer = thread::spawn(move || {
        for at in (1..RUN_MS / MILESTONE_MS).map(|n| n * MILESTONE_MS) {
            if tx.send((DemoEvent::Milestone(at), at)).is_err() {
                return;
            }
        }
        let _ = tx.send((DemoEvent::Shutdown, RUN_MS));
    });

    let samples = scheduler.profiling_receiver();
    let summary = scheduler.run();
    let _ = producer.join();

    println!();
    println!("Profiling:");
    for sample in samples.iter() {
        println!("  {sample}");
    }

    println!();
    println!(
        "Stopped after {} iterations, {} ticks, clock {} ms, {} milestones",
        summary.iterations,
        summary.ticks,
        summary.clock_ms,
        milestones.load(Ordering::Relaxed)
    );
    if let Some(counter) = scheduler.core().store().all_for_type::<Counter>().first() {
        println!("Entity {} counted {} ticks", counter.owner, counter.ticks.get());
    }

    if let Some(path) = snapshot_path {
        let snapshot = scheduler.core().snapshot()?;
        persistence::save(&path, &snapshot)?;
        println!("Snapshot written to {path}");
    }

    Ok(())
}
