//! # LOCKSTEP
//!
//! Deterministic fixed-timestep simulation scheduler.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Scheduler                           │
//! │  wall clock ──> lag ──> N × Core::tick ──> Core::render      │
//! │        ▲                     │                               │
//! │        │ take_due(clock)     │ dispatch after every tick     │
//! │  ┌─────┴──────┐        ┌─────▼──────┐                        │
//! │  │ EventQueue │<─ ─ ─ ─│   sinks    │                        │
//! │  └─────▲──────┘        └────────────┘                        │
//! └────────┼─────────────────────────────────────────────────────┘
//!          │ (event, due_ms)
//!   sources / routines / enqueue_event
//! ```
//!
//! ## Guarantees
//!
//! 1. **Exact simulated time** - the clock only moves in `tick_size_ms` steps
//! 2. **Stable event order** - equal due times pop in enqueue order
//! 3. **Tick isolation** - spawns and writes of a tick are invisible to
//!    routines until the tick has committed
//! 4. **Cooperative shutdown** - a shutdown-kind event stops ticking at once;
//!    the loop exits at the top of the next iteration
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut scheduler = Scheduler::<GameEvent>::from_config(EngineConfig::load("lockstep.toml")?)?;
//! scheduler.core_mut().add_routine(physics)?;
//! scheduler.add_event_source(input_rx)?;
//! scheduler.enqueue_event(GameEvent::Shutdown, 60_000);
//! let summary = scheduler.run();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod persistence;
pub mod profiling;
pub mod render;
pub mod routine;
pub mod scheduler;

pub use config::{EngineConfig, ExecutionMode, LagPolicy, DEFAULT_TICK_MS};
pub use engine::{CommitReport, Core, StopHandle};
pub use error::{
    ConfigError, ConfigResult, CoreError, CoreResult, PersistenceError, PersistenceResult,
};
pub use events::{EventQueue, EventSink, SimEvent, SinkId};
pub use persistence::WorldSnapshot;
pub use profiling::{IterationTiming, ProfileAccumulator, ProfileSample};
pub use render::{NullRenderer, Renderer};
pub use routine::{AccessSet, FnRoutine, TickContext, UpdateRoutine};
pub use scheduler::{IterationReport, RunSummary, Scheduler};

pub use lockstep_core;
