//! # Fixed-Step Scheduler
//!
//! Converts wall-clock time into fixed simulated ticks. Each iteration:
//!
//! ```text
//! DISPATCH ──> UPDATE (0..N ticks) ──> RENDER ──> IDLE
//!    ▲          │ dispatch after                   │
//!    │          │ every tick                       │
//!    └──────────┴──────────────────────────────────┘
//! ```
//!
//! Wall time accumulates as lag. Each tick advances the simulated clock by
//! `tick_size_ms` and consumes one lag step (the frame budget by default, see
//! [`LagPolicy`](crate::LagPolicy)). What is left of the lag becomes the
//! interpolation fraction handed to the renderer.
//!
//! [`Scheduler::advance`] runs exactly one iteration for a given elapsed
//! time and never sleeps; [`Scheduler::run`] measures real time and sleeps
//! when ahead of the budget.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::engine::Core;
use crate::error::{ConfigResult, CoreError, CoreResult};
use crate::events::{spawn_forwarder, EventQueue, EventSink, SimEvent, SinkId, SinkTable};
use crate::profiling::{IterationTiming, ProfileAccumulator, ProfileSample};

/// Outcome of one scheduler iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IterationReport {
    /// Ticks executed.
    pub ticks: u32,
    /// Events dispatched.
    pub events_dispatched: usize,
    /// Interpolation fraction passed to the renderer.
    pub fraction: f64,
    /// Measured timings.
    pub timing: IterationTiming,
}

/// Totals returned when [`Scheduler::run`] exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Loop iterations executed.
    pub iterations: u64,
    /// Ticks executed by the core.
    pub ticks: u64,
    /// Final simulated clock.
    pub clock_ms: u64,
    /// Events dispatched while finalizing.
    pub drained_events: usize,
}

/// Drives a [`Core`] from wall-clock time and a merged event queue.
pub struct Scheduler<E: SimEvent> {
    core: Core,
    config: EngineConfig,
    queue: Arc<EventQueue<E>>,
    sinks: SinkTable<E>,
    sources: Vec<JoinHandle<()>>,
    lag: Duration,
    iterations: u64,
    profile: ProfileAccumulator,
    profile_tx: Option<Sender<ProfileSample>>,
    profile_rx: Receiver<ProfileSample>,
}

impl<E: SimEvent> Scheduler<E> {
    /// Wraps `core`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`](crate::ConfigError::Invalid) if `config` fails
    /// validation.
    pub fn new(core: Core, config: EngineConfig) -> ConfigResult<Self> {
        config.validate()?;
        if core.execution() != config.execution {
            warn!(
                core = ?core.execution(),
                config = ?config.execution,
                "core execution mode differs from config; the core's mode wins"
            );
        }

        let (profile_tx, profile_rx) = unbounded();
        Ok(Self {
            profile: ProfileAccumulator::new(config.frame_budget()),
            core,
            config,
            queue: Arc::new(EventQueue::new()),
            sinks: SinkTable::new(),
            sources: Vec::new(),
            lag: Duration::ZERO,
            iterations: 0,
            profile_tx: Some(profile_tx),
            profile_rx,
        })
    }

    /// Builds an empty core from `config` and wraps it.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn from_config(config: EngineConfig) -> ConfigResult<Self> {
        Self::new(Core::from_config(&config), config)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Schedules `event` at absolute simulated time `due_ms`. Always succeeds.
    pub fn enqueue_event(&self, event: E, due_ms: u64) -> bool {
        self.queue.try_add(event, due_ms)
    }

    /// The merged queue. Routines and threads may hold it to schedule events.
    #[must_use]
    pub fn queue(&self) -> Arc<EventQueue<E>> {
        Arc::clone(&self.queue)
    }

    /// Forwards every `(event, due_ms)` from `source` into the queue on a
    /// background thread, until all of its senders are dropped.
    ///
    /// # Errors
    ///
    /// [`CoreError::EventSource`] if the thread cannot be spawned.
    pub fn add_event_source(&mut self, source: Receiver<(E, u64)>) -> CoreResult<()> {
        let name = format!("lockstep-source-{}", self.sources.len());
        let handle = spawn_forwarder(name.clone(), source, Arc::clone(&self.queue))
            .map_err(CoreError::EventSource)?;
        debug!(source = %name, "event source attached");
        self.sources.push(handle);
        Ok(())
    }

    /// Blocks until every attached source has closed. Returns how many were
    /// joined.
    pub fn wait_for_sources(&mut self) -> usize {
        let handles = std::mem::take(&mut self.sources);
        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                warn!("event source thread panicked");
            }
        }
        count
    }

    /// Number of source forwarders still attached.
    #[must_use]
    #[inline]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Registers `sink` for events of `kind`.
    pub fn add_event_sink(&mut self, sink: impl EventSink<E> + 'static, kind: E::Kind) -> SinkId {
        let id = self.sinks.add(Box::new(sink), kind);
        debug!(?kind, sinks = self.sinks.len(), "event sink registered");
        id
    }

    /// Deregisters a sink. Returns `false` if it was not registered for `kind`.
    pub fn remove_event_sink(&mut self, id: SinkId, kind: E::Kind) -> bool {
        self.sinks.remove(id, kind)
    }

    fn dispatch_due(&mut self) -> usize {
        let now = self.core.elapsed_ms();
        let mut dispatched = 0;
        while let Some((event, due)) = self.queue.take_due(now) {
            trace!(kind = ?event.kind(), due, now, "dispatch");
            self.sinks.dispatch(&event);
            self.core.process_event(&event);
            dispatched += 1;
        }
        dispatched
    }

    // =========================================================================
    // Loop
    // =========================================================================

    #[inline]
    fn tick_cap_reached(&self, ticks: u32) -> bool {
        self.config.max_ticks_per_frame != 0 && ticks >= self.config.max_ticks_per_frame
    }

    /// Runs one iteration as if `elapsed` wall time had passed since the
    /// previous one. Never sleeps.
    pub fn advance(&mut self, elapsed: Duration) -> IterationReport {
        let started = Instant::now();
        let step = self.config.lag_step();
        let tick_size = self.config.tick_size_ms;

        self.lag += elapsed;
        let mut events_dispatched = self.dispatch_due();

        let mut ticks = 0_u32;
        let mut tick_time = Duration::ZERO;
        while self.lag >= step && self.core.is_running() {
            if self.tick_cap_reached(ticks) {
                debug!(ticks, lag_ms = self.lag.as_millis(), "catch-up capped");
                break;
            }
            let tick_started = Instant::now();
            self.core.tick(tick_size);
            tick_time += tick_started.elapsed();

            self.lag -= step;
            ticks += 1;
            events_dispatched += self.dispatch_due();
        }

        let fraction = (self.lag.as_secs_f64() / step.as_secs_f64()).min(1.0);
        let render_started = Instant::now();
        self.core.render(tick_size, fraction);
        let render_time = render_started.elapsed();

        let timing = IterationTiming {
            loop_time: started.elapsed(),
            tick_time,
            ticks,
            render_time,
        };
        self.iterations += 1;
        self.record(timing);

        IterationReport {
            ticks,
            events_dispatched,
            fraction,
            timing,
        }
    }

    /// Runs until the core stops, then finalizes.
    ///
    /// Finalizing dispatches the events already due, shuts the core down,
    /// emits the last partial profiling sample and closes the profiling
    /// channel.
    pub fn run(&mut self) -> RunSummary {
        let budget = self.config.frame_budget();
        info!(
            tick_size_ms = self.config.tick_size_ms,
            frame_budget_ms = self.config.frame_budget_ms,
            execution = ?self.core.execution(),
            "scheduler started"
        );

        let mut previous = Instant::now();
        while self.core.is_running() {
            let now = Instant::now();
            let report = self.advance(now - previous);
            previous = now;

            let spent = self.lag + report.timing.render_time;
            if spent < budget {
                std::thread::sleep(budget - spent);
            } else {
                trace!(spent_us = spent.as_micros(), "behind budget, not sleeping");
            }
        }

        self.finish()
    }

    fn finish(&mut self) -> RunSummary {
        let drained_events = self.dispatch_due();
        self.core.shutdown();
        self.emit_sample();
        self.profile_tx = None;

        // Forwarders of sources whose senders are still alive keep running
        // detached; whatever they push after this point is never dispatched.
        let detached = std::mem::take(&mut self.sources).len();
        if detached > 0 {
            debug!(detached, "detaching event sources still attached at stop");
        }

        let summary = RunSummary {
            iterations: self.iterations,
            ticks: self.core.tick_count(),
            clock_ms: self.core.elapsed_ms(),
            drained_events,
        };
        info!(
            iterations = summary.iterations,
            ticks = summary.ticks,
            clock_ms = summary.clock_ms,
            pending_events = self.queue.len(),
            "scheduler stopped"
        );
        summary
    }

    // =========================================================================
    // Profiling
    // =========================================================================

    fn record(&mut self, timing: IterationTiming) {
        if timing.loop_time > self.config.frame_budget() {
            debug!(
                loop_us = timing.loop_time.as_micros(),
                ticks = timing.ticks,
                "iteration over budget"
            );
        }
        if self.config.profile_interval == 0 {
            return;
        }
        self.profile.record(timing);
        if self.profile.iterations() >= u64::from(self.config.profile_interval) {
            self.emit_sample();
        }
    }

    fn emit_sample(&mut self) {
        if self.profile.iterations() == 0 {
            return;
        }
        let sample = self.profile.take_sample();
        if let Some(tx) = &self.profile_tx {
            // the scheduler holds a receiver, so this cannot disconnect
            let _ = tx.send(sample);
        }
    }

    /// Receiver for profiling samples. Disconnects once [`run`](Self::run)
    /// returns and every sample has been read.
    #[must_use]
    pub fn profiling_receiver(&self) -> Receiver<ProfileSample> {
        self.profile_rx.clone()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The driven core.
    #[must_use]
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Mutable access to the core, for registering routines or restoring a
    /// snapshot between iterations.
    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Simulated clock in milliseconds.
    #[must_use]
    pub fn clock_ms(&self) -> u64 {
        self.core.elapsed_ms()
    }

    /// Ticks executed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.core.tick_count()
    }

    /// Iterations executed so far.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Wall time not yet converted into ticks.
    #[must_use]
    pub fn lag(&self) -> Duration {
        self.lag
    }
}

impl<E: SimEvent> std::fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("core", &self.core)
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("sinks", &self.sinks.len())
            .field("sources", &self.sources.len())
            .field("lag", &self.lag)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionMode, LagPolicy};
    use crate::routine::{AccessSet, FnRoutine, TickContext};
    use parking_lot::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    enum Ev {
        Quit,
        Note(&'static str),
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum EvKind {
        Quit,
        Note,
    }

    impl SimEvent for Ev {
        type Kind = EvKind;
        const SHUTDOWN: EvKind = EvKind::Quit;

        fn kind(&self) -> EvKind {
            match self {
                Ev::Quit => EvKind::Quit,
                Ev::Note(_) => EvKind::Note,
            }
        }
    }

    fn scheduler(config: EngineConfig) -> Scheduler<Ev> {
        Scheduler::from_config(config).unwrap()
    }

    #[test]
    fn test_lag_burns_down_in_budget_steps() {
        let mut sched = scheduler(EngineConfig::default());

        let report = sched.advance(Duration::from_millis(40));
        assert_eq!(report.ticks, 2);
        assert!((report.fraction - 0.5).abs() < 1e-9);
        assert_eq!(sched.clock_ms(), 32);
        assert_eq!(sched.lag(), Duration::from_millis(8));

        let report = sched.advance(Duration::from_millis(8));
        assert_eq!(report.ticks, 1);
        assert_eq!(sched.lag(), Duration::ZERO);
    }

    #[test]
    fn test_tick_size_lag_policy() {
        let mut sched = scheduler(EngineConfig {
            tick_size_ms: 10,
            frame_budget_ms: 20,
            lag_policy: LagPolicy::TickSize,
            ..EngineConfig::default()
        });

        let report = sched.advance(Duration::from_millis(25));
        assert_eq!(report.ticks, 2);
        assert!((report.fraction - 0.5).abs() < 1e-9);
        assert_eq!(sched.clock_ms(), 20);
    }

    #[test]
    fn test_frame_budget_policy_decouples_simulated_time() {
        let mut sched = scheduler(EngineConfig {
            tick_size_ms: 10,
            frame_budget_ms: 20,
            ..EngineConfig::default()
        });

        let report = sched.advance(Duration::from_millis(45));
        assert_eq!(report.ticks, 2);
        assert_eq!(sched.clock_ms(), 20);
        assert!((report.fraction - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_catch_up_cap_keeps_lag() {
        let mut sched = scheduler(EngineConfig {
            max_ticks_per_frame: 3,
            ..EngineConfig::default()
        });

        let report = sched.advance(Duration::from_millis(160));
        assert_eq!(report.ticks, 3);
        assert_eq!(sched.lag(), Duration::from_millis(112));
        assert!((report.fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shutdown_scheduled_by_routine_after_twelve_ticks() {
        let mut sched = scheduler(EngineConfig::default());
        let queue = sched.queue();
        sched
            .core_mut()
            .add_routine(FnRoutine::new("timer", AccessSet::new(), move |ctx: &TickContext<'_>| {
                if ctx.tick() == 11 {
                    queue.try_add(Ev::Quit, ctx.clock_ms() + ctx.dt_ms());
                }
            }))
            .unwrap();

        let report = sched.advance(Duration::from_secs(1));
        assert_eq!(report.ticks, 12);
        assert!(!sched.core().is_running());
        assert_eq!(sched.clock_ms(), 192);
    }

    #[test]
    fn test_sinks_receive_due_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sched = scheduler(EngineConfig::default());

        let log = Arc::clone(&seen);
        let sink = sched.add_event_sink(move |event: &Ev| log.lock().push(event.clone()), EvKind::Note);

        sched.enqueue_event(Ev::Note("bar"), 16);
        sched.enqueue_event(Ev::Note("baz"), 32);
        sched.enqueue_event(Ev::Note("foo"), 0);
        sched.enqueue_event(Ev::Note("late"), 1_000);

        let report = sched.advance(Duration::from_millis(32));
        assert_eq!(report.events_dispatched, 3);
        assert_eq!(
            *seen.lock(),
            vec![Ev::Note("foo"), Ev::Note("bar"), Ev::Note("baz")]
        );

        assert!(sched.remove_event_sink(sink, EvKind::Note));
        assert!(!sched.remove_event_sink(sink, EvKind::Note));
        sched.enqueue_event(Ev::Note("unheard"), 0);
        sched.advance(Duration::ZERO);
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_run_finalizes_and_closes_profiling() {
        let mut sched = scheduler(EngineConfig {
            tick_size_ms: 2,
            frame_budget_ms: 2,
            profile_interval: 2,
            ..EngineConfig::default()
        });
        let samples = sched.profiling_receiver();
        sched.enqueue_event(Ev::Quit, 10);
        sched.enqueue_event(Ev::Note("after"), 10);
        sched.enqueue_event(Ev::Note("never"), 12);

        let summary = sched.run();
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.clock_ms, 10);
        assert_eq!(sched.queue().len(), 1);

        let samples: Vec<_> = samples.iter().collect();
        assert!(!samples.is_empty());
        assert_eq!(samples.iter().map(|s| s.iterations).sum::<u64>(), summary.iterations);
        assert_eq!(samples.iter().map(|s| s.ticks).sum::<u64>(), 5);
    }

    #[test]
    fn test_event_sources_are_merged() {
        let mut sched = scheduler(EngineConfig {
            execution: ExecutionMode::Sequential,
            ..EngineConfig::default()
        });
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        sched.add_event_source(rx_a).unwrap();
        sched.add_event_source(rx_b).unwrap();

        tx_a.send((Ev::Note("a"), 5)).unwrap();
        tx_b.send((Ev::Quit, 3)).unwrap();
        drop((tx_a, tx_b));
        assert_eq!(sched.wait_for_sources(), 2);

        assert_eq!(sched.queue().try_peek(), Some((Ev::Quit, 3)));
        assert_eq!(sched.queue().len(), 2);
    }

    #[test]
    fn test_run_detaches_open_sources() {
        let mut sched = scheduler(EngineConfig::default());
        let (tx, rx) = unbounded::<(Ev, u64)>();
        sched.add_event_source(rx).unwrap();
        assert_eq!(sched.source_count(), 1);

        sched.enqueue_event(Ev::Quit, 0);
        let summary = sched.run();

        assert_eq!(summary.ticks, 0);
        assert_eq!(sched.source_count(), 0);
        assert_eq!(sched.wait_for_sources(), 0);
        drop(tx);
    }
}
