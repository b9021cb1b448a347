//! # Simulation Core
//!
//! [`Core`] owns the world (store, entities, id allocator, pending queues),
//! the registered routines and the renderer. One call to [`Core::tick`]:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ routines (rayon fan-out) │  shared &ComponentStore, staged writes only
//! └────────────┬─────────────┘
//!              │ join
//!              ▼
//! ┌──────────────────────────┐
//! │ store.swap_buffers()     │  publish this tick's writes
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │ sweep flagged entities   │  purge their components, compact the list
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │ commit pending spawns    │  entities first, then components
//! └──────────────────────────┘
//! ```
//!
//! Structural mutation needs `&mut self` and only happens after the join,
//! so it never overlaps with a routine's reads.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lockstep_core::{
    AnyComponent, Component, ComponentRegistry, ComponentStore, Entity, EntityId, EntityRegistry,
    IdAllocator, StoreResult,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ExecutionMode};
use crate::error::{CoreError, CoreResult};
use crate::events::SimEvent;
use crate::persistence::WorldSnapshot;
use crate::render::{NullRenderer, Renderer};
use crate::routine::{PendingChanges, TickContext, UpdateRoutine};

/// Shared handle to a core's running flag.
///
/// Lets another thread (or a sink) stop the simulation without holding the
/// core itself.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Requests a stop. Observed at the top of the next loop iteration.
    #[inline]
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Returns whether the core is still running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counts from one commit phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Entities swept.
    pub removed_entities: usize,
    /// Components purged with swept entities.
    pub removed_components: usize,
    /// Queued entities made live.
    pub spawned_entities: usize,
    /// Queued components stored.
    pub added_components: usize,
    /// Queued components dropped because their owner was not live.
    pub orphaned_components: usize,
}

/// The tick orchestrator.
///
/// Lifecycle is `Running -> Stopped`; a stopped core is never restarted.
pub struct Core {
    store: ComponentStore,
    entities: EntityRegistry,
    ids: IdAllocator,
    pending: PendingChanges,
    routines: Vec<Box<dyn UpdateRoutine>>,
    execution: ExecutionMode,
    renderer: Box<dyn Renderer>,
    running: Arc<AtomicBool>,
    renderer_closed: bool,
    ticks: u64,
    elapsed_ms: u64,
}

impl Core {
    /// Creates an empty, running core with a [`NullRenderer`].
    #[must_use]
    pub fn new(execution: ExecutionMode) -> Self {
        Self {
            store: ComponentStore::new(),
            entities: EntityRegistry::new(),
            ids: IdAllocator::new(),
            pending: PendingChanges::new(),
            routines: Vec::new(),
            execution,
            renderer: Box::new(NullRenderer),
            running: Arc::new(AtomicBool::new(true)),
            renderer_closed: false,
            ticks: 0,
            elapsed_ms: 0,
        }
    }

    /// Creates an empty core using the config's execution mode.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.execution)
    }

    /// Replaces the renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Registers a routine. Routines run in registration order when
    /// sequential; in parallel mode order is unspecified.
    ///
    /// # Errors
    ///
    /// In parallel mode, [`CoreError::WriteConflict`] if the routine writes a
    /// component kind an already registered routine writes.
    pub fn add_routine(&mut self, routine: impl UpdateRoutine + 'static) -> CoreResult<()> {
        if self.execution == ExecutionMode::Parallel {
            let access = routine.access();
            for existing in &self.routines {
                if let Some(component) = existing.access().write_conflict(&access) {
                    return Err(CoreError::WriteConflict {
                        first: existing.name().to_owned(),
                        second: routine.name().to_owned(),
                        component,
                    });
                }
            }
        }
        debug!(routine = routine.name(), "routine registered");
        self.routines.push(Box::new(routine));
        Ok(())
    }

    /// Number of registered routines.
    #[must_use]
    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    /// Configured execution mode.
    #[must_use]
    pub fn execution(&self) -> ExecutionMode {
        self.execution
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advances the simulation by `dt_ms`.
    ///
    /// A stopped core never restarts, so ticking it again is a no-op that
    /// returns an empty report.
    pub fn tick(&mut self, dt_ms: u64) -> CommitReport {
        if !self.is_running() {
            debug!(tick = self.ticks, "core stopped; tick ignored");
            return CommitReport::default();
        }

        let ctx = TickContext {
            dt_ms,
            tick: self.ticks,
            clock_ms: self.elapsed_ms,
            store: &self.store,
            entities: &self.entities,
            ids: &self.ids,
            pending: &self.pending,
        };

        match self.execution {
            ExecutionMode::Parallel => {
                self.routines.par_iter().for_each(|routine| routine.update(&ctx));
            }
            ExecutionMode::Sequential => {
                for routine in &self.routines {
                    routine.update(&ctx);
                }
            }
        }

        self.store.swap_buffers();
        let report = self.commit();

        self.ticks += 1;
        self.elapsed_ms += dt_ms;
        report
    }

    fn commit(&mut self) -> CommitReport {
        let mut report = CommitReport::default();

        for id in self.entities.sweep() {
            report.removed_entities += 1;
            report.removed_components += self.store.remove_components_by_entity(id);
        }

        let (entities, components) = self.pending.drain();
        report.spawned_entities = entities.len();
        self.entities.extend(entities);

        for component in components {
            if self.entities.contains(component.owner()) {
                self.store.add_erased(component);
                report.added_components += 1;
            } else {
                warn!(
                    kind = %component.component_kind(),
                    entity = %component.owner(),
                    "dropping component queued for an entity that is not live"
                );
                report.orphaned_components += 1;
            }
        }

        if report != CommitReport::default() {
            debug!(tick = self.ticks, ?report, "commit");
        }
        report
    }

    /// Hands the published state to the renderer. Does not touch simulation
    /// state.
    pub fn render(&mut self, dt_ms: u64, fraction: f64) {
        self.renderer.render_components(&self.store, dt_ms, fraction);
        self.renderer.finalize_render();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Reacts to a dispatched event. A shutdown-kind event stops the core.
    pub fn process_event<E: SimEvent>(&self, event: &E) {
        if event.kind() == E::SHUTDOWN {
            info!(tick = self.ticks, clock_ms = self.elapsed_ms, "shutdown event received");
            self.running.store(false, Ordering::Release);
        }
    }

    /// Returns whether the core is still running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns a handle that can stop this core from elsewhere.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.running))
    }

    /// Stops the core and shuts the renderer down. Idempotent.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if !self.renderer_closed {
            self.renderer.shutdown();
            self.renderer_closed = true;
            info!(ticks = self.ticks, clock_ms = self.elapsed_ms, "core shut down");
        }
    }

    // =========================================================================
    // World access
    // =========================================================================

    /// Read access to components.
    #[must_use]
    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    /// Direct structural access, for setup between ticks.
    pub fn store_mut(&mut self) -> &mut ComponentStore {
        &mut self.store
    }

    /// Live entities.
    #[must_use]
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// Ticks executed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Simulated milliseconds elapsed.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Queued `(entities, components)` awaiting the next commit.
    #[must_use]
    pub fn pending_len(&self) -> (usize, usize) {
        self.pending.len()
    }

    /// Queues a new entity; it becomes live at the end of the next tick.
    pub fn spawn_entity(&self) -> EntityId {
        let id = self.ids.allocate();
        self.pending.push_entity(Entity::new(id));
        id
    }

    /// Queues a component for the next commit.
    pub fn add_component<T: Component>(&self, component: T) {
        self.pending.push_component(Arc::new(component));
    }

    /// Flags a live or queued entity for removal. Returns `false` if unknown.
    pub fn despawn(&self, id: EntityId) -> bool {
        self.entities.mark_for_removal(id) || self.pending.mark_for_removal(id)
    }

    /// Returns whether `id` is live or queued.
    #[must_use]
    pub fn is_known(&self, id: EntityId) -> bool {
        self.entities.contains(id) || self.pending.contains_entity(id)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Captures the full world state.
    ///
    /// # Errors
    ///
    /// [`CoreError::Snapshot`] if a component cannot be encoded.
    pub fn snapshot(&self) -> CoreResult<WorldSnapshot> {
        let pending_components = self
            .pending
            .components()
            .iter()
            .map(|component| component.to_record())
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(WorldSnapshot {
            next_entity_id: self.ids.peek_next(),
            tick: self.ticks,
            clock_ms: self.elapsed_ms,
            entities: self.entities.records(),
            components: self.store.records()?,
            pending_entities: self.pending.entity_records(),
            pending_components,
        })
    }

    /// Replaces the world with `snapshot`. Routines, renderer and the running
    /// flag are kept.
    ///
    /// Either the whole snapshot is applied or nothing is.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateEntity`] if an id appears twice across live
    ///   and pending entities
    /// - [`CoreError::OrphanComponent`] if a component's owner is neither
    ///   live nor pending
    /// - [`CoreError::StaleAllocator`] if the snapshot's next id is not above
    ///   every entity id it contains
    /// - [`CoreError::Snapshot`] for unknown kinds or undecodable payloads
    pub fn restore(&mut self, snapshot: &WorldSnapshot, registry: &ComponentRegistry) -> CoreResult<()> {
        let mut ids = BTreeSet::new();
        for record in snapshot.entities.iter().chain(&snapshot.pending_entities) {
            if !ids.insert(record.id) {
                warn!(entity = %record.id, "rejecting snapshot with duplicate entity");
                return Err(CoreError::DuplicateEntity(record.id));
            }
        }

        if let Some(orphan) = snapshot
            .components
            .iter()
            .chain(&snapshot.pending_components)
            .find(|record| !ids.contains(&record.entity))
        {
            warn!(kind = %orphan.kind, entity = %orphan.entity, "rejecting snapshot with orphan component");
            return Err(CoreError::OrphanComponent {
                kind: orphan.kind.clone(),
                entity: orphan.entity,
            });
        }

        if let Some(&max_id) = ids.last() {
            if snapshot.next_entity_id <= max_id.raw() {
                return Err(CoreError::StaleAllocator {
                    next: snapshot.next_entity_id,
                    max_id,
                });
            }
        }

        let store = registry.rebuild_store(&snapshot.components)?;
        let pending_components: Vec<Arc<dyn AnyComponent>> =
            registry.decode_all(&snapshot.pending_components)?;

        let mut entities = EntityRegistry::new();
        entities.extend(snapshot.entities.iter().copied().map(Entity::from));
        let pending_entities = snapshot.pending_entities.iter().copied().map(Entity::from).collect();

        self.store = store;
        self.entities = entities;
        self.pending = PendingChanges::from_parts(pending_entities, pending_components);
        self.ids = IdAllocator::starting_at(snapshot.next_entity_id);
        self.ticks = snapshot.tick;
        self.elapsed_ms = snapshot.clock_ms;

        info!(
            entities = self.entities.len(),
            components = self.store.len(),
            tick = self.ticks,
            "world restored"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("execution", &self.execution)
            .field("running", &self.is_running())
            .field("ticks", &self.ticks)
            .field("elapsed_ms", &self.elapsed_ms)
            .field("entities", &self.entities.len())
            .field("components", &self.store.len())
            .field("routines", &self.routines.len())
            .finish_non_exhaustive()
    }
}
