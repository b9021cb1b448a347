//! # Update Routines
//!
//! A routine is one unit of per-tick simulation logic. It receives a
//! [`TickContext`]: the tick size, a shared view of the store and the live
//! entities, and a deferred command queue for structural changes.
//!
//! ## Rules
//!
//! 1. Read published state with `DoubleBuffered::get`, stage writes with
//!    `set`/`update`. Writes become visible after the tick's swap.
//! 2. Never spawn or remove directly. Use [`TickContext::spawn`],
//!    [`TickContext::add_component`] and [`TickContext::despawn`]; all of them
//!    take effect in the commit phase, after every routine has finished.
//! 3. Declare every written component kind in [`UpdateRoutine::access`].
//!    Two routines declaring the same written kind cannot be registered
//!    together in parallel mode.

use std::sync::Arc;

use lockstep_core::{
    AnyComponent, Component, ComponentKind, ComponentStore, Entity, EntityId, EntityRegistry,
    IdAllocator,
};
use parking_lot::Mutex;

// =============================================================================
// Access declaration
// =============================================================================

/// Component kinds a routine reads and writes.
///
/// Reads are informational. Only write-write overlaps are conflicts, since
/// every read during a tick sees the previous tick's published values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSet {
    reads: Vec<ComponentKind>,
    writes: Vec<ComponentKind>,
}

impl AccessSet {
    /// Creates an empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a read of `T`.
    #[must_use]
    pub fn reads<T: Component>(mut self) -> Self {
        let kind = ComponentKind::of::<T>();
        if !self.reads.contains(&kind) {
            self.reads.push(kind);
        }
        self
    }

    /// Declares a write of `T`.
    #[must_use]
    pub fn writes<T: Component>(mut self) -> Self {
        let kind = ComponentKind::of::<T>();
        if !self.writes.contains(&kind) {
            self.writes.push(kind);
        }
        self
    }

    /// Declared reads.
    #[must_use]
    pub fn read_kinds(&self) -> &[ComponentKind] {
        &self.reads
    }

    /// Declared writes.
    #[must_use]
    pub fn write_kinds(&self) -> &[ComponentKind] {
        &self.writes
    }

    /// First kind both sets write, if any.
    #[must_use]
    pub fn write_conflict(&self, other: &Self) -> Option<ComponentKind> {
        self.writes.iter().copied().find(|kind| other.writes.contains(kind))
    }
}

// =============================================================================
// Routine trait
// =============================================================================

/// Per-tick simulation logic.
///
/// Routines must be `Send + Sync`: in parallel mode every registered routine
/// runs on the rayon pool against the same shared context.
pub trait UpdateRoutine: Send + Sync {
    /// Name used in logs and conflict errors.
    fn name(&self) -> &str;

    /// Component kinds this routine touches.
    fn access(&self) -> AccessSet {
        AccessSet::default()
    }

    /// Advances this routine's slice of the simulation by one tick.
    fn update(&self, ctx: &TickContext<'_>);
}

/// A routine backed by a closure.
///
/// ```rust
/// use lockstep::{AccessSet, FnRoutine, TickContext};
///
/// let routine = FnRoutine::new("noop", AccessSet::new(), |_ctx: &TickContext<'_>| {});
/// ```
pub struct FnRoutine<F>
where
    F: Fn(&TickContext<'_>) + Send + Sync + 'static,
{
    name: String,
    access: AccessSet,
    f: F,
}

impl<F> FnRoutine<F>
where
    F: Fn(&TickContext<'_>) + Send + Sync + 'static,
{
    /// Wraps `f` under `name` with the given access declaration.
    pub fn new(name: impl Into<String>, access: AccessSet, f: F) -> Self {
        Self {
            name: name.into(),
            access,
            f,
        }
    }
}

impl<F> UpdateRoutine for FnRoutine<F>
where
    F: Fn(&TickContext<'_>) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> AccessSet {
        self.access.clone()
    }

    #[inline]
    fn update(&self, ctx: &TickContext<'_>) {
        (self.f)(ctx);
    }
}

// =============================================================================
// Deferred structural changes
// =============================================================================

/// Entities and components waiting for the next commit phase.
#[derive(Default)]
pub(crate) struct PendingChanges {
    entities: Mutex<Vec<Entity>>,
    components: Mutex<Vec<Arc<dyn AnyComponent>>>,
}

impl PendingChanges {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(entities: Vec<Entity>, components: Vec<Arc<dyn AnyComponent>>) -> Self {
        Self {
            entities: Mutex::new(entities),
            components: Mutex::new(components),
        }
    }

    pub(crate) fn push_entity(&self, entity: Entity) {
        self.entities.lock().push(entity);
    }

    pub(crate) fn push_component(&self, component: Arc<dyn AnyComponent>) {
        self.components.lock().push(component);
    }

    /// Flags a queued entity. Returns `false` if `id` is not queued.
    pub(crate) fn mark_for_removal(&self, id: EntityId) -> bool {
        match self.entities.lock().iter().find(|entity| entity.id() == id) {
            Some(entity) => {
                entity.mark_for_removal();
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.lock().iter().any(|entity| entity.id() == id)
    }

    /// Empties both queues, entities first.
    pub(crate) fn drain(&mut self) -> (Vec<Entity>, Vec<Arc<dyn AnyComponent>>) {
        (
            std::mem::take(self.entities.get_mut()),
            std::mem::take(self.components.get_mut()),
        )
    }

    pub(crate) fn entity_records(&self) -> Vec<lockstep_core::EntityRecord> {
        self.entities.lock().iter().map(Entity::record).collect()
    }

    pub(crate) fn components(&self) -> Vec<Arc<dyn AnyComponent>> {
        self.components.lock().clone()
    }

    pub(crate) fn len(&self) -> (usize, usize) {
        (self.entities.lock().len(), self.components.lock().len())
    }
}

// =============================================================================
// Tick context
// =============================================================================

/// Everything a routine may touch during one tick.
pub struct TickContext<'a> {
    pub(crate) dt_ms: u64,
    pub(crate) tick: u64,
    pub(crate) clock_ms: u64,
    pub(crate) store: &'a ComponentStore,
    pub(crate) entities: &'a EntityRegistry,
    pub(crate) ids: &'a IdAllocator,
    pub(crate) pending: &'a PendingChanges,
}

impl<'a> TickContext<'a> {
    /// Simulated milliseconds this tick advances.
    #[inline]
    #[must_use]
    pub fn dt_ms(&self) -> u64 {
        self.dt_ms
    }

    /// Zero-based index of this tick.
    #[inline]
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated time at the start of this tick.
    #[inline]
    #[must_use]
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// The component store, structurally frozen for the tick.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &'a ComponentStore {
        self.store
    }

    /// Live entities, structurally frozen for the tick.
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &'a EntityRegistry {
        self.entities
    }

    /// Allocates an id and queues a new entity for the commit phase.
    ///
    /// The entity is not visible to any routine during this tick.
    pub fn spawn(&self) -> EntityId {
        let id = self.ids.allocate();
        self.pending.push_entity(Entity::new(id));
        id
    }

    /// Queues a component for the commit phase.
    ///
    /// If its owner is gone by then the component is dropped.
    pub fn add_component<T: Component>(&self, component: T) {
        self.pending.push_component(Arc::new(component));
    }

    /// Flags an entity for removal during the commit phase.
    ///
    /// Returns `false` if `id` is neither live nor queued.
    pub fn despawn(&self, id: EntityId) -> bool {
        self.entities.mark_for_removal(id) || self.pending.mark_for_removal(id)
    }
}

impl std::fmt::Debug for TickContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickContext")
            .field("dt_ms", &self.dt_ms)
            .field("tick", &self.tick)
            .field("clock_ms", &self.clock_ms)
            .field("entities", &self.entities.len())
            .finish_non_exhaustive()
    }
}
