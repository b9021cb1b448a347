//! # Entity Management
//!
//! Entities are opaque, monotonically increasing identities plus a
//! "marked for removal" flag. Removal is two-phase: routines flag an entity
//! during a tick, the commit phase sweeps it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for an entity.
///
/// Identities are never reused within one [`IdAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wraps a raw identity.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identity.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out entity identities for one simulation instance.
///
/// Owned by the simulation core instead of living in a process-wide counter,
/// so two simulations never share an id sequence and tests can start from a
/// known value.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first id is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates an allocator whose first id is `next`.
    #[must_use]
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }

    /// Allocates the next identity. Safe to call from parallel routines.
    #[inline]
    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the id the next `allocate` will hand out.
    #[inline]
    #[must_use]
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// An entity: identity plus the removal flag.
///
/// The flag is atomic so that routines running in parallel can request a
/// removal through a shared reference.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    marked_for_removal: AtomicBool,
}

impl Entity {
    /// Creates a live, unflagged entity.
    #[inline]
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self {
            id,
            marked_for_removal: AtomicBool::new(false),
        }
    }

    /// Returns the entity's identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Flags the entity; it is purged during the next commit phase.
    #[inline]
    pub fn mark_for_removal(&self) {
        self.marked_for_removal.store(true, Ordering::Release);
    }

    /// Returns whether the entity is flagged for removal.
    #[inline]
    #[must_use]
    pub fn is_marked_for_removal(&self) -> bool {
        self.marked_for_removal.load(Ordering::Acquire)
    }

    /// Snapshot form of this entity.
    #[must_use]
    pub fn record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id,
            marked_for_removal: self.is_marked_for_removal(),
        }
    }
}

impl From<EntityRecord> for Entity {
    fn from(record: EntityRecord) -> Self {
        let entity = Self::new(record.id);
        if record.marked_for_removal {
            entity.mark_for_removal();
        }
        entity
    }
}

/// Serializable form of an [`Entity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity identity.
    pub id: EntityId,
    /// Whether the entity was flagged for removal when captured.
    pub marked_for_removal: bool,
}

/// The live entity list.
///
/// Entities are kept sorted by id: new ids are always larger than existing
/// ones and the sweep compacts in place, so lookups are a binary search.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities (flagged ones included until swept).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns whether there are no live entities.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Appends entities, keeping the list sorted by id.
    pub fn extend<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = Entity>,
    {
        let before = self.entities.len();
        self.entities.extend(entities);
        let appended_in_order = self.entities[before.saturating_sub(1)..]
            .windows(2)
            .all(|pair| pair[0].id < pair[1].id);
        if !appended_in_order {
            self.entities.sort_by_key(Entity::id);
        }
    }

    /// Looks up a live entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities
            .binary_search_by_key(&id, Entity::id)
            .ok()
            .map(|index| &self.entities[index])
    }

    /// Returns whether `id` is in the live list.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Flags `id` for removal. Returns `false` if it is not live.
    pub fn mark_for_removal(&self, id: EntityId) -> bool {
        match self.get(id) {
            Some(entity) => {
                entity.mark_for_removal();
                true
            }
            None => false,
        }
    }

    /// Removes every flagged entity, compacting the list.
    ///
    /// Returns the removed ids in ascending order so the caller can purge
    /// their components.
    pub fn sweep(&mut self) -> Vec<EntityId> {
        let mut removed = Vec::new();
        self.entities.retain(|entity| {
            if entity.is_marked_for_removal() {
                removed.push(entity.id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Iterates over live entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Snapshot records in id order.
    #[must_use]
    pub fn records(&self) -> Vec<EntityRecord> {
        self.entities.iter().map(Entity::record).collect()
    }
}
