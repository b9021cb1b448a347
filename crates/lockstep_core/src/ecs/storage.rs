//! # Component Storage
//!
//! Components are bucketed by type, then by owning entity:
//!
//! ```text
//! ComponentStore
//!   └─ TypeId ─> Bucket<T>
//!                  ├─ BTreeMap<EntityId, Vec<Arc<T>>>   (several per entity allowed)
//!                  ├─ generation                        (bumped on add/remove)
//!                  └─ query cache (generation, Arc<[Arc<T>]>)
//! ```
//!
//! A cached per-type query remembers the bucket generation it was built at
//! and rebuilds itself lazily once the generation moves. Mutating one type
//! never touches another type's cache.
//!
//! Structural mutation needs `&mut ComponentStore`; the parallel update phase
//! only ever holds `&ComponentStore`, so the two cannot overlap.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::component::{AnyComponent, Component, ComponentKind, ComponentRecord};
use super::entity::EntityId;
use crate::error::{StoreError, StoreResult};

/// Cached flat view of one bucket.
struct QueryCache<T> {
    generation: u64,
    items: Arc<[Arc<T>]>,
}

/// Storage for one component type.
struct Bucket<T: Component> {
    by_entity: BTreeMap<EntityId, Vec<Arc<T>>>,
    len: usize,
    generation: u64,
    cache: Mutex<Option<QueryCache<T>>>,
}

impl<T: Component> Bucket<T> {
    fn new() -> Self {
        Self {
            by_entity: BTreeMap::new(),
            len: 0,
            generation: 0,
            cache: Mutex::new(None),
        }
    }

    fn push(&mut self, component: Arc<T>) {
        self.by_entity
            .entry(component.entity())
            .or_default()
            .push(component);
        self.len += 1;
        self.generation += 1;
    }

    fn all(&self) -> Arc<[Arc<T>]> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.generation == self.generation {
                return Arc::clone(&cached.items);
            }
        }

        let items: Arc<[Arc<T>]> = self.by_entity.values().flatten().cloned().collect();
        *cache = Some(QueryCache {
            generation: self.generation,
            items: Arc::clone(&items),
        });
        items
    }
}

/// Object-safe operations the store runs across every bucket.
trait ErasedBucket: Send + Sync {
    fn kind(&self) -> ComponentKind;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    fn remove_entity(&mut self, id: EntityId) -> usize;
    fn collect_entity(&self, id: EntityId, out: &mut Vec<Arc<dyn AnyComponent>>);
    fn switch_buffers(&self);
    fn records(&self, out: &mut Vec<ComponentRecord>) -> StoreResult<()>;
}

impl<T: Component> ErasedBucket for Bucket<T> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.len
    }

    fn remove_entity(&mut self, id: EntityId) -> usize {
        let removed = self.by_entity.remove(&id).map_or(0, |list| list.len());
        if removed > 0 {
            self.len -= removed;
            self.generation += 1;
        }
        removed
    }

    fn collect_entity(&self, id: EntityId, out: &mut Vec<Arc<dyn AnyComponent>>) {
        if let Some(list) = self.by_entity.get(&id) {
            out.extend(list.iter().map(|c| Arc::clone(c) as Arc<dyn AnyComponent>));
        }
    }

    fn switch_buffers(&self) {
        for component in self.by_entity.values().flatten() {
            component.switch_buffers();
        }
    }

    fn records(&self, out: &mut Vec<ComponentRecord>) -> StoreResult<()> {
        for component in self.by_entity.values().flatten() {
            out.push(component.to_record()?);
        }
        Ok(())
    }
}

/// Type- and entity-indexed component storage.
///
/// # Example
///
/// ```rust,ignore
/// let mut store = ComponentStore::new();
/// store.add_component(Position::at(entity, 0.0, 0.0));
///
/// for position in store.all_for_type::<Position>().iter() {
///     // ...
/// }
/// store.swap_buffers();
/// ```
#[derive(Default)]
pub struct ComponentStore {
    buckets: HashMap<TypeId, Box<dyn ErasedBucket>>,
}

impl ComponentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket<T: Component>(&self) -> Option<&Bucket<T>> {
        self.buckets
            .get(&TypeId::of::<T>())
            .and_then(|bucket| bucket.as_any().downcast_ref::<Bucket<T>>())
    }

    fn bucket_mut<T: Component>(&mut self) -> &mut Bucket<T> {
        let bucket = self
            .buckets
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Bucket::<T>::new()) as Box<dyn ErasedBucket>);
        match bucket.as_any_mut().downcast_mut::<Bucket<T>>() {
            Some(bucket) => bucket,
            None => unreachable!("bucket stored under the TypeId of another type"),
        }
    }

    /// Buckets in discriminator order, for deterministic output.
    fn sorted_buckets(&self) -> Vec<&dyn ErasedBucket> {
        let mut buckets: Vec<&dyn ErasedBucket> = self.buckets.values().map(|bucket| &**bucket).collect();
        buckets.sort_by_key(|bucket| bucket.kind().name());
        buckets
    }

    // =========================================================================
    // Structural mutation (commit phase only)
    // =========================================================================

    /// Appends `component` to its (type, entity) bucket.
    pub fn add_component<T: Component>(&mut self, component: T) {
        self.add_shared(Arc::new(component));
    }

    /// Appends an already shared component.
    pub fn add_shared<T: Component>(&mut self, component: Arc<T>) {
        self.bucket_mut::<T>().push(component);
    }

    /// Appends several components of one type.
    pub fn add_components<T, I>(&mut self, components: I)
    where
        T: Component,
        I: IntoIterator<Item = T>,
    {
        let bucket = self.bucket_mut::<T>();
        for component in components {
            bucket.push(Arc::new(component));
        }
    }

    /// Appends a type-erased component under its concrete type.
    pub fn add_erased(&mut self, component: Arc<dyn AnyComponent>) {
        component.insert_into(self);
    }

    /// Removes every component owned by `id`, across all types.
    ///
    /// Returns the number of components removed.
    pub fn remove_components_by_entity(&mut self, id: EntityId) -> usize {
        self.buckets
            .values_mut()
            .map(|bucket| bucket.remove_entity(id))
            .sum()
    }

    /// Drops the whole bucket of type `T`.
    ///
    /// Returns the number of components removed.
    pub fn remove_components_by_type<T: Component>(&mut self) -> usize {
        self.buckets
            .remove(&TypeId::of::<T>())
            .map_or(0, |bucket| bucket.len())
    }

    /// Removes the components of type `T` owned by `id`.
    ///
    /// Returns the number of components removed.
    pub fn remove_components_by_entity_and_type<T: Component>(&mut self, id: EntityId) -> usize {
        self.buckets
            .get_mut(&TypeId::of::<T>())
            .map_or(0, |bucket| bucket.remove_entity(id))
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    // =========================================================================
    // Queries (safe from parallel routines)
    // =========================================================================

    /// Returns every component owned by `id`, grouped by kind in
    /// discriminator order.
    #[must_use]
    pub fn all_for_entity(&self, id: EntityId) -> Vec<Arc<dyn AnyComponent>> {
        let mut out = Vec::new();
        for bucket in self.sorted_buckets() {
            bucket.collect_entity(id, &mut out);
        }
        out
    }

    /// Returns all components of type `T` across all entities, in entity
    /// order.
    ///
    /// The result is cached until the next add/remove touching `T`; calling
    /// this repeatedly between mutations returns the same allocation.
    #[must_use]
    pub fn all_for_type<T: Component>(&self) -> Arc<[Arc<T>]> {
        match self.bucket::<T>() {
            Some(bucket) => bucket.all(),
            None => Arc::from(Vec::new()),
        }
    }

    /// Returns the components of type `T` owned by `id`.
    #[must_use]
    pub fn for_entity_and_type<T: Component>(&self, id: EntityId) -> &[Arc<T>] {
        self.bucket::<T>()
            .and_then(|bucket| bucket.by_entity.get(&id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the unique component of type `T`.
    ///
    /// Zero or several matches are a lookup failure: logged, never fatal.
    #[must_use]
    pub fn single_for_type<T: Component>(&self) -> Option<Arc<T>> {
        let all = self.all_for_type::<T>();
        if let [single] = &all[..] {
            return Some(Arc::clone(single));
        }
        tracing::warn!(
            kind = T::KIND,
            count = all.len(),
            "expected exactly one component of this kind"
        );
        None
    }

    /// Number of components of type `T`.
    #[must_use]
    pub fn count_for_type<T: Component>(&self) -> usize {
        self.bucket::<T>().map_or(0, |bucket| bucket.len)
    }

    /// Structural generation of type `T`; moves on every add/remove of `T`.
    #[must_use]
    pub fn generation_of<T: Component>(&self) -> u64 {
        self.bucket::<T>().map_or(0, |bucket| bucket.generation)
    }

    /// Total number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.len()).sum()
    }

    /// Returns whether the store holds no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kinds that currently have a bucket, in discriminator order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ComponentKind> {
        self.sorted_buckets().iter().map(|bucket| bucket.kind()).collect()
    }

    // =========================================================================
    // Tick boundary
    // =========================================================================

    /// Publishes the buffered fields of every stored component.
    ///
    /// Requires exclusive access: the update barrier must already be passed.
    pub fn swap_buffers(&mut self) {
        for bucket in self.buckets.values() {
            bucket.switch_buffers();
        }
    }

    /// Serializes every component, ordered by kind, entity, then insertion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConflictingComponentKind`] if two stored types
    /// share a discriminator, and [`StoreError::Encode`] if a component fails
    /// to serialize.
    pub fn records(&self) -> StoreResult<Vec<ComponentRecord>> {
        let buckets = self.sorted_buckets();
        // Equal kinds sort next to each other in hash order.
        if let Some(pair) = buckets
            .windows(2)
            .find(|pair| pair[0].kind().name() == pair[1].kind().name())
        {
            let kind = pair[0].kind().name();
            tracing::warn!(kind, "two component types share a discriminator");
            return Err(StoreError::ConflictingComponentKind { kind });
        }

        let mut out = Vec::with_capacity(self.len());
        for bucket in buckets {
            bucket.records(&mut out)?;
        }
        Ok(out)
    }
}

impl std::fmt::Debug for ComponentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for bucket in self.sorted_buckets() {
            map.entry(&bucket.kind().name(), &bucket.len());
        }
        map.finish()
    }
}
