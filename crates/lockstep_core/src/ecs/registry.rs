//! # Component Registry
//!
//! An explicit discriminator table: `Component::KIND` -> decoder. Snapshots
//! are rebuilt by looking records up here, never by scanning types at
//! runtime. Register every component type once at startup.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use super::component::{AnyComponent, Component, ComponentRecord};
use super::storage::ComponentStore;
use crate::error::{StoreError, StoreResult};

type DecodeFn = fn(serde_json::Value) -> Result<Arc<dyn AnyComponent>, serde_json::Error>;

fn decode_as<T: Component>(value: serde_json::Value) -> Result<Arc<dyn AnyComponent>, serde_json::Error> {
    let component: T = serde_json::from_value(value)?;
    Ok(Arc::new(component))
}

#[derive(Clone, Copy)]
struct Entry {
    type_id: TypeId,
    decode: DecodeFn,
}

/// Discriminator table for every component type a snapshot may contain.
///
/// ## Usage
///
/// ```rust,ignore
/// let mut registry = ComponentRegistry::new();
/// registry.register::<Position>()?.register::<Velocity>()?;
///
/// let store = registry.rebuild_store(&records)?;
/// ```
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    entries: HashMap<&'static str, Entry>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `T::KIND`.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConflictingComponentKind`] if another type
    /// already claimed the discriminator.
    pub fn register<T: Component>(&mut self) -> StoreResult<&mut Self> {
        let entry = Entry {
            type_id: TypeId::of::<T>(),
            decode: decode_as::<T>,
        };
        match self.entries.get(T::KIND).map(|existing| existing.type_id) {
            Some(type_id) if type_id != entry.type_id => {
                Err(StoreError::ConflictingComponentKind { kind: T::KIND })
            }
            Some(_) => Ok(self),
            None => {
                self.entries.insert(T::KIND, entry);
                Ok(self)
            }
        }
    }

    /// Returns whether `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes one record into a shared component.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownComponentKind`] for an unregistered kind
    /// - [`StoreError::Decode`] if the payload does not fit the type
    /// - [`StoreError::EntityMismatch`] if the payload's owner disagrees
    ///   with the record
    pub fn decode(&self, record: &ComponentRecord) -> StoreResult<Arc<dyn AnyComponent>> {
        let entry = self
            .entries
            .get(record.kind.as_str())
            .ok_or_else(|| StoreError::UnknownComponentKind(record.kind.clone()))?;

        let component = (entry.decode)(record.data.clone()).map_err(|source| StoreError::Decode {
            kind: record.kind.clone(),
            source,
        })?;

        if component.owner() != record.entity {
            return Err(StoreError::EntityMismatch {
                kind: record.kind.clone(),
                record: record.entity,
                decoded: component.owner(),
            });
        }
        Ok(component)
    }

    /// Decodes every record, failing on the first bad one.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn decode_all(&self, records: &[ComponentRecord]) -> StoreResult<Vec<Arc<dyn AnyComponent>>> {
        records.iter().map(|record| self.decode(record)).collect()
    }

    /// Builds a fresh store from records.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode). Nothing is returned on failure.
    pub fn rebuild_store(&self, records: &[ComponentRecord]) -> StoreResult<ComponentStore> {
        let mut store = ComponentStore::new();
        for component in self.decode_all(records)? {
            store.add_erased(component);
        }
        Ok(store)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.entries.keys().collect();
        kinds.sort();
        f.debug_struct("ComponentRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::storage::tests::{Alpha, Beta};
    use crate::EntityId;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Impostor {
        owner: EntityId,
    }

    impl Component for Impostor {
        const KIND: &'static str = "alpha";

        fn entity(&self) -> EntityId {
            self.owner
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register::<Alpha>().unwrap().register::<Beta>().unwrap();
        registry
    }

    #[test]
    fn test_conflicting_kind_rejected() {
        let mut registry = registry();
        assert!(registry.register::<Alpha>().is_ok());
        assert!(matches!(
            registry.register::<Impostor>(),
            Err(StoreError::ConflictingComponentKind { kind: "alpha" })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rebuild_store_from_records() {
        let mut store = ComponentStore::new();
        store.add_component(Alpha::new(1, 7));
        store.add_component(Beta::new(2));

        let records = store.records().unwrap();
        let rebuilt = registry().rebuild_store(&records).unwrap();
        assert_eq!(rebuilt.count_for_type::<Alpha>(), 1);
        assert_eq!(rebuilt.count_for_type::<Beta>(), 1);
        assert_eq!(rebuilt.records().unwrap(), records);
    }

    #[test]
    fn test_unknown_kind_is_hard_error() {
        let record = ComponentRecord {
            kind: "gamma".to_owned(),
            entity: EntityId::new(1),
            data: serde_json::json!({}),
        };
        assert!(matches!(
            registry().decode(&record),
            Err(StoreError::UnknownComponentKind(kind)) if kind == "gamma"
        ));
    }

    #[test]
    fn test_bad_payload_and_owner_mismatch() {
        let bad = ComponentRecord {
            kind: "beta".to_owned(),
            entity: EntityId::new(1),
            data: serde_json::json!({ "owner": 1 }),
        };
        assert!(matches!(registry().decode(&bad), Err(StoreError::Decode { .. })));

        let mismatched = ComponentRecord {
            kind: "beta".to_owned(),
            entity: EntityId::new(1),
            data: serde_json::json!({ "owner": 2, "tag": "x" }),
        };
        assert!(matches!(
            registry().decode(&mismatched),
            Err(StoreError::EntityMismatch { .. })
        ));
    }
}
