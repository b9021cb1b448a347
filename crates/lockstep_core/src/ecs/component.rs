//! # Component System
//!
//! Components are data owned by exactly one entity. Mutable simulation state
//! lives in [`DoubleBuffered`](crate::DoubleBuffered) fields so that
//! components can be shared (`Arc`) across parallel update routines.
//!
//! Every component type carries a stable discriminator, [`Component::KIND`],
//! used by snapshots instead of runtime type names.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use super::storage::ComponentStore;
use crate::error::{StoreError, StoreResult};

/// Marker trait for components.
///
/// # Example
///
/// ```rust
/// use lockstep_core::{Component, DoubleBuffered, EntityId};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Health {
///     owner: EntityId,
///     points: DoubleBuffered<u32>,
/// }
///
/// impl Component for Health {
///     const KIND: &'static str = "health";
///
///     fn entity(&self) -> EntityId {
///         self.owner
///     }
///
///     fn switch_buffers(&self) {
///         self.points.switch_buffer();
///     }
/// }
/// ```
pub trait Component: Any + Send + Sync + Serialize + DeserializeOwned {
    /// Stable discriminator written into snapshots. Unique per type.
    const KIND: &'static str;

    /// The entity that owns this component.
    fn entity(&self) -> EntityId;

    /// Publishes every buffered field of this component.
    ///
    /// Components without buffered fields keep the default no-op.
    fn switch_buffers(&self) {}
}

/// Type identity plus discriminator of a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKind {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentKind {
    /// Returns the kind of `T`.
    #[inline]
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::KIND,
        }
    }

    /// Returns the Rust type identity.
    #[inline]
    #[must_use]
    pub fn type_id(self) -> TypeId {
        self.type_id
    }

    /// Returns the discriminator.
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKind({})", self.name)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Serializable form of one component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// The component's [`Component::KIND`].
    pub kind: String,
    /// The owning entity.
    pub entity: EntityId,
    /// The component's own serialized fields.
    pub data: serde_json::Value,
}

/// Object-safe view of any [`Component`].
///
/// Used wherever components of different types travel together: the
/// per-entity query, the pending-spawn queue, and snapshots.
pub trait AnyComponent: Any + Send + Sync {
    /// Kind of the concrete type.
    fn component_kind(&self) -> ComponentKind;

    /// The owning entity.
    fn owner(&self) -> EntityId;

    /// Borrow as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Converts into an `Arc<dyn Any>` for [`Arc::downcast`].
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Serializes into a tagged record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if the component cannot be serialized.
    fn to_record(&self) -> StoreResult<ComponentRecord>;

    /// Inserts this component into `store` under its concrete type.
    fn insert_into(self: Arc<Self>, store: &mut ComponentStore);
}

impl<T: Component> AnyComponent for T {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::of::<T>()
    }

    fn owner(&self) -> EntityId {
        self.entity()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn to_record(&self) -> StoreResult<ComponentRecord> {
        let data = serde_json::to_value(self).map_err(|source| StoreError::Encode {
            kind: T::KIND,
            source,
        })?;
        Ok(ComponentRecord {
            kind: T::KIND.to_owned(),
            entity: self.entity(),
            data,
        })
    }

    fn insert_into(self: Arc<Self>, store: &mut ComponentStore) {
        store.add_shared(self);
    }
}

impl fmt::Debug for dyn AnyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyComponent")
            .field("kind", &self.component_kind())
            .field("entity", &self.owner())
            .finish()
    }
}

/// Downcasts a shared erased component to its concrete type.
#[must_use]
pub fn downcast_component<T: Component>(component: Arc<dyn AnyComponent>) -> Option<Arc<T>> {
    component.into_any().downcast::<T>().ok()
}
