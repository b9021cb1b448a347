//! # LOCKSTEP Core
//!
//! Storage layer of the fixed-step simulation engine:
//! - [`DoubleBuffered`] fields: writers stage, readers see last tick
//! - [`ComponentStore`]: type- and entity-indexed components with cached
//!   per-type queries
//! - Entity identities, the per-instance [`IdAllocator`] and the live
//!   [`EntityRegistry`]
//! - [`ComponentRegistry`]: the discriminator table snapshots are rebuilt with
//!
//! ## Architecture Rules
//!
//! 1. **Structural mutation is exclusive** - add/remove take `&mut self`
//! 2. **Parallel phase is shared** - routines only get `&ComponentStore`
//! 3. **Publishing is explicit** - nothing written this tick is visible
//!    before [`ComponentStore::swap_buffers`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use lockstep_core::{ComponentStore, DoubleBuffered};
//!
//! let mut store = ComponentStore::new();
//! store.add_component(Counter { owner, value: DoubleBuffered::new(0) });
//! store.single_for_type::<Counter>().map(|c| c.value.set(1));
//! store.swap_buffers();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod error;
pub mod sync;

pub use ecs::{
    downcast_component, AnyComponent, Component, ComponentKind, ComponentRecord, ComponentRegistry,
    ComponentStore, Entity, EntityId, EntityRecord, EntityRegistry, IdAllocator,
};
pub use error::{StoreError, StoreResult};
pub use sync::DoubleBuffered;
