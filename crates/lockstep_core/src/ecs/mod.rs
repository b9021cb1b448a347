//! # Entity Component Storage
//!
//! ## Design Philosophy
//!
//! - Entities are plain monotonically increasing ids with a removal flag
//! - Components are shared (`Arc`) and mutate only through buffered fields
//! - Structural changes need `&mut`, queries need `&`: the borrow checker
//!   keeps the commit phase and the parallel update phase apart
//! - Snapshots are tagged with explicit discriminators

mod component;
mod entity;
mod registry;
mod storage;

pub use component::{downcast_component, AnyComponent, Component, ComponentKind, ComponentRecord};
pub use entity::{Entity, EntityId, EntityRecord, EntityRegistry, IdAllocator};
pub use registry::ComponentRegistry;
pub use storage::ComponentStore;
