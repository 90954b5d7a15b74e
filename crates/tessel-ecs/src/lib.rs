//! Tessel ECS -- archetype-partitioned entity/component storage.
//!
//! Entities are grouped into archetypes, one per exact set of component
//! types, and each archetype stores its components as densely packed byte
//! columns (Structure-of-Arrays). Adding or removing a component migrates the
//! entity's row to a neighbouring archetype along a memoized transition.
//! Generational entity ids make stale handles detectable on every access.
//!
//! Components are plain-old-data: any `bytemuck::Pod + Send + Sync` type
//! works, and byte-level components without a Rust type can be registered by
//! name with [`World::register_dynamic`](world::World::register_dynamic).
//!
//! # Quick Start
//!
//! ```
//! use tessel_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
//! #[repr(C)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
//! #[repr(C)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! world.register_component::<Position>();
//! world.register_component::<Velocity>();
//!
//! let entity = world.spawn();
//! world.set_component(entity, Position { x: 0.0, y: 0.0 });
//! world.set_component(entity, Velocity { dx: 1.0, dy: 0.0 });
//!
//! for (_, (pos, vel)) in world.query::<(&Position, &Velocity)>() {
//!     assert_eq!(pos.x + vel.dx, 1.0);
//! }
//! assert_eq!(world.get_component::<Position>(entity), Some(&Position { x: 0.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod archetype;
pub mod batch;
pub mod component;
pub mod config;
pub mod digest;
pub mod entity;
#[allow(unsafe_code)]
pub mod query;
pub mod signature;
pub mod transition;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Accessors report recoverable conditions as `None` / `false`; these
/// variants surface from the `try_*` APIs and configuration parsing, and
/// form the panic message for the fatal ones (capacity, duplicate
/// component).
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale version or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered")]
    UnknownComponent { name: String },

    /// The entity is live but does not carry the component.
    #[error("entity {entity:?} has no component '{name}'")]
    MissingComponent {
        entity: entity::EntityId,
        name: String,
    },

    /// The same component was named twice in one multi-component request.
    #[error("duplicate component {id:?} in a single multi-component request")]
    DuplicateComponent { id: component::ComponentId },

    /// The component registry is full.
    #[error("component capacity exceeded: at most {limit} component types can be registered")]
    ComponentCapacityExceeded { limit: usize },

    /// The 32-bit entity index space is exhausted.
    #[error("entity capacity exceeded: no entity index left")]
    EntityCapacityExceeded,

    /// A dynamic component was registered with an impossible layout.
    #[error("invalid layout for component '{name}': size {size}, align {align}")]
    InvalidLayout {
        name: String,
        size: usize,
        align: usize,
    },

    /// A world configuration could not be parsed.
    #[error("invalid world config: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry, MAX_COMPONENTS};
    pub use crate::config::WorldConfig;
    pub use crate::digest::WorldStats;
    pub use crate::entity::{EntityId, EntityLocation};
    pub use crate::query::{Query, QueryCursor, QueryItem, QueryIter, QueryIterMut};
    pub use crate::signature::Signature;
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
