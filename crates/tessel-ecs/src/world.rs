//! The [`World`] is the top-level container. It owns the component registry,
//! the entity table, the archetype arena and the transition cache, and
//! provides the entity lifecycle and single-entity component API.
//!
//! Every accessor is non-failing: a stale handle or an unregistered
//! component yields `None` / `false` rather than an error. Batched forms of
//! the mutations live in [`batch`](crate::batch); iteration lives in
//! [`query`](crate::query).

use std::collections::HashSet;

use tracing::debug;

use crate::archetype::{copy_row, Archetype, ArchetypeId, Archetypes};
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::config::WorldConfig;
use crate::entity::{EntityId, EntityLocation, EntityTable};
use crate::transition::{TransitionCache, TransitionKind};
use crate::EcsError;

/// The top-level store.
///
/// A single owner mutates it through `&mut self`; there is no internal
/// locking. Hosts that share a world across threads wrap it in their own
/// lock.
pub struct World {
    config: WorldConfig,
    pub(crate) registry: ComponentRegistry,
    pub(crate) entities: EntityTable,
    pub(crate) archetypes: Archetypes,
    pub(crate) transitions: TransitionCache,
    /// Handles queued by [`queue_despawn`](Self::queue_despawn).
    pending_despawns: Vec<EntityId>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entities.len())
            .field("archetype_count", &self.archetypes.len())
            .field("component_count", &self.registry.len())
            .finish()
    }
}

impl World {
    /// Create an empty world with default settings.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create an empty world sized by `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`WorldConfig::validate`].
    pub fn with_config(config: WorldConfig) -> Self {
        Self::try_with_config(config).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`with_config`](Self::with_config), returning the validation
    /// error instead of panicking.
    pub fn try_with_config(config: WorldConfig) -> Result<Self, EcsError> {
        config.validate()?;
        Ok(Self {
            registry: ComponentRegistry::new(),
            entities: EntityTable::with_capacity(config.initial_entity_capacity),
            archetypes: Archetypes::new(config.initial_row_capacity),
            transitions: TransitionCache::new(),
            pending_despawns: Vec::new(),
            config,
        })
    }

    /// Settings this world was built with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // -- registration -------------------------------------------------------

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register a component type. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if more than 256 distinct component types are registered.
    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.registry.register::<T>()
    }

    /// Fallible form of [`register_component`](Self::register_component).
    pub fn try_register_component<T: Component>(&mut self) -> Result<ComponentId, EcsError> {
        self.registry.try_register::<T>()
    }

    /// Register a byte-level component by name. Idempotent per name.
    ///
    /// # Panics
    ///
    /// Panics on an invalid layout or when the registry is full.
    pub fn register_dynamic(&mut self, name: &str, size: usize, align: usize) -> ComponentId {
        self.registry.register_dynamic(name, size, align)
    }

    /// Id of a registered Rust type.
    #[inline]
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.registry.lookup::<T>()
    }

    // -- introspection ------------------------------------------------------

    /// The archetype arena.
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    /// Total number of archetypes, including the empty one.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Counter that changes whenever a new archetype is created.
    #[inline]
    pub fn shape_version(&self) -> u64 {
        self.archetypes.shape_version()
    }

    /// The transition cache.
    pub fn transitions(&self) -> &TransitionCache {
        &self.transitions
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Whether `entity` is a live, current handle.
    #[inline]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Where a live entity's row sits.
    #[inline]
    pub fn location(&self, entity: EntityId) -> Option<EntityLocation> {
        self.entities.location(entity)
    }

    /// The archetype currently holding `entity`.
    pub fn archetype_of(&self, entity: EntityId) -> Option<&Archetype> {
        let loc = self.entities.location(entity)?;
        Some(&self.archetypes[loc.archetype])
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create an entity with no components.
    pub fn spawn(&mut self) -> EntityId {
        let empty = self.archetypes.get_mut(ArchetypeId::EMPTY);
        let row = empty.len();
        let entity = self.entities.allocate(EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row,
        });
        let pushed = empty.push_row(entity);
        debug_assert_eq!(pushed, row);
        entity
    }

    /// Create `count` entities with no components, growing storage once.
    pub fn spawn_batch(&mut self, count: usize) -> Vec<EntityId> {
        self.entities.reserve(count);
        let empty = self.archetypes.get_mut(ArchetypeId::EMPTY);
        empty.reserve_rows(count);
        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            let row = empty.len();
            let entity = self.entities.allocate(EntityLocation {
                archetype: ArchetypeId::EMPTY,
                row,
            });
            empty.push_row(entity);
            spawned.push(entity);
        }
        spawned
    }

    /// Destroy an entity and recycle its slot.
    ///
    /// Returns `false` (and does nothing) for a stale or unknown handle.
    /// Do not call this while a [`QueryCursor`](crate::query::QueryCursor)
    /// pass is in flight; use [`queue_despawn`](Self::queue_despawn) instead.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        let Some(loc) = self.entities.free(entity) else {
            return false;
        };
        if let Some(moved) = self.archetypes.get_mut(loc.archetype).swap_remove(loc.row) {
            self.entities.set_row(moved, loc.row);
        }
        true
    }

    /// Defer the despawn of `entity` until [`flush_despawns`](Self::flush_despawns).
    ///
    /// Safe to call between cursor steps: nothing moves until the flush.
    pub fn queue_despawn(&mut self, entity: EntityId) {
        self.pending_despawns.push(entity);
    }

    /// Number of queued despawns.
    pub fn pending_despawns(&self) -> usize {
        self.pending_despawns.len()
    }

    /// Despawn every queued entity that is still live; returns how many were removed.
    ///
    /// Handles that went stale after being queued, and repeats of the same
    /// handle, are skipped.
    pub fn flush_despawns(&mut self) -> usize {
        let queued = std::mem::take(&mut self.pending_despawns);
        let mut seen = HashSet::with_capacity(queued.len());
        let mut live = Vec::with_capacity(queued.len());
        for entity in queued {
            if !self.entities.is_alive(entity) {
                debug!(%entity, "skipping queued despawn of stale entity");
                continue;
            }
            if seen.insert(entity) {
                live.push(entity);
            } else {
                debug!(%entity, "skipping repeated queued despawn");
            }
        }
        self.despawn_batch(&live)
    }

    // -- component access (by id) -------------------------------------------

    /// Whether `entity` currently has component `id`.
    pub fn has_by_id(&self, entity: EntityId, id: ComponentId) -> bool {
        self.archetype_of(entity)
            .is_some_and(|arch| arch.has_component(id))
    }

    /// Bytes of component `id` on `entity`.
    pub fn get_by_id(&self, entity: EntityId, id: ComponentId) -> Option<&[u8]> {
        let loc = self.entities.location(entity)?;
        self.archetypes[loc.archetype].bytes(loc.row, id)
    }

    /// Mutable bytes of component `id` on `entity`.
    pub fn get_by_id_mut(&mut self, entity: EntityId, id: ComponentId) -> Option<&mut [u8]> {
        let loc = self.entities.location(entity)?;
        self.archetypes.get_mut(loc.archetype).bytes_mut(loc.row, id)
    }

    /// Ensure `entity` has component `id`, returning its bytes.
    ///
    /// An existing value is returned untouched; a newly added one is all
    /// zeroes. The slice is valid until the next structural change.
    pub fn add_by_id(&mut self, entity: EntityId, id: ComponentId) -> Option<&mut [u8]> {
        if !self.registry.contains(id) {
            return None;
        }
        let mut loc = self.entities.location(entity)?;
        if !self.archetypes[loc.archetype].has_component(id) {
            loc = self.migrate(entity, loc, id, TransitionKind::Add);
        }
        self.archetypes.get_mut(loc.archetype).bytes_mut(loc.row, id)
    }

    /// Add component `id` if missing and overwrite it with `bytes`.
    ///
    /// Returns `false` for a stale handle, an unregistered component or a
    /// byte length that does not match the component's size.
    pub fn set_by_id(&mut self, entity: EntityId, id: ComponentId, bytes: &[u8]) -> bool {
        if self.registry.size_of(id) != Some(bytes.len()) {
            return false;
        }
        match self.add_by_id(entity, id) {
            Some(slot) => {
                slot.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Remove component `id` from `entity`.
    ///
    /// Returns `true` when the entity ends up without the component,
    /// including when it never had it; `false` for a stale handle or an
    /// unregistered component.
    pub fn remove_by_id(&mut self, entity: EntityId, id: ComponentId) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        let Some(loc) = self.entities.location(entity) else {
            return false;
        };
        if self.archetypes[loc.archetype].has_component(id) {
            self.migrate(entity, loc, id, TransitionKind::Remove);
        }
        true
    }

    // -- component access (typed) -------------------------------------------

    /// Whether `entity` has a `T`.
    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        self.registry
            .lookup::<T>()
            .is_some_and(|id| self.has_by_id(entity, id))
    }

    /// Shared reference to `entity`'s `T`.
    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let id = self.registry.lookup::<T>()?;
        self.get_by_id(entity, id).map(bytemuck::from_bytes)
    }

    /// Mutable reference to `entity`'s `T`.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let id = self.registry.lookup::<T>()?;
        self.get_by_id_mut(entity, id).map(bytemuck::from_bytes_mut)
    }

    /// Like [`get_component`](Self::get_component), but says why nothing was found.
    pub fn try_get_component<T: Component>(&self, entity: EntityId) -> Result<&T, EcsError> {
        let id = self
            .registry
            .lookup::<T>()
            .ok_or_else(|| EcsError::UnknownComponent {
                name: std::any::type_name::<T>().to_owned(),
            })?;
        let loc = self
            .entities
            .location(entity)
            .ok_or(EcsError::StaleEntity { entity })?;
        self.archetypes[loc.archetype]
            .bytes(loc.row, id)
            .map(bytemuck::from_bytes)
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                name: self.registry.name_of(id).to_owned(),
            })
    }

    /// Ensure `entity` has a `T` and return it; a new `T` is zeroed.
    ///
    /// Adding a component the entity already has is not an error: the
    /// existing value is returned.
    pub fn add_component<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let id = self.registry.lookup::<T>()?;
        self.add_by_id(entity, id).map(bytemuck::from_bytes_mut)
    }

    /// Add or overwrite `entity`'s `T`.
    pub fn set_component<T: Component>(&mut self, entity: EntityId, value: T) -> bool {
        match self.registry.lookup::<T>() {
            Some(id) => self.set_by_id(entity, id, bytemuck::bytes_of(&value)),
            None => false,
        }
    }

    /// Remove `entity`'s `T`. See [`remove_by_id`](Self::remove_by_id).
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> bool {
        match self.registry.lookup::<T>() {
            Some(id) => self.remove_by_id(entity, id),
            None => false,
        }
    }

    // -- migration ----------------------------------------------------------

    /// Move `entity` across the `(component, kind)` edge out of `from`.
    ///
    /// Appends a zeroed row in the target archetype, copies the retained
    /// columns, swap-removes the source row (patching whichever entity moved
    /// into it) and records the new location.
    pub(crate) fn migrate(
        &mut self,
        entity: EntityId,
        from: EntityLocation,
        component: ComponentId,
        kind: TransitionKind,
    ) -> EntityLocation {
        let transition = self.transitions.resolve(
            &mut self.archetypes,
            &self.registry,
            from.archetype,
            component,
            kind,
        );
        let target = transition.target();
        let (src, dst) = self.archetypes.pair_mut(from.archetype, target);

        let row = dst.push_row(entity);
        copy_row(src, from.row, dst, row, transition.copies());
        if let Some(moved) = src.swap_remove(from.row) {
            self.entities.set_row(moved, from.row);
        }

        let to = EntityLocation {
            archetype: target,
            row,
        };
        self.entities.set_location(entity, to);
        to
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck_derive::{Pod, Zeroable};

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Health(u32);

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Unregistered(u8);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Pos>();
        world.register_component::<Vel>();
        world.register_component::<Health>();
        world
    }

    #[test]
    fn spawn_lands_in_empty_archetype() {
        let mut world = setup_world();
        let e = world.spawn();
        assert!(world.is_alive(e));
        assert_eq!(e.version(), 1);
        assert_eq!(
            world.location(e),
            Some(EntityLocation {
                archetype: ArchetypeId::EMPTY,
                row: 0
            })
        );
        assert_eq!(world.archetype_count(), 1);
    }

    #[test]
    fn set_and_get() {
        let mut world = setup_world();
        let e = world.spawn();
        assert!(world.set_component(e, Pos { x: 1.0, y: 2.0 }));
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        assert!(!world.has_component::<Vel>(e));
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut world = setup_world();
        let e = world.spawn();
        world.set_component(e, Health(10));
        let archetypes = world.archetype_count();
        world.set_component(e, Health(20));
        assert_eq!(world.get_component::<Health>(e), Some(&Health(20)));
        assert_eq!(world.archetype_count(), archetypes);
    }

    #[test]
    fn add_component_is_zeroed_then_idempotent() {
        let mut world = setup_world();
        let e = world.spawn();
        let vel = world.add_component::<Vel>(e).unwrap();
        assert_eq!(*vel, Vel { dx: 0.0, dy: 0.0 });
        vel.dx = 5.0;
        let again = world.add_component::<Vel>(e).unwrap();
        assert_eq!(again.dx, 5.0, "second add returns the existing value");
    }

    #[test]
    fn migration_preserves_other_components() {
        let mut world = setup_world();
        let e = world.spawn();
        world.set_component(e, Pos { x: 1.0, y: 2.0 });
        world.set_component(e, Vel { dx: 3.0, dy: 4.0 });
        world.add_component::<Health>(e);
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { dx: 3.0, dy: 4.0 }));
        assert_eq!(world.get_component::<Health>(e), Some(&Health(0)));

        assert!(world.remove_component::<Pos>(e));
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { dx: 3.0, dy: 4.0 }));
        assert_eq!(world.get_component::<Pos>(e), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut world = setup_world();
        let e = world.spawn();
        world.set_component(e, Pos { x: 0.0, y: 0.0 });
        world.set_component(e, Vel { dx: 1.0, dy: 1.0 });
        assert!(world.remove_component::<Vel>(e));
        let misses = world.transitions().misses();
        let hits = world.transitions().hits();
        let loc = world.location(e);
        assert!(world.remove_component::<Vel>(e));
        assert_eq!(world.location(e), loc, "second remove must not migrate");
        assert_eq!(world.transitions().misses(), misses);
        assert_eq!(world.transitions().hits(), hits);
    }

    #[test]
    fn swap_remove_patches_moved_neighbour() {
        let mut world = setup_world();
        let a = world.spawn();
        let b = world.spawn();
        let c = world.spawn();
        for (e, x) in [(a, 1.0), (b, 2.0), (c, 3.0)] {
            world.set_component(e, Pos { x, y: 0.0 });
        }
        // Moving `a` out pulls `c` into row 0 of the {Pos} archetype.
        world.set_component(a, Vel { dx: 0.0, dy: 0.0 });
        assert_eq!(world.location(c).unwrap().row, 0);
        assert_eq!(world.get_component::<Pos>(c), Some(&Pos { x: 3.0, y: 0.0 }));
        assert_eq!(world.get_component::<Pos>(b), Some(&Pos { x: 2.0, y: 0.0 }));
        assert_eq!(world.get_component::<Pos>(a), Some(&Pos { x: 1.0, y: 0.0 }));
    }

    #[test]
    fn despawn_and_stale_handles() {
        let mut world = setup_world();
        let e = world.spawn();
        world.set_component(e, Health(7));
        assert!(world.despawn(e));
        assert!(!world.is_alive(e));
        assert!(!world.despawn(e));
        assert_eq!(world.get_component::<Health>(e), None);
        assert!(!world.set_component(e, Health(1)));
        assert!(!world.remove_component::<Health>(e));

        let reused = world.spawn();
        assert_eq!(reused.index(), e.index());
        assert_ne!(reused.version(), e.version());
        assert!(!world.is_alive(e));
        assert!(matches!(
            world.try_get_component::<Health>(e),
            Err(EcsError::StaleEntity { .. })
        ));
    }

    #[test]
    fn unregistered_component_is_absent() {
        let mut world = setup_world();
        let e = world.spawn();
        assert!(world.add_component::<Unregistered>(e).is_none());
        assert!(!world.set_component(e, Unregistered(1)));
        assert!(!world.remove_component::<Unregistered>(e));
        assert!(matches!(
            world.try_get_component::<Unregistered>(e),
            Err(EcsError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn try_get_reports_missing_component() {
        let mut world = setup_world();
        let e = world.spawn();
        let err = world.try_get_component::<Pos>(e).unwrap_err();
        assert!(matches!(err, EcsError::MissingComponent { entity, .. } if entity == e));
    }

    #[test]
    fn set_by_id_checks_length() {
        let mut world = setup_world();
        let blob = world.register_dynamic("blob", 3, 1);
        let e = world.spawn();
        assert!(!world.set_by_id(e, blob, &[1, 2]));
        assert!(!world.has_by_id(e, blob));
        assert!(world.set_by_id(e, blob, &[1, 2, 3]));
        assert_eq!(world.get_by_id(e, blob), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn spawn_batch_allocates_contiguous_rows() {
        let mut world = setup_world();
        let first = world.spawn();
        let batch = world.spawn_batch(5);
        assert_eq!(batch.len(), 5);
        for (i, &e) in batch.iter().enumerate() {
            assert_eq!(world.location(e).unwrap().row, i + 1);
        }
        assert_eq!(world.archetypes()[ArchetypeId::EMPTY].entities()[0], first);
        assert_eq!(world.entity_count(), 6);
    }

    #[test]
    fn queued_despawns_apply_on_flush() {
        let mut world = setup_world();
        let es = world.spawn_batch(4);
        world.queue_despawn(es[1]);
        world.queue_despawn(es[1]);
        world.queue_despawn(es[3]);
        assert_eq!(world.pending_despawns(), 3);
        assert!(world.is_alive(es[1]), "nothing happens before the flush");

        // Invalidated between queue and flush: skipped.
        world.despawn(es[3]);

        assert_eq!(world.flush_despawns(), 1);
        assert_eq!(world.pending_despawns(), 0);
        assert!(!world.is_alive(es[1]));
        assert!(world.is_alive(es[0]) && world.is_alive(es[2]));
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn oversized_config_is_rejected_before_allocating() {
        let config = WorldConfig {
            initial_entity_capacity: usize::MAX,
            ..WorldConfig::default()
        };
        let err = World::try_with_config(config).unwrap_err();
        assert!(matches!(err, EcsError::Config(_)));

        let world = World::try_with_config(WorldConfig::default()).unwrap();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    #[should_panic(expected = "invalid world config")]
    fn with_config_panics_on_oversized_capacity() {
        let _ = World::with_config(WorldConfig {
            initial_row_capacity: usize::MAX,
            ..WorldConfig::default()
        });
    }
}
