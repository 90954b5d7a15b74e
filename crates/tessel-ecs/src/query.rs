//! Query system for iterating entities by component set.
//!
//! A [`QueryCursor`] selects every archetype whose signature is a superset of
//! an *include* set and disjoint from an *exclude* set, then walks their
//! rows. Because a matching archetype is guaranteed to store every included
//! component, per-row access is a direct column index: the column slot of
//! each requested component is resolved once per archetype, never per row.
//!
//! The cursor owns no borrow of the [`World`]; every step takes the world as
//! an argument. That lets a caller interleave `next` with
//! [`World::queue_despawn`] and flush after the pass. Structural changes
//! (migrations, despawns) during a pass are not supported and can trip the
//! column bounds check.
//!
//! [`World::query`] wraps a cursor in an iterator over typed tuples:
//!
//! ```ignore
//! for (entity, (pos, vel)) in world.query::<(&Pos, &Vel)>() {
//!     println!("{entity}: pos={pos:?} vel={vel:?}");
//! }
//! ```
//!
//! [`World::query_mut`] takes the world exclusively and also accepts `&mut T`
//! items. A component may appear only once per tuple; repeating it panics.

use std::any::TypeId;
use std::marker::PhantomData;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentId};
use crate::entity::EntityId;
use crate::signature::Signature;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// QueryCursor
// ---------------------------------------------------------------------------

/// Restartable row cursor over the archetypes matching an include/exclude pair.
#[derive(Debug, Clone)]
pub struct QueryCursor {
    /// Requested components; `field` arguments index into this.
    include: Vec<ComponentId>,
    include_signature: Signature,
    exclude_signature: Signature,
    matched: Vec<ArchetypeId>,
    /// World shape version `matched` was built against.
    shape_version: u64,
    /// Position in `matched`.
    arch_cursor: usize,
    /// Row the next call to `next` visits.
    next_row: usize,
    /// Row the cursor is positioned on.
    current: Option<usize>,
    /// Column slot of each `include` entry in the current archetype.
    slots: Vec<usize>,
}

impl QueryCursor {
    fn new(world: &World, include: &[ComponentId], exclude: &[ComponentId]) -> Self {
        let mut include_signature = Signature::EMPTY;
        for &id in include {
            if include_signature.contains(id) {
                panic!("{}", EcsError::DuplicateComponent { id });
            }
            include_signature.set(id);
        }
        let mut cursor = Self {
            include: include.to_vec(),
            include_signature,
            exclude_signature: Signature::from_ids(exclude),
            matched: Vec::new(),
            shape_version: 0,
            arch_cursor: 0,
            next_row: 0,
            current: None,
            slots: Vec::with_capacity(include.len()),
        };
        cursor.rebuild(world);
        cursor
    }

    /// A cursor that matches nothing.
    pub fn empty() -> Self {
        Self {
            include: Vec::new(),
            include_signature: Signature::EMPTY,
            exclude_signature: Signature::EMPTY,
            matched: Vec::new(),
            shape_version: 0,
            arch_cursor: 0,
            next_row: 0,
            current: None,
            slots: Vec::new(),
        }
    }

    fn rebuild(&mut self, world: &World) {
        self.matched = world
            .archetypes
            .iter()
            .filter(|arch| {
                arch.signature().is_superset(&self.include_signature)
                    && arch.signature().is_disjoint(&self.exclude_signature)
            })
            .map(Archetype::id)
            .collect();
        self.shape_version = world.shape_version();
    }

    /// Advance to the next matching row. Returns `false` once every matched
    /// archetype is exhausted.
    pub fn next(&mut self, world: &World) -> bool {
        while let Some(&arch_id) = self.matched.get(self.arch_cursor) {
            let archetype = &world.archetypes[arch_id];
            if self.next_row < archetype.len() {
                if self.next_row == 0 {
                    self.bind(archetype);
                }
                self.current = Some(self.next_row);
                self.next_row += 1;
                return true;
            }
            self.arch_cursor += 1;
            self.next_row = 0;
        }
        self.current = None;
        false
    }

    fn bind(&mut self, archetype: &Archetype) {
        self.slots.clear();
        for &id in &self.include {
            match archetype.column_slot(id) {
                Some(slot) => self.slots.push(slot),
                None => unreachable!("matched archetype {:?} lacks {id:?}", archetype.id()),
            }
        }
    }

    /// Rewind to the first row of the first match, rebuilding the match list
    /// if archetypes were created since it was built.
    pub fn reset(&mut self, world: &World) {
        if self.shape_version != world.shape_version() && !self.is_detached() {
            self.rebuild(world);
        }
        self.arch_cursor = 0;
        self.next_row = 0;
        self.current = None;
    }

    fn is_detached(&self) -> bool {
        self.shape_version == 0
    }

    /// Archetypes this cursor walks, in visiting order.
    pub fn matched_archetypes(&self) -> &[ArchetypeId] {
        &self.matched
    }

    /// Components requested by this cursor.
    pub fn include(&self) -> &[ComponentId] {
        &self.include
    }

    /// The archetype the cursor is positioned in.
    pub fn current_archetype(&self) -> Option<ArchetypeId> {
        self.current.map(|_| self.matched[self.arch_cursor])
    }

    /// The row the cursor is positioned on.
    pub fn current_row(&self) -> Option<usize> {
        self.current
    }

    fn position(&self) -> (ArchetypeId, usize) {
        match self.current {
            Some(row) => (self.matched[self.arch_cursor], row),
            None => panic!("query cursor is not positioned on a row; call next() first"),
        }
    }

    /// Debug check that `T` fits include entry `field`. Typed components
    /// must be exactly `T`; dynamic ones only need a matching layout.
    fn check_field<T: Component>(&self, world: &World, field: usize) {
        let fits = world.registry.info(self.include[field]).is_some_and(|info| match info.type_id {
            Some(type_id) => type_id == TypeId::of::<T>(),
            None => info.size == std::mem::size_of::<T>() && std::mem::align_of::<T>() <= info.align,
        });
        debug_assert!(fits, "field {field} is not a {}", std::any::type_name::<T>());
    }

    /// The entity at the current row.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not positioned on a row.
    pub fn entity(&self, world: &World) -> EntityId {
        let (arch, row) = self.position();
        world.archetypes[arch].entities()[row]
    }

    /// Bytes of include entry `field` at the current row.
    pub fn get_bytes<'w>(&self, world: &'w World, field: usize) -> &'w [u8] {
        let (arch, row) = self.position();
        world.archetypes[arch].column(self.slots[field]).bytes(row)
    }

    /// Mutable bytes of include entry `field` at the current row.
    pub fn get_bytes_mut<'w>(&self, world: &'w mut World, field: usize) -> &'w mut [u8] {
        let (arch, row) = self.position();
        world
            .archetypes
            .get_mut(arch)
            .column_mut(self.slots[field])
            .bytes_mut(row)
    }

    /// Include entry `field` at the current row, as a `T`.
    pub fn get<'w, T: Component>(&self, world: &'w World, field: usize) -> &'w T {
        self.check_field::<T>(world, field);
        bytemuck::from_bytes(self.get_bytes(world, field))
    }

    /// Mutable include entry `field` at the current row.
    pub fn get_mut<'w, T: Component>(&self, world: &'w mut World, field: usize) -> &'w mut T {
        self.check_field::<T>(world, field);
        bytemuck::from_bytes_mut(self.get_bytes_mut(world, field))
    }

    /// The whole column of include entry `field` in the current archetype.
    pub fn slice<'w, T: Component>(&self, world: &'w World, field: usize) -> &'w [T] {
        self.check_field::<T>(world, field);
        let (arch, _) = self.position();
        world.archetypes[arch].column(self.slots[field]).as_slice()
    }

    /// Mutable view of the whole column of include entry `field`.
    pub fn slice_mut<'w, T: Component>(&self, world: &'w mut World, field: usize) -> &'w mut [T] {
        self.check_field::<T>(world, field);
        let (arch, _) = self.position();
        world
            .archetypes
            .get_mut(arch)
            .column_mut(self.slots[field])
            .as_slice_mut()
    }
}

// ---------------------------------------------------------------------------
// QueryItem / Query -- typed tuples
// ---------------------------------------------------------------------------

/// One element of a typed query tuple. Implemented for `&T` and `&mut T`.
pub trait QueryItem {
    /// The output type yielded per row.
    type Item<'w>;
    /// Whether this item borrows its component mutably.
    const MUTABLE: bool;
    /// The item's component id, if registered.
    fn component_id(world: &World) -> Option<ComponentId>;
    /// Read one row from column `slot` of `archetype`.
    ///
    /// # Safety
    ///
    /// For a mutable item the caller must guarantee exclusive access to the
    /// row for the returned lifetime.
    unsafe fn fetch(archetype: &Archetype, slot: usize, row: usize) -> Self::Item<'_>;
}

impl<T: Component> QueryItem for &T {
    type Item<'w> = &'w T;
    const MUTABLE: bool = false;

    fn component_id(world: &World) -> Option<ComponentId> {
        world.component_id::<T>()
    }

    unsafe fn fetch(archetype: &Archetype, slot: usize, row: usize) -> Self::Item<'_> {
        archetype.column(slot).get::<T>(row)
    }
}

impl<T: Component> QueryItem for &mut T {
    type Item<'w> = &'w mut T;
    const MUTABLE: bool = true;

    fn component_id(world: &World) -> Option<ComponentId> {
        world.component_id::<T>()
    }

    unsafe fn fetch(archetype: &Archetype, slot: usize, row: usize) -> Self::Item<'_> {
        archetype.column(slot).row_mut_unchecked::<T>(row)
    }
}

/// A tuple of query items: `(A,)` through `(A, B, C, D)`, each `&T` or `&mut T`.
pub trait Query {
    /// The per-row output type.
    type Item<'w>;
    /// Whether any item in this query borrows mutably.
    const HAS_MUTABLE: bool;
    /// `(component id, mutable)` per item in tuple order. Unregistered
    /// types have no id.
    fn access(world: &World) -> Vec<(Option<ComponentId>, bool)>;
    /// Fetch one row given the per-item column slots.
    ///
    /// # Safety
    ///
    /// Same contract as [`QueryItem::fetch`], for every item in the tuple.
    unsafe fn fetch_row<'w>(archetype: &'w Archetype, slots: &[usize], row: usize) -> Self::Item<'w>;
}

/// Panics if a registered component appears twice in a query tuple. The
/// message names the access pattern: two reads, two writes, or a read
/// overlapping a write.
fn validate_no_access_conflicts(access: &[(Option<ComponentId>, bool)]) {
    for (i, &(id, mutable)) in access.iter().enumerate() {
        let Some(id) = id else { continue };
        let earlier = access[..i].iter().find(|(other, _)| *other == Some(id));
        if let Some(&(_, earlier_mutable)) = earlier {
            let duplicate = EcsError::DuplicateComponent { id };
            match (earlier_mutable, mutable) {
                (false, false) => panic!("{duplicate}"),
                (true, true) => panic!("{duplicate}: duplicate mutable access"),
                _ => panic!("{duplicate}: overlapping read and mutable access"),
            }
        }
    }
}

/// Component ids of `Q` in tuple order, or `None` if any type is unregistered.
fn resolve_ids(access: &[(Option<ComponentId>, bool)]) -> Option<Vec<ComponentId>> {
    access.iter().map(|&(id, _)| id).collect()
}

macro_rules! impl_query_tuple {
    ($($name:ident => $idx:tt),+) => {
        impl<$($name: QueryItem),+> Query for ($($name,)+) {
            type Item<'w> = ($($name::Item<'w>,)+);
            const HAS_MUTABLE: bool = $($name::MUTABLE)||+;

            fn access(world: &World) -> Vec<(Option<ComponentId>, bool)> {
                vec![$(($name::component_id(world), $name::MUTABLE)),+]
            }

            unsafe fn fetch_row<'w>(archetype: &'w Archetype, slots: &[usize], row: usize) -> Self::Item<'w> {
                ($($name::fetch(archetype, slots[$idx], row),)+)
            }
        }
    };
}

impl_query_tuple!(A => 0);
impl_query_tuple!(A => 0, B => 1);
impl_query_tuple!(A => 0, B => 1, C => 2);
impl_query_tuple!(A => 0, B => 1, C => 2, D => 3);

// ---------------------------------------------------------------------------
// QueryIter / QueryIterMut
// ---------------------------------------------------------------------------

/// Iterator yielding `(EntityId, Q::Item)` for every matching row of a
/// read-only query.
pub struct QueryIter<'w, Q: Query> {
    world: &'w World,
    cursor: QueryCursor,
    _marker: PhantomData<Q>,
}

impl<'w, Q: Query> QueryIter<'w, Q> {
    /// The underlying cursor.
    pub fn cursor(&self) -> &QueryCursor {
        &self.cursor
    }
}

impl<'w, Q: Query> Iterator for QueryIter<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.next(self.world) {
            return None;
        }
        let (arch, row) = self.cursor.position();
        let world: &'w World = self.world;
        let archetype = &world.archetypes[arch];
        let entity = archetype.entities()[row];
        // SAFETY: `World::query_filtered` rejects queries with mutable items.
        let item = unsafe { Q::fetch_row(archetype, &self.cursor.slots, row) };
        Some((entity, item))
    }
}

/// Iterator yielding `(EntityId, Q::Item)` for a query that may hold
/// `&mut T` items. Created by [`World::query_mut`], which borrows the world
/// exclusively for `'w`.
pub struct QueryIterMut<'w, Q: Query> {
    world: &'w World,
    cursor: QueryCursor,
    _marker: PhantomData<(&'w mut World, Q)>,
}

impl<'w, Q: Query> QueryIterMut<'w, Q> {
    /// The underlying cursor.
    pub fn cursor(&self) -> &QueryCursor {
        &self.cursor
    }
}

impl<'w, Q: Query> Iterator for QueryIterMut<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.next(self.world) {
            return None;
        }
        let (arch, row) = self.cursor.position();
        let world: &'w World = self.world;
        let archetype = &world.archetypes[arch];
        let entity = archetype.entities()[row];
        // SAFETY: the iterator holds the only borrow of the world, each row is
        // yielded once, and overlapping access within the tuple was rejected
        // when the iterator was built.
        let item = unsafe { Q::fetch_row(archetype, &self.cursor.slots, row) };
        Some((entity, item))
    }
}

// ---------------------------------------------------------------------------
// World query methods
// ---------------------------------------------------------------------------

impl World {
    /// Build a cursor over archetypes holding every id in `include` and none
    /// in `exclude`.
    ///
    /// # Panics
    ///
    /// Panics if `include` names the same component twice.
    pub fn query_cursor(&self, include: &[ComponentId], exclude: &[ComponentId]) -> QueryCursor {
        QueryCursor::new(self, include, exclude)
    }

    /// Iterate every entity holding all components of `Q`.
    ///
    /// An unregistered type in `Q` yields nothing.
    ///
    /// # Panics
    ///
    /// Panics if `Q` names the same type twice, or contains a `&mut T` item.
    /// Use [`query_mut`](Self::query_mut) for those.
    pub fn query<Q: Query>(&self) -> QueryIter<'_, Q> {
        self.query_filtered::<Q>(&[])
    }

    /// Like [`query`](Self::query), skipping entities that hold any of `exclude`.
    pub fn query_filtered<Q: Query>(&self, exclude: &[ComponentId]) -> QueryIter<'_, Q> {
        assert!(
            !Q::HAS_MUTABLE,
            "World::query() cannot be used with mutable query items (&mut T); use World::query_mut()"
        );
        QueryIter {
            world: self,
            cursor: self.typed_cursor::<Q>(exclude),
            _marker: PhantomData,
        }
    }

    /// Iterate every entity holding all components of `Q`, where items may
    /// be `&mut T`.
    ///
    /// ```ignore
    /// for (_, (pos, vel)) in world.query_mut::<(&mut Pos, &Vel)>() {
    ///     pos.x += vel.dx;
    /// }
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if a component appears twice in `Q`, whether as two writes or
    /// as a read overlapping a write.
    pub fn query_mut<Q: Query>(&mut self) -> QueryIterMut<'_, Q> {
        self.query_mut_filtered::<Q>(&[])
    }

    /// Like [`query_mut`](Self::query_mut), skipping entities that hold any
    /// of `exclude`.
    pub fn query_mut_filtered<Q: Query>(&mut self, exclude: &[ComponentId]) -> QueryIterMut<'_, Q> {
        let cursor = self.typed_cursor::<Q>(exclude);
        QueryIterMut {
            world: self,
            cursor,
            _marker: PhantomData,
        }
    }

    fn typed_cursor<Q: Query>(&self, exclude: &[ComponentId]) -> QueryCursor {
        let access = Q::access(self);
        validate_no_access_conflicts(&access);
        match resolve_ids(&access) {
            Some(ids) => self.query_cursor(&ids, exclude),
            None => QueryCursor::empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
