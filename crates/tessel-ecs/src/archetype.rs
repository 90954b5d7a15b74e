//! Archetype storage.
//!
//! An [`Archetype`] stores all entities that share the exact same component
//! set. Within each archetype, components are laid out Structure-of-Arrays
//! style: one [`Column`] per component type plus a parallel `Vec<EntityId>`
//! mapping row index to entity. The [`Archetypes`] arena owns every
//! archetype, keyed by [`Signature`], and never removes or reorders them, so
//! an [`ArchetypeId`] stays valid for the life of the world.
//!
//! # Safety
//!
//! [`Column`] manages its own aligned byte allocation; the allocation calls
//! and the byte views live in this module. The only other `unsafe` in the
//! crate is the typed `&mut T` query fetch, which goes through
//! `Column::row_mut_unchecked`. Every row access goes through
//! [`Column::bytes`] / [`Column::bytes_mut`] or that accessor, and each
//! bounds-checks the row and panics rather than read past the initialized
//! length.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ops::{Index, Range};
use std::ptr;
use std::slice;

use tracing::debug;

use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry, MAX_COMPONENTS};
use crate::entity::EntityId;
use crate::signature::Signature;
use crate::transition::ColumnCopy;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within the world. Index into [`Archetypes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The archetype with no components, where new entities start out.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    /// The id as an index into the arena.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Column -- type-erased component storage
// ---------------------------------------------------------------------------

/// A densely packed, growable byte buffer holding one component per row.
///
/// Row `i` occupies bytes `[i * size, (i + 1) * size)`. The allocation is
/// aligned to the component's alignment, so typed views through `bytemuck`
/// never fail on alignment.
pub struct Column {
    /// Heap allocation, or an aligned dangling pointer when nothing is allocated.
    data: *mut u8,
    /// Number of initialized rows.
    len: usize,
    /// Rows that fit in the current allocation.
    capacity: usize,
    item_size: usize,
    item_align: usize,
}

// Column only stores plain bytes of `Pod` components.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a column for `info`, pre-sized to `capacity` rows.
    pub fn new(info: &ComponentInfo, capacity: usize) -> Self {
        let mut column = Self {
            data: info.align as *mut u8,
            len: 0,
            capacity: 0,
            item_size: info.size,
            item_align: info.align,
        };
        column.grow_to(capacity);
        column
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the column has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rows that fit without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte size of one row.
    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    // -- internal helpers ---------------------------------------------------

    fn layout_for_capacity(&self, cap: usize) -> Layout {
        let size = self
            .item_size
            .checked_mul(cap)
            .expect("column capacity overflow");
        Layout::from_size_align(size, self.item_align).expect("column layout overflow")
    }

    fn grow_to(&mut self, new_cap: usize) {
        if new_cap <= self.capacity {
            return;
        }
        if self.item_size == 0 {
            // ZST: no actual allocation needed.
            self.capacity = new_cap;
            return;
        }
        let new_layout = self.layout_for_capacity(new_cap);
        let new_data = unsafe {
            if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                let old_layout = self.layout_for_capacity(self.capacity);
                alloc::realloc(self.data, old_layout, new_layout.size())
            }
        };
        if new_data.is_null() {
            alloc::handle_alloc_error(new_layout);
        }
        self.data = new_data;
        self.capacity = new_cap;
    }

    /// Byte range of `row`, failing fast on a row past the initialized length.
    #[inline]
    fn row_range(&self, row: usize) -> Range<usize> {
        assert!(
            row < self.len,
            "corrupt index: row {row} out of bounds for column of length {}",
            self.len
        );
        row * self.item_size..(row + 1) * self.item_size
    }

    // -- growth -------------------------------------------------------------

    /// Ensure room for `additional` more rows, doubling at least.
    pub fn reserve(&mut self, additional: usize) {
        let required = self
            .len
            .checked_add(additional)
            .expect("column capacity overflow");
        if required <= self.capacity {
            return;
        }
        let new_cap = required.max(self.capacity * 2).max(4);
        self.grow_to(new_cap);
    }

    /// Append a row of zero bytes and return its index.
    pub fn push_zeroed(&mut self) -> usize {
        self.reserve(1);
        let row = self.len;
        if self.item_size > 0 {
            unsafe {
                self.data
                    .add(row * self.item_size)
                    .write_bytes(0, self.item_size);
            }
        }
        self.len += 1;
        row
    }

    /// Move the last row into `row` and shrink by one.
    pub fn swap_remove(&mut self, row: usize) {
        let range = self.row_range(row);
        let last = self.len - 1;
        if row != last && self.item_size > 0 {
            let size = self.item_size;
            self.as_bytes_mut()
                .copy_within(last * size..(last + 1) * size, range.start);
        }
        self.len -= 1;
    }

    // -- byte access --------------------------------------------------------

    /// All initialized rows as one byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.len * self.item_size) }
    }

    /// All initialized rows as one mutable byte slice.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data, self.len * self.item_size) }
    }

    /// Bytes of one row.
    ///
    /// # Panics
    ///
    /// Panics if `row >= len`.
    #[inline]
    pub fn bytes(&self, row: usize) -> &[u8] {
        let range = self.row_range(row);
        &self.as_bytes()[range]
    }

    /// Mutable bytes of one row.
    ///
    /// # Panics
    ///
    /// Panics if `row >= len`.
    #[inline]
    pub fn bytes_mut(&mut self, row: usize) -> &mut [u8] {
        let range = self.row_range(row);
        &mut self.as_bytes_mut()[range]
    }

    // -- typed access -------------------------------------------------------

    /// Typed view of one row. Panics if `T` does not match the column's size.
    #[inline]
    pub fn get<T: Component>(&self, row: usize) -> &T {
        bytemuck::from_bytes(self.bytes(row))
    }

    /// Mutable typed view of one row.
    #[inline]
    pub fn get_mut<T: Component>(&mut self, row: usize) -> &mut T {
        bytemuck::from_bytes_mut(self.bytes_mut(row))
    }

    /// Typed view of every row. The slice always has `len()` elements,
    /// zero-sized components included.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not have the column's item size.
    #[inline]
    pub fn as_slice<T: Component>(&self) -> &[T] {
        self.check_item::<T>();
        if self.item_size == 0 {
            // SAFETY: a zero-sized `T` needs no backing memory, only an
            // aligned non-null pointer.
            return unsafe { slice::from_raw_parts(ptr::NonNull::<T>::dangling().as_ptr(), self.len) };
        }
        bytemuck::cast_slice(self.as_bytes())
    }

    /// Mutable typed view of every row.
    #[inline]
    pub fn as_slice_mut<T: Component>(&mut self) -> &mut [T] {
        self.check_item::<T>();
        if self.item_size == 0 {
            return unsafe {
                slice::from_raw_parts_mut(ptr::NonNull::<T>::dangling().as_ptr(), self.len)
            };
        }
        bytemuck::cast_slice_mut(self.as_bytes_mut())
    }

    /// Mutable typed view of one row reached through a shared borrow.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive access to `row` for `'a`: no other
    /// reference to that row may be live while the returned one is.
    ///
    /// # Panics
    ///
    /// Panics if `row >= len` or `T` does not have the column's item size.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn row_mut_unchecked<'a, T: Component>(&'a self, row: usize) -> &'a mut T {
        self.check_item::<T>();
        let range = self.row_range(row);
        if self.item_size == 0 {
            return &mut *ptr::NonNull::<T>::dangling().as_ptr();
        }
        &mut *(self.data.add(range.start) as *mut T)
    }

    fn check_item<T: Component>(&self) {
        assert_eq!(
            std::mem::size_of::<T>(),
            self.item_size,
            "typed view of a {}-byte column as {}",
            self.item_size,
            std::any::type_name::<T>()
        );
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if self.item_size > 0 && self.capacity > 0 {
            let layout = self.layout_for_capacity(self.capacity);
            unsafe { alloc::dealloc(self.data, layout) };
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("item_size", &self.item_size)
            .field("item_align", &self.item_align)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// All entities sharing one exact component set.
///
/// Columns are ordered by ascending [`ComponentId`]; `column_slots` maps a
/// component id straight to its column index so lookups never search.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    /// Ascending component ids. Invariant: `columns[i]` stores `component_ids[i]`.
    component_ids: Vec<ComponentId>,
    /// Component id -> index into `columns`.
    column_slots: Box<[Option<u8>; MAX_COMPONENTS]>,
    columns: Vec<Column>,
    /// Row -> entity.
    entities: Vec<EntityId>,
}

impl Archetype {
    /// Create an empty archetype whose columns are described by `infos`,
    /// which must be sorted by id and match `signature` exactly.
    pub fn new<'a>(
        id: ArchetypeId,
        signature: Signature,
        infos: impl IntoIterator<Item = &'a ComponentInfo>,
        capacity: usize,
    ) -> Self {
        let mut component_ids = Vec::new();
        let mut columns = Vec::new();
        let mut column_slots = Box::new([None; MAX_COMPONENTS]);
        for (slot, info) in infos.into_iter().enumerate() {
            debug_assert!(signature.contains(info.id));
            column_slots[info.id.index()] = Some(slot as u8);
            component_ids.push(info.id);
            columns.push(Column::new(info, capacity));
        }
        debug_assert_eq!(component_ids.len(), signature.len());
        Self {
            id,
            signature,
            component_ids,
            column_slots,
            columns,
            entities: Vec::with_capacity(capacity),
        }
    }

    /// The archetype's id.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The component set this archetype stores.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Stored component ids in ascending order.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    /// Whether this archetype stores `id`.
    #[inline]
    pub fn has_component(&self, id: ComponentId) -> bool {
        self.signature.contains(id)
    }

    /// Column index for `id`, if stored.
    #[inline]
    pub fn column_slot(&self, id: ComponentId) -> Option<usize> {
        self.column_slots[id.index()].map(usize::from)
    }

    /// Column at `slot`.
    #[inline]
    pub fn column(&self, slot: usize) -> &Column {
        &self.columns[slot]
    }

    /// Mutable column at `slot`.
    #[inline]
    pub fn column_mut(&mut self, slot: usize) -> &mut Column {
        &mut self.columns[slot]
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether this archetype has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Row -> entity mapping.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Grow every column and the entity array for `additional` rows at once.
    pub fn reserve_rows(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }

    /// Append a zero-filled row owned by `entity`; returns the row index.
    pub fn push_row(&mut self, entity: EntityId) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            let column_row = column.push_zeroed();
            debug_assert_eq!(column_row, row);
        }
        row
    }

    /// Remove `row` by moving the last row into it.
    ///
    /// Returns the entity that now occupies `row`, or `None` when `row` was
    /// the last row. The caller must patch that entity's location.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) -> Option<EntityId> {
        assert!(
            row < self.entities.len(),
            "corrupt index: row {row} out of bounds for archetype {:?} with {} rows",
            self.id,
            self.entities.len()
        );
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        (row < last).then(|| self.entities[row])
    }

    /// Bytes of component `id` at `row`, or `None` if not stored here.
    #[inline]
    pub fn bytes(&self, row: usize, id: ComponentId) -> Option<&[u8]> {
        let slot = self.column_slot(id)?;
        Some(self.columns[slot].bytes(row))
    }

    /// Mutable bytes of component `id` at `row`, or `None` if not stored here.
    #[inline]
    pub fn bytes_mut(&mut self, row: usize, id: ComponentId) -> Option<&mut [u8]> {
        let slot = self.column_slot(id)?;
        Some(self.columns[slot].bytes_mut(row))
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("rows", &self.entities.len())
            .finish()
    }
}

/// Copy the retained components of one row into another archetype's row.
///
/// Each [`ColumnCopy`] names a source column, a target column and the byte
/// count; both rows must already exist.
pub fn copy_row(
    src: &Archetype,
    src_row: usize,
    dst: &mut Archetype,
    dst_row: usize,
    copies: &[ColumnCopy],
) {
    for copy in copies {
        let from = src.columns[copy.src].bytes(src_row);
        debug_assert_eq!(from.len(), copy.size);
        dst.columns[copy.dst].bytes_mut(dst_row).copy_from_slice(from);
    }
}

// ---------------------------------------------------------------------------
// Archetypes -- the arena
// ---------------------------------------------------------------------------

/// Arena of every archetype in a world, indexed by [`ArchetypeId`].
///
/// Archetype `0` is always the empty-signature archetype.
#[derive(Debug)]
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeId>,
    /// Bumped whenever an archetype is created.
    shape_version: u64,
    /// Initial row capacity of new columns.
    row_capacity: usize,
}

impl Archetypes {
    /// Create an arena holding only the empty archetype.
    pub fn new(row_capacity: usize) -> Self {
        let empty = Archetype::new(
            ArchetypeId::EMPTY,
            Signature::EMPTY,
            std::iter::empty(),
            row_capacity,
        );
        let mut by_signature = HashMap::new();
        by_signature.insert(Signature::EMPTY, ArchetypeId::EMPTY);
        Self {
            archetypes: vec![empty],
            by_signature,
            shape_version: 1,
            row_capacity,
        }
    }

    /// Find the archetype for `signature`, creating it if needed.
    ///
    /// # Panics
    ///
    /// Panics if `signature` names a component `registry` does not know.
    pub fn get_or_create(&mut self, signature: Signature, registry: &ComponentRegistry) -> ArchetypeId {
        if let Some(&id) = self.by_signature.get(&signature) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        let infos: Vec<&ComponentInfo> = signature
            .iter()
            .map(|cid| {
                registry
                    .info(cid)
                    .unwrap_or_else(|| panic!("component {cid:?} in signature is not registered"))
            })
            .collect();
        let archetype = Archetype::new(id, signature, infos, self.row_capacity);
        self.archetypes.push(archetype);
        self.by_signature.insert(signature, id);
        self.shape_version += 1;
        debug!(
            archetype = ?id,
            signature = ?signature,
            shape_version = self.shape_version,
            "created archetype"
        );
        id
    }

    /// Look up an archetype by exact signature.
    pub fn find(&self, signature: &Signature) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    /// Archetype by id.
    #[inline]
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    /// Mutable archetype by id.
    #[inline]
    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    /// Mutable borrows of two distinct archetypes.
    ///
    /// # Panics
    ///
    /// Panics if `a == b`.
    pub fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "pair_mut needs two distinct archetypes");
        let (ai, bi) = (a.index(), b.index());
        if ai < bi {
            let (lo, hi) = self.archetypes.split_at_mut(bi);
            (&mut lo[ai], &mut hi[0])
        } else {
            let (lo, hi) = self.archetypes.split_at_mut(ai);
            (&mut hi[0], &mut lo[bi])
        }
    }

    /// Counter bumped on every archetype creation.
    #[inline]
    pub fn shape_version(&self) -> u64 {
        self.shape_version
    }

    /// Number of archetypes, including the empty one.
    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Always false: the empty archetype exists from construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// All archetypes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }
}

impl Index<ArchetypeId> for Archetypes {
    type Output = Archetype;

    #[inline]
    fn index(&self, id: ArchetypeId) -> &Archetype {
        self.get(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
