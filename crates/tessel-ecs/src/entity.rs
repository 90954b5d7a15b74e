//! Entity identifiers and the entity table.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *version* counter in the
//! high 32 bits and a slot *index* in the low 32 bits. The [`EntityTable`]
//! owns one slot per allocated index, holding the slot's last issued version
//! and, while the entity is live, where its row currently sits.
//!
//! Version 0 is never issued: a slot's first entity gets version 1, and every
//! reuse bumps the version (wrapping from `u32::MAX` back to 1). A handle is
//! valid iff its slot is live and the versions match.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::archetype::ArchetypeId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A versioned entity handle.
///
/// Layout: `[version: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from an index and version.
    #[inline]
    pub fn new(index: u32, version: u32) -> Self {
        Self((version as u64) << 32 | index as u64)
    }

    /// The slot index (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The version (high 32 bits).
    #[inline]
    pub fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.version())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.version())
    }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where a live entity's data sits: which archetype and which row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype holding the entity.
    pub archetype: ArchetypeId,
    /// Row index within that archetype's columns.
    pub row: usize,
}

// ---------------------------------------------------------------------------
// EntityTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct EntitySlot {
    /// Last version issued from this slot; 0 if never issued.
    version: u32,
    /// `Some` while the slot's current entity is live.
    location: Option<EntityLocation>,
}

/// Allocates and recycles entity slots and tracks each live entity's location.
///
/// Free indices are kept in a FIFO queue so that version bumps are spread
/// across slots rather than concentrated on a hot index.
#[derive(Debug, Default)]
pub struct EntityTable {
    slots: Vec<EntitySlot>,
    free_indices: VecDeque<u32>,
    live: usize,
}

#[inline]
fn next_version(version: u32) -> u32 {
    match version.wrapping_add(1) {
        0 => 1,
        v => v,
    }
}

impl EntityTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with room for `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Make room for `additional` new entities beyond the recyclable ones.
    pub fn reserve(&mut self, additional: usize) {
        let fresh = additional.saturating_sub(self.free_indices.len());
        self.slots.reserve(fresh);
    }

    /// Allocate a handle and mark it live at `location`.
    ///
    /// # Panics
    ///
    /// Panics if the 32-bit index space is exhausted.
    pub fn allocate(&mut self, location: EntityLocation) -> EntityId {
        let index = match self.free_indices.pop_front() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|&i| i < u32::MAX)
                    .unwrap_or_else(|| panic!("{}", EcsError::EntityCapacityExceeded));
                self.slots.push(EntitySlot {
                    version: 0,
                    location: None,
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.version = next_version(slot.version);
        slot.location = Some(location);
        self.live += 1;
        EntityId::new(index, slot.version)
    }

    /// Release a live entity, returning where its row was.
    ///
    /// Returns `None` (and changes nothing) for stale or unknown handles.
    pub fn free(&mut self, entity: EntityId) -> Option<EntityLocation> {
        let location = self.location(entity)?;
        self.slots[entity.index() as usize].location = None;
        self.free_indices.push_back(entity.index());
        self.live -= 1;
        Some(location)
    }

    /// Whether `entity` is a live, current handle.
    #[inline]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.location(entity).is_some()
    }

    /// Location of a live entity, or `None` for stale or unknown handles.
    #[inline]
    pub fn location(&self, entity: EntityId) -> Option<EntityLocation> {
        let slot = self.slots.get(entity.index() as usize)?;
        if slot.version != entity.version() {
            return None;
        }
        slot.location
    }

    /// Record a migration of `entity` to `location`.
    #[inline]
    pub(crate) fn set_location(&mut self, entity: EntityId, location: EntityLocation) {
        let slot = &mut self.slots[entity.index() as usize];
        debug_assert_eq!(slot.version, entity.version(), "relocating a stale entity");
        slot.location = Some(location);
    }

    /// Patch the row of an entity that a swap-remove moved within its archetype.
    #[inline]
    pub(crate) fn set_row(&mut self, entity: EntityId, row: usize) {
        if let Some(location) = self.slots[entity.index() as usize].location.as_mut() {
            location.row = row;
        }
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no entity is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated (live or free).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over all live handles in index order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityLocation)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.location
                .map(|loc| (EntityId::new(index as u32, slot.version), loc))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(row: usize) -> EntityLocation {
        EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row,
        }
    }

    #[test]
    fn allocate_unique_ids() {
        let mut table = EntityTable::new();
        let ids: Vec<EntityId> = (0..100).map(|i| table.allocate(loc(i))).collect();
        let mut indices: Vec<u32> = ids.iter().map(|id| id.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 100);
        assert!(ids.iter().all(|id| id.version() == 1));
    }

    #[test]
    fn version_increments_on_recycle() {
        let mut table = EntityTable::new();
        let e0 = table.allocate(loc(0));
        assert_eq!(table.free(e0), Some(loc(0)));
        let e1 = table.allocate(loc(0));
        assert_eq!(e1.index(), e0.index());
        assert_eq!(e1.version(), 2);
    }

    #[test]
    fn stale_id_detection() {
        let mut table = EntityTable::new();
        let e0 = table.allocate(loc(0));
        assert!(table.is_alive(e0));
        table.free(e0);
        assert!(!table.is_alive(e0), "freed handle must be stale");
        let _e1 = table.allocate(loc(0));
        assert!(!table.is_alive(e0), "stale handle stays stale after reuse");
    }

    #[test]
    fn version_zero_is_never_valid() {
        let mut table = EntityTable::new();
        let e = table.allocate(loc(0));
        assert!(!table.is_alive(EntityId::new(e.index(), 0)));
        assert!(!table.is_alive(EntityId::new(7, 1)), "out of range index");
    }

    #[test]
    fn version_wraps_past_zero() {
        assert_eq!(next_version(u32::MAX), 1);
        assert_eq!(next_version(0), 1);
        assert_eq!(next_version(41), 42);
    }

    #[test]
    fn recycling_a_max_version_slot_wraps_to_one() {
        let mut table = EntityTable::new();
        let e = table.allocate(loc(0));
        table.slots[e.index() as usize].version = u32::MAX;
        let oldest = EntityId::new(e.index(), u32::MAX);
        assert!(table.is_alive(oldest));
        assert!(!table.is_alive(e));

        assert_eq!(table.free(oldest), Some(loc(0)));
        let wrapped = table.allocate(loc(3));
        assert_eq!(wrapped.index(), e.index());
        assert_eq!(wrapped.version(), 1);
        assert!(table.is_alive(wrapped));
        assert!(!table.is_alive(oldest));
        assert_eq!(table.location(wrapped), Some(loc(3)));
    }

    #[test]
    fn double_free_is_noop() {
        let mut table = EntityTable::new();
        let e = table.allocate(loc(0));
        assert!(table.free(e).is_some());
        assert!(table.free(e).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn free_list_is_fifo() {
        let mut table = EntityTable::new();
        let a = table.allocate(loc(0));
        let b = table.allocate(loc(1));
        table.free(a);
        table.free(b);
        assert_eq!(table.allocate(loc(0)).index(), a.index());
        assert_eq!(table.allocate(loc(1)).index(), b.index());
    }

    #[test]
    fn set_row_patches_location() {
        let mut table = EntityTable::new();
        let e = table.allocate(loc(5));
        table.set_row(e, 2);
        assert_eq!(table.location(e), Some(loc(2)));
    }

    #[test]
    fn entity_id_roundtrip() {
        let id = EntityId::new(42, 7);
        assert_eq!(id.index(), 42);
        assert_eq!(id.version(), 7);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
    }
}
