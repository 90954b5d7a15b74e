//! Diagnostics: store statistics and a content digest.
//!
//! [`World::content_digest`] hashes every live entity and its component
//! bytes with BLAKE3. The digest depends only on *what* is stored, not on
//! which row or archetype insertion order put it where, so two worlds that
//! reached the same contents by different mutation paths (for example batch
//! versus one-at-a-time) hash equal.
//!
//! Hash layout, for each live entity in ascending index order:
//!
//! - index (`u32` LE), version (`u32` LE)
//! - component count (`u32` LE)
//! - for each component in ascending id order: id (`u8`), then its bytes

use serde::{Deserialize, Serialize};

use crate::world::World;

/// Point-in-time counters describing a [`World`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStats {
    /// Live entities.
    pub entities: usize,
    /// Archetypes, including the empty one.
    pub archetypes: usize,
    /// Registered component types.
    pub components: usize,
    /// Current archetype shape version.
    pub shape_version: u64,
    /// Cached transition edges.
    pub cached_transitions: usize,
    /// Transition lookups served from the cache.
    pub transition_hits: u64,
    /// Transition lookups that had to be computed.
    pub transition_misses: u64,
}

impl World {
    /// Snapshot of the store's counters.
    pub fn stats(&self) -> WorldStats {
        WorldStats {
            entities: self.entities.len(),
            archetypes: self.archetypes.len(),
            components: self.registry.len(),
            shape_version: self.archetypes.shape_version(),
            cached_transitions: self.transitions.len(),
            transition_hits: self.transitions.hits(),
            transition_misses: self.transitions.misses(),
        }
    }

    /// Row-order independent BLAKE3 hash of every live entity and its
    /// component bytes.
    pub fn content_digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for (entity, loc) in self.entities.iter() {
            let archetype = &self.archetypes[loc.archetype];
            hasher.update(&entity.index().to_le_bytes());
            hasher.update(&entity.version().to_le_bytes());
            hasher.update(&(archetype.component_ids().len() as u32).to_le_bytes());
            for (slot, id) in archetype.component_ids().iter().enumerate() {
                hasher.update(&[id.0]);
                hasher.update(archetype.column(slot).bytes(loc.row));
            }
        }
        hasher.finalize()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
