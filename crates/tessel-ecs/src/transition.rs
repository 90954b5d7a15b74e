//! Memoized archetype transitions.
//!
//! Adding or removing one component moves an entity from its archetype to a
//! neighbouring one. The [`TransitionCache`] remembers, per
//! `(source archetype, component, direction)`, which archetype that is and
//! which columns have to be copied, so repeated migrations along the same
//! edge cost only the byte copies.
//!
//! Entries are never invalidated: archetypes are immutable in shape and are
//! never removed from the arena, so an [`ArchetypeId`] keeps meaning the same
//! partition for the life of the world.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::archetype::{ArchetypeId, Archetypes};
use crate::component::{ComponentId, ComponentRegistry};

/// Direction of a single-component migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// The component is being added.
    Add,
    /// The component is being removed.
    Remove,
}

/// One column to carry over during a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnCopy {
    /// Column index in the source archetype.
    pub src: usize,
    /// Column index in the target archetype.
    pub dst: usize,
    /// Bytes per row.
    pub size: usize,
}

/// Precomputed plan for migrating a row along one edge.
#[derive(Debug, Clone)]
pub struct Transition {
    target: ArchetypeId,
    /// Retained columns, in ascending component order.
    copies: Vec<ColumnCopy>,
}

impl Transition {
    /// The archetype rows move to.
    #[inline]
    pub fn target(&self) -> ArchetypeId {
        self.target
    }

    /// Columns whose bytes move with the row. An added component is not
    /// listed; its bytes start zeroed in the target row.
    #[inline]
    pub fn copies(&self) -> &[ColumnCopy] {
        &self.copies
    }
}

type TransitionKey = (ArchetypeId, ComponentId, TransitionKind);

/// Lazily filled cache of [`Transition`]s.
#[derive(Debug, Default)]
pub struct TransitionCache {
    entries: HashMap<TransitionKey, Transition>,
    hits: u64,
    misses: u64,
}

impl TransitionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the edge out of `source` for `component`, computing it on first use.
    ///
    /// On a miss this may create the target archetype in `archetypes`.
    pub fn resolve(
        &mut self,
        archetypes: &mut Archetypes,
        registry: &ComponentRegistry,
        source: ArchetypeId,
        component: ComponentId,
        kind: TransitionKind,
    ) -> &Transition {
        let key = (source, component, kind);
        if self.entries.contains_key(&key) {
            self.hits += 1;
            trace!(?source, ?component, ?kind, "transition cache hit");
        } else {
            self.misses += 1;
            let transition = Self::compute(archetypes, registry, source, component, kind);
            debug!(
                ?source,
                ?component,
                ?kind,
                target = ?transition.target,
                copies = transition.copies.len(),
                "transition cache miss"
            );
            self.entries.insert(key, transition);
        }
        &self.entries[&key]
    }

    fn compute(
        archetypes: &mut Archetypes,
        registry: &ComponentRegistry,
        source: ArchetypeId,
        component: ComponentId,
        kind: TransitionKind,
    ) -> Transition {
        let source_signature = *archetypes[source].signature();
        let target_signature = match kind {
            TransitionKind::Add => source_signature.with(component),
            TransitionKind::Remove => source_signature.without(component),
        };
        let target = archetypes.get_or_create(target_signature, registry);

        let src = &archetypes[source];
        let dst = &archetypes[target];
        let copies = src
            .component_ids()
            .iter()
            .enumerate()
            .filter_map(|(src_slot, &id)| {
                let dst_slot = dst.column_slot(id)?;
                Some(ColumnCopy {
                    src: src_slot,
                    dst: dst_slot,
                    size: src.column(src_slot).item_size(),
                })
            })
            .collect();
        Transition { target, copies }
    }

    /// Number of cached edges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that had to compute a transition.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
