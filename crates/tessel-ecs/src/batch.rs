//! Batched mutations.
//!
//! Per-entity migration pays a transition lookup, a row append and a
//! location write for every call. The batch forms here pay the lookup and
//! the column growth once per *source archetype* instead:
//!
//! 1. keep only live handles, dropping repeats;
//! 2. stable-sort by source archetype, so members of a group keep the
//!    caller's relative order;
//! 3. per group, either write in place (nothing to migrate) or resolve the
//!    transition once, reserve target rows once, then append, copy and
//!    relocate each member;
//! 4. swap-remove the group's source rows in strictly descending row order.
//!
//! Step 4 must run from the highest row down. `swap_remove` pulls the last
//! row into the freed slot, and with descending order the row pulled in is
//! never another member of the batch still waiting to be removed.

use std::collections::HashSet;

use tracing::warn;

use crate::archetype::{copy_row, ArchetypeId};
use crate::component::{Component, ComponentId};
use crate::entity::{EntityId, EntityLocation};
use crate::transition::TransitionKind;
use crate::world::World;

type Member = (EntityId, EntityLocation);

impl World {
    // -- typed forms --------------------------------------------------------

    /// Add a zeroed `T` to every entity in `entities` that lacks one.
    ///
    /// Returns the number of distinct live entities processed; entities that
    /// already have a `T` count but are left untouched.
    pub fn add_component_batch<T: Component>(&mut self, entities: &[EntityId]) -> usize {
        match self.registry.lookup::<T>() {
            Some(id) => self.add_batch_by_id(entities, id),
            None => 0,
        }
    }

    /// Add-or-overwrite `value` as the `T` of every entity in `entities`.
    pub fn set_component_batch<T: Component>(&mut self, entities: &[EntityId], value: T) -> usize {
        match self.registry.lookup::<T>() {
            Some(id) => self.set_batch_by_id(entities, id, bytemuck::bytes_of(&value)),
            None => 0,
        }
    }

    /// Remove `T` from every entity in `entities` that has one.
    pub fn remove_component_batch<T: Component>(&mut self, entities: &[EntityId]) -> usize {
        match self.registry.lookup::<T>() {
            Some(id) => self.remove_batch_by_id(entities, id),
            None => 0,
        }
    }

    // -- by id --------------------------------------------------------------

    /// Batched [`add_by_id`](World::add_by_id).
    pub fn add_batch_by_id(&mut self, entities: &[EntityId], id: ComponentId) -> usize {
        if !self.registry.contains(id) {
            return 0;
        }
        self.apply_batch(entities, id, TransitionKind::Add, None, "add")
    }

    /// Batched [`set_by_id`](World::set_by_id). Returns 0 when `bytes` does
    /// not match the component's size.
    pub fn set_batch_by_id(&mut self, entities: &[EntityId], id: ComponentId, bytes: &[u8]) -> usize {
        if self.registry.size_of(id) != Some(bytes.len()) {
            return 0;
        }
        self.apply_batch(entities, id, TransitionKind::Add, Some(bytes), "set")
    }

    /// Batched [`remove_by_id`](World::remove_by_id).
    pub fn remove_batch_by_id(&mut self, entities: &[EntityId], id: ComponentId) -> usize {
        if !self.registry.contains(id) {
            return 0;
        }
        self.apply_batch(entities, id, TransitionKind::Remove, None, "remove")
    }

    /// Despawn every live entity in `entities`; returns how many were removed.
    pub fn despawn_batch(&mut self, entities: &[EntityId]) -> usize {
        let members = self.collect_members(entities, "despawn");
        for group in members.chunk_by(|a, b| a.1.archetype == b.1.archetype) {
            let source = group[0].1.archetype;
            for &(entity, _) in group {
                self.entities.free(entity);
            }
            self.remove_source_rows(source, group);
        }
        members.len()
    }

    // -- engine -------------------------------------------------------------

    /// Live, distinct members of `entities`, stably sorted by archetype.
    fn collect_members(&self, entities: &[EntityId], op: &'static str) -> Vec<Member> {
        let mut seen = HashSet::with_capacity(entities.len());
        let mut members = Vec::with_capacity(entities.len());
        let mut duplicates = 0usize;
        for &entity in entities {
            let Some(loc) = self.entities.location(entity) else {
                continue;
            };
            if seen.insert(entity) {
                members.push((entity, loc));
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(op, duplicates, "batch received duplicate entity handles");
        }
        members.sort_by_key(|&(_, loc)| loc.archetype);
        members
    }

    fn apply_batch(
        &mut self,
        entities: &[EntityId],
        component: ComponentId,
        kind: TransitionKind,
        value: Option<&[u8]>,
        op: &'static str,
    ) -> usize {
        let members = self.collect_members(entities, op);
        for group in members.chunk_by(|a, b| a.1.archetype == b.1.archetype) {
            let source = group[0].1.archetype;
            let has = self.archetypes[source].has_component(component);
            let target = match kind {
                TransitionKind::Add if !has => self.migrate_group(source, group, component, kind),
                TransitionKind::Remove if has => self.migrate_group(source, group, component, kind),
                _ => source,
            };
            if let Some(bytes) = value {
                self.write_group(target, group, component, bytes);
            }
        }
        members.len()
    }

    /// Move every member of `group` (all in `source`) across one edge.
    fn migrate_group(
        &mut self,
        source: ArchetypeId,
        group: &[Member],
        component: ComponentId,
        kind: TransitionKind,
    ) -> ArchetypeId {
        let transition = self.transitions.resolve(
            &mut self.archetypes,
            &self.registry,
            source,
            component,
            kind,
        );
        let target = transition.target();
        let (src, dst) = self.archetypes.pair_mut(source, target);

        dst.reserve_rows(group.len());
        for &(entity, from) in group {
            let row = dst.push_row(entity);
            copy_row(src, from.row, dst, row, transition.copies());
            self.entities.set_location(
                entity,
                EntityLocation {
                    archetype: target,
                    row,
                },
            );
        }

        self.remove_source_rows(source, group);
        target
    }

    /// Swap-remove the members' old rows from `source`, highest row first,
    /// patching each entity pulled into a freed slot.
    fn remove_source_rows(&mut self, source: ArchetypeId, group: &[Member]) {
        let mut rows: Vec<usize> = group.iter().map(|&(_, loc)| loc.row).collect();
        rows.sort_unstable_by(|a, b| b.cmp(a));
        let archetype = self.archetypes.get_mut(source);
        for row in rows {
            if let Some(moved) = archetype.swap_remove(row) {
                self.entities.set_row(moved, row);
            }
        }
    }

    /// Overwrite `component` on every member, now living in `archetype`.
    fn write_group(&mut self, archetype: ArchetypeId, group: &[Member], component: ComponentId, bytes: &[u8]) {
        let Some(slot) = self.archetypes[archetype].column_slot(component) else {
            return;
        };
        for &(entity, _) in group {
            let Some(loc) = self.entities.location(entity) else {
                continue;
            };
            debug_assert_eq!(loc.archetype, archetype);
            self.archetypes
                .get_mut(archetype)
                .column_mut(slot)
                .bytes_mut(loc.row)
                .copy_from_slice(bytes);
        }
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
    struct Tag(u16);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Pos>();
        world.register_component::<Tag>();
        world
    }

    /// Every entity's recorded location must point at a row holding it.
    fn assert_locations_consistent(world: &World) {
        for (entity, loc) in world.entities.iter() {
            assert_eq!(world.archetypes[loc.archetype].entities()[loc.row], entity);
        }
        let rows: usize = world.archetypes().iter().map(|a| a.len()).sum();
        assert_eq!(rows, world.entity_count());
    }

    #[test]
    fn set_batch_migrates_whole_group_once() {
        let mut world = setup_world();
        let es = world.spawn_batch(10);
        let n = world.set_component_batch(&es, Pos { x: 1.0, y: 2.0 });
        assert_eq!(n, 10);
        assert_eq!(world.transitions().misses(), 1);
        assert_eq!(world.transitions().hits(), 0);
        for &e in &es {
            assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        }
        assert_locations_consistent(&world);
    }

    #[test]
    fn batch_keeps_bystanders_in_place() {
        let mut world = setup_world();
        let es = world.spawn_batch(8);
        for (i, &e) in es.iter().enumerate() {
            world.set_component(e, Pos { x: i as f32, y: 0.0 });
        }
        // Every other entity gets a tag; the rest are swapped around in {Pos}.
        let picked: Vec<EntityId> = es.iter().copied().step_by(2).collect();
        assert_eq!(world.add_component_batch::<Tag>(&picked), 4);
        for (i, &e) in es.iter().enumerate() {
            assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: i as f32, y: 0.0 }));
            assert_eq!(world.has_component::<Tag>(e), i % 2 == 0);
        }
        assert_locations_consistent(&world);
    }

    #[test]
    fn mixed_source_archetypes_group_separately() {
        let mut world = setup_world();
        let es = world.spawn_batch(6);
        world.set_component(es[0], Tag(1));
        world.set_component(es[3], Tag(2));
        let misses = world.transitions().misses();
        let hits = world.transitions().hits();
        let n = world.set_component_batch(&es, Pos { x: 5.0, y: 5.0 });
        assert_eq!(n, 6);
        assert_eq!(world.get_component::<Tag>(es[0]), Some(&Tag(1)));
        assert_eq!(world.get_component::<Tag>(es[3]), Some(&Tag(2)));
        assert!(es.iter().all(|&e| world.get_component::<Pos>(e) == Some(&Pos { x: 5.0, y: 5.0 })));
        assert_eq!(
            world.transitions().misses() - misses,
            2,
            "one edge per source archetype"
        );
        assert_eq!(world.transitions().hits(), hits);
        assert_locations_consistent(&world);
    }

    #[test]
    fn set_batch_writes_in_place_when_present() {
        let mut world = setup_world();
        let es = world.spawn_batch(3);
        world.set_component_batch(&es, Tag(1));
        let misses = world.transitions().misses();
        let before: Vec<_> = es.iter().map(|&e| world.location(e)).collect();
        world.set_component_batch(&es, Tag(9));
        let after: Vec<_> = es.iter().map(|&e| world.location(e)).collect();
        assert_eq!(before, after);
        assert_eq!(world.transitions().misses(), misses);
        assert!(es.iter().all(|&e| world.get_component::<Tag>(e) == Some(&Tag(9))));
    }

    #[test]
    fn stale_and_duplicate_handles_are_skipped() {
        let mut world = setup_world();
        let es = world.spawn_batch(4);
        world.despawn(es[2]);
        let input = [es[0], es[0], es[1], es[2], es[3], es[1]];
        assert_eq!(world.set_component_batch(&input, Tag(3)), 3);
        assert!(!world.has_component::<Tag>(es[2]));
        assert_locations_consistent(&world);
    }

    #[test]
    fn remove_batch_is_idempotent() {
        let mut world = setup_world();
        let es = world.spawn_batch(5);
        world.set_component_batch(&es, Pos { x: 0.0, y: 0.0 });
        world.set_component_batch(&es[..2], Tag(7));
        assert_eq!(world.remove_component_batch::<Tag>(&es), 5);
        assert!(es.iter().all(|&e| !world.has_component::<Tag>(e)));
        assert!(es.iter().all(|&e| world.has_component::<Pos>(e)));
        assert_eq!(world.remove_component_batch::<Tag>(&es), 5);
        assert_locations_consistent(&world);
    }

    #[test]
    fn despawn_batch_removes_in_descending_order() {
        let mut world = setup_world();
        let es = world.spawn_batch(10);
        for (i, &e) in es.iter().enumerate() {
            world.set_component(e, Pos { x: i as f32, y: 0.0 });
        }
        // Rows 0, 8 and 9: an ascending pass would pull row 9 into row 0 and
        // then lose track of it.
        let doomed = [es[0], es[9], es[8]];
        assert_eq!(world.despawn_batch(&doomed), 3);
        assert_eq!(world.entity_count(), 7);
        for (i, &e) in es.iter().enumerate() {
            if doomed.contains(&e) {
                assert!(!world.is_alive(e));
            } else {
                assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: i as f32, y: 0.0 }));
            }
        }
        assert_locations_consistent(&world);
    }

    #[test]
    fn wrong_length_or_unregistered_does_nothing() {
        let mut world = setup_world();
        let blob = world.register_dynamic("blob", 4, 4);
        let es = world.spawn_batch(2);
        assert_eq!(world.set_batch_by_id(&es, blob, &[0; 3]), 0);
        assert_eq!(world.archetype_count(), 1);

        #[derive(Clone, Copy, Pod, Zeroable)]
        #[repr(C)]
        struct Never(u8);
        assert_eq!(world.add_component_batch::<Never>(&es), 0);
    }
}
