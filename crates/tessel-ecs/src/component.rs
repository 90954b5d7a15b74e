//! Component type registration and metadata.
//!
//! Every component type used by a [`World`](crate::world::World) must be
//! registered in its [`ComponentRegistry`] first. Registration produces a
//! dense [`ComponentId`] in `[0, MAX_COMPONENTS)` that doubles as the bit
//! index in archetype [`Signature`](crate::signature::Signature)s and as the
//! key of each archetype's column-slot table.

use std::alloc::Layout;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Hard upper bound on distinct component types per registry.
pub const MAX_COMPONENTS: usize = 256;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Marker for types that can live in archetype columns.
///
/// Columns are plain byte buffers: a newly added component starts out as
/// all-zero bytes and migrations copy bytes between columns. `Pod` guarantees
/// both are sound, so any `#[derive(Pod, Zeroable)]` type qualifies.
pub trait Component: bytemuck::Pod + Send + Sync + 'static {}

impl<T: bytemuck::Pod + Send + Sync + 'static> Component for T {}

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Opaque, dense identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) u8);

impl ComponentId {
    /// The id as an index into per-component tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Id assigned at registration time.
    pub id: ComponentId,
    /// Rust type name for typed registrations, caller-supplied for dynamic ones.
    pub name: String,
    /// Byte size of one value.
    pub size: usize,
    /// Required alignment of one value.
    pub align: usize,
    /// Rust `TypeId`, or `None` for dynamic (byte-level) components.
    pub type_id: Option<TypeId>,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping component types to [`ComponentId`]s and their layout.
///
/// Owned by a single [`World`](crate::world::World); there is no
/// process-wide registry. Registrations are permanent.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentId>,
    by_name: HashMap<String, ComponentId>,
    /// Indexed by `ComponentId::index()`.
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, returning its id.
    ///
    /// Re-registering the same type returns the existing id.
    ///
    /// # Panics
    ///
    /// Panics if this would be the 257th distinct component type.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        self.try_register::<T>()
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`register`](Self::register).
    pub fn try_register<T: Component>(&mut self) -> Result<ComponentId, EcsError> {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            return Ok(existing);
        }
        let id = self.push_info(
            std::any::type_name::<T>().to_owned(),
            Layout::new::<T>(),
            Some(rust_type_id),
        )?;
        self.by_type.insert(rust_type_id, id);
        Ok(id)
    }

    /// Register a byte-level component that has no Rust type behind it.
    ///
    /// Dynamic components are keyed by `name`: registering the same name
    /// twice returns the first id and ignores the new layout.
    ///
    /// # Panics
    ///
    /// Panics if the layout is invalid or the registry is full.
    pub fn register_dynamic(&mut self, name: &str, size: usize, align: usize) -> ComponentId {
        self.try_register_dynamic(name, size, align)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`register_dynamic`](Self::register_dynamic).
    pub fn try_register_dynamic(
        &mut self,
        name: &str,
        size: usize,
        align: usize,
    ) -> Result<ComponentId, EcsError> {
        if let Some(&existing) = self.by_name.get(name) {
            return Ok(existing);
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| EcsError::InvalidLayout {
            name: name.to_owned(),
            size,
            align,
        })?;
        let id = self.push_info(name.to_owned(), layout, None)?;
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    fn push_info(
        &mut self,
        name: String,
        layout: Layout,
        type_id: Option<TypeId>,
    ) -> Result<ComponentId, EcsError> {
        if self.infos.len() >= MAX_COMPONENTS {
            return Err(EcsError::ComponentCapacityExceeded {
                limit: MAX_COMPONENTS,
            });
        }
        let id = ComponentId(self.infos.len() as u8);
        self.infos.push(ComponentInfo {
            id,
            name,
            size: layout.size(),
            align: layout.align(),
            type_id,
        });
        Ok(id)
    }

    /// Look up the id of a registered Rust type.
    #[inline]
    pub fn lookup<T: 'static>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up a dynamic component by the name it was registered under.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Metadata for `id`.
    #[inline]
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Byte size of one value of `id`.
    #[inline]
    pub fn size_of(&self, id: ComponentId) -> Option<usize> {
        self.info(id).map(|info| info.size)
    }

    /// Whether `id` was issued by this registry.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        id.index() < self.infos.len()
    }

    /// Diagnostic name of `id`, or `"<unregistered>"`.
    pub(crate) fn name_of(&self, id: ComponentId) -> &str {
        self.info(id).map_or("<unregistered>", |info| info.name.as_str())
    }

    /// Number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck_derive::{Pod, Zeroable};

    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct Mass(f64);

    #[test]
    fn register_and_lookup() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Pos>();
        assert_eq!(reg.lookup::<Pos>(), Some(id));
        assert_eq!(reg.lookup::<Mass>(), None);
    }

    #[test]
    fn same_type_same_id() {
        let mut reg = ComponentRegistry::new();
        let id1 = reg.register::<Pos>();
        let id2 = reg.register::<Pos>();
        assert_eq!(id1, id2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn ids_are_dense() {
        let mut reg = ComponentRegistry::new();
        let p = reg.register::<Pos>();
        let m = reg.register::<Mass>();
        assert_eq!(p.index(), 0);
        assert_eq!(m.index(), 1);
    }

    #[test]
    fn info_records_layout() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Mass>();
        let info = reg.info(id).unwrap();
        assert_eq!(info.size, 8);
        assert_eq!(info.align, std::mem::align_of::<f64>());
        assert_eq!(info.type_id, Some(TypeId::of::<Mass>()));
        assert_eq!(reg.size_of(id), Some(8));
    }

    #[test]
    fn dynamic_registration_is_keyed_by_name() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register_dynamic("blob", 12, 4);
        let again = reg.register_dynamic("blob", 99, 1);
        let b = reg.register_dynamic("other", 12, 4);
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(reg.size_of(a), Some(12));
        assert_eq!(reg.lookup_by_name("other"), Some(b));
    }

    #[test]
    fn dynamic_registration_rejects_bad_alignment() {
        let mut reg = ComponentRegistry::new();
        let err = reg.try_register_dynamic("odd", 4, 3).unwrap_err();
        assert!(matches!(err, EcsError::InvalidLayout { align: 3, .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut reg = ComponentRegistry::new();
        for i in 0..MAX_COMPONENTS {
            reg.register_dynamic(&format!("field_{i}"), 4, 4);
        }
        assert_eq!(reg.len(), MAX_COMPONENTS);
        let err = reg.try_register::<Pos>().unwrap_err();
        assert!(matches!(err, EcsError::ComponentCapacityExceeded { limit: 256 }));
        // Existing registrations still resolve once full.
        assert_eq!(reg.lookup_by_name("field_255").map(|id| id.index()), Some(255));
    }
}
