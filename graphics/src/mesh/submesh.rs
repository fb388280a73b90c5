//! Submeshes and their buffer allocations.

use crate::resources::SharedBuffer;
use crate::types::BufferKind;

use super::{AllocationRecord, IndexRange, VertexStreamSet};

/// Where a submesh keeps its geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageMode {
    /// Dedicated buffers sized exactly to the submesh data.
    Private,
    /// A slice of the mesh-wide shared buffer.
    #[default]
    Shared,
}

/// Allocation of one buffer kind of a submesh.
#[derive(Debug, Clone, Default)]
pub enum AllocationState {
    /// No data of this kind.
    #[default]
    Unallocated,
    /// A buffer owned by the submesh alone.
    Private(SharedBuffer),
    /// A slice of the mesh's shared buffer.
    Shared(AllocationRecord),
}

impl AllocationState {
    /// Number of elements allocated.
    pub fn length(&self) -> usize {
        match self {
            Self::Unallocated => 0,
            Self::Private(buffer) => buffer.read().element_count(),
            Self::Shared(record) => record.length,
        }
    }

    /// The shared-buffer record, if the allocation is shared.
    pub fn record(&self) -> Option<AllocationRecord> {
        match self {
            Self::Shared(record) => Some(*record),
            _ => None,
        }
    }

    /// Whether nothing is allocated.
    pub fn is_unallocated(&self) -> bool {
        matches!(self, Self::Unallocated)
    }
}

/// One independently editable chunk of a [`Mesh`](super::Mesh).
///
/// The draw data ([`vertex_streams`](Self::vertex_streams) and
/// [`index_range`](Self::index_range)) is kept in sync with the allocations by
/// the owning mesh.
#[derive(Debug)]
pub struct SubMesh {
    name: String,
    storage: StorageMode,
    vertices: AllocationState,
    indices: AllocationState,
    streams: VertexStreamSet,
    index_range: IndexRange,
}

impl SubMesh {
    pub(crate) fn new(name: String, storage: StorageMode) -> Self {
        Self {
            name,
            storage,
            vertices: AllocationState::Unallocated,
            indices: AllocationState::Unallocated,
            streams: VertexStreamSet::new(),
            index_range: IndexRange::default(),
        }
    }

    /// Name of the submesh, unique within its mesh.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage mode chosen when the submesh was added.
    pub fn storage(&self) -> StorageMode {
        self.storage
    }

    /// Allocation of the given buffer kind.
    pub fn allocation(&self, kind: BufferKind) -> &AllocationState {
        match kind {
            BufferKind::Vertex => &self.vertices,
            BufferKind::Index => &self.indices,
        }
    }

    /// Vertex streams to bind when drawing this submesh.
    pub fn vertex_streams(&self) -> &VertexStreamSet {
        &self.streams
    }

    /// Index range to draw.
    pub fn index_range(&self) -> &IndexRange {
        &self.index_range
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.length()
    }

    /// Number of indices.
    pub fn index_count(&self) -> usize {
        self.indices.length()
    }

    pub(crate) fn allocation_mut(&mut self, kind: BufferKind) -> &mut AllocationState {
        match kind {
            BufferKind::Vertex => &mut self.vertices,
            BufferKind::Index => &mut self.indices,
        }
    }

    pub(crate) fn record_mut(&mut self, kind: BufferKind) -> Option<&mut AllocationRecord> {
        match self.allocation_mut(kind) {
            AllocationState::Shared(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn draw_data_mut(&mut self) -> (&mut VertexStreamSet, &mut IndexRange) {
        (&mut self.streams, &mut self.index_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{BufferFactory, FactoryParameters};
    use crate::types::UsageKind;

    #[test]
    fn test_allocation_state() {
        let state = AllocationState::Shared(AllocationRecord::new(4, 6));
        assert_eq!(state.length(), 6);
        assert_eq!(state.record(), Some(AllocationRecord::new(4, 6)));

        let factory = BufferFactory::new(FactoryParameters::default());
        let buffer = factory
            .create_with_data(BufferKind::Vertex, UsageKind::Static, &[1u32, 2, 3])
            .unwrap();
        let state = AllocationState::Private(buffer);
        assert_eq!(state.length(), 3);
        assert_eq!(state.record(), None);

        assert!(AllocationState::default().is_unallocated());
    }

    #[test]
    fn test_new_submesh_is_empty() {
        let mut submesh = SubMesh::new("hull".to_string(), StorageMode::Shared);
        assert_eq!(submesh.name(), "hull");
        assert_eq!(submesh.vertex_count(), 0);
        assert!(submesh.allocation(BufferKind::Index).is_unallocated());
        assert!(submesh.record_mut(BufferKind::Vertex).is_none());
        assert!(submesh.vertex_streams().is_empty());
    }
}
