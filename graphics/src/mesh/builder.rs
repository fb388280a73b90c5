//! Multi-submesh mesh with private and shared buffer storage.
//!
//! A [`Mesh`] owns at most one shared vertex buffer and one shared index
//! buffer. Each [`SubMesh`] either keeps its own private buffers or occupies an
//! [`AllocationRecord`] of the shared ones. Shared records are managed as an
//! arena:
//!
//! - New submeshes are bump-allocated after the furthest record, reusing any
//!   free capacity left at the tail of the buffer.
//! - Appending writes into the free gap right after the record if it is large
//!   enough. Otherwise the record's data plus the new data moves to the logical
//!   tail and the old region is compacted away.
//! - Replacing writes in place when the record plus its following gap can hold
//!   the new data. Shorter data leaves a gap behind.
//! - Removing compacts the buffer and shifts every record after the removed
//!   region left. A region with no data after it is zeroed instead and stays
//!   available as free tail capacity.
//!
//! After every change the submeshes' [`VertexStreamSet`](super::VertexStreamSet)
//! and [`IndexRange`] are re-derived from the records.
//!
//! # Example
//!
//! ```ignore
//! let descriptor = MeshDescriptor::for_vertex::<Vertex>().with_label("ship");
//! let mut mesh = Mesh::new(factory, descriptor)?;
//! mesh.add_submesh_default("hull", &hull_vertices, &hull_indices)?;
//! mesh.add_submesh_default("sail", &sail_vertices, &sail_indices)?;
//! mesh.append_vertices("sail", &extra)?;
//! ```

use std::sync::Arc;

use bytemuck::Pod;

use crate::error::GraphicsError;
use crate::resources::{BufferFactory, SharedBuffer};
use crate::types::{BufferDescriptor, BufferKind, IndexFormat, SetDataOptions, UsageKind};

use super::arena::{self, AllocationRecord};
use super::{AllocationState, IndexRange, StorageMode, SubMesh};

/// Descriptor for creating a [`Mesh`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshDescriptor {
    /// Debug label, used as prefix of buffer labels.
    pub label: Option<String>,
    /// Byte size of one vertex.
    pub vertex_stride: u32,
    /// Index element format.
    pub index_format: IndexFormat,
    /// Usage class of vertex buffers.
    pub vertex_usage: UsageKind,
    /// Usage class of index buffers.
    pub index_usage: UsageKind,
    /// Storage used by [`Mesh::add_submesh_default`].
    pub default_storage: StorageMode,
    /// Hint passed with every write.
    pub write_options: SetDataOptions,
}

impl MeshDescriptor {
    /// Create a descriptor for vertices of `vertex_stride` bytes.
    pub fn new(vertex_stride: u32) -> Self {
        Self {
            label: None,
            vertex_stride,
            index_format: IndexFormat::default(),
            vertex_usage: UsageKind::default(),
            index_usage: UsageKind::default(),
            default_storage: StorageMode::default(),
            write_options: SetDataOptions::default(),
        }
    }

    /// Create a descriptor for vertices of type `V`.
    pub fn for_vertex<V: Pod>() -> Self {
        Self::new(std::mem::size_of::<V>() as u32)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the index format.
    pub fn with_index_format(mut self, format: IndexFormat) -> Self {
        self.index_format = format;
        self
    }

    /// Set the vertex buffer usage.
    pub fn with_vertex_usage(mut self, usage: UsageKind) -> Self {
        self.vertex_usage = usage;
        self
    }

    /// Set the index buffer usage.
    pub fn with_index_usage(mut self, usage: UsageKind) -> Self {
        self.index_usage = usage;
        self
    }

    /// Set the default storage mode.
    pub fn with_default_storage(mut self, storage: StorageMode) -> Self {
        self.default_storage = storage;
        self
    }

    /// Set the write hint.
    pub fn with_write_options(mut self, options: SetDataOptions) -> Self {
        self.write_options = options;
        self
    }

    /// Element stride of the given buffer kind.
    pub fn stride(&self, kind: BufferKind) -> u32 {
        match kind {
            BufferKind::Vertex => self.vertex_stride,
            BufferKind::Index => self.index_format.size(),
        }
    }

    fn usage(&self, kind: BufferKind) -> UsageKind {
        match kind {
            BufferKind::Vertex => self.vertex_usage,
            BufferKind::Index => self.index_usage,
        }
    }
}

/// A mesh made of named submeshes sharing (or not) its vertex and index buffers.
pub struct Mesh {
    factory: Arc<BufferFactory>,
    descriptor: MeshDescriptor,
    shared_vertices: Option<SharedBuffer>,
    shared_indices: Option<SharedBuffer>,
    submeshes: Vec<SubMesh>,
}

impl Mesh {
    /// Create an empty mesh. No buffer is created until data is added.
    pub fn new(
        factory: Arc<BufferFactory>,
        descriptor: MeshDescriptor,
    ) -> Result<Self, GraphicsError> {
        if descriptor.vertex_stride == 0 {
            return Err(GraphicsError::InvalidArgument(
                "vertex stride cannot be zero".to_string(),
            ));
        }
        log::debug!(
            "Creating Mesh {:?} (vertex stride {}, {:?} indices)",
            descriptor.label,
            descriptor.vertex_stride,
            descriptor.index_format
        );
        Ok(Self {
            factory,
            descriptor,
            shared_vertices: None,
            shared_indices: None,
            submeshes: Vec::new(),
        })
    }

    /// Get the mesh descriptor.
    pub fn descriptor(&self) -> &MeshDescriptor {
        &self.descriptor
    }

    /// Get the mesh label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// The factory buffers are created with.
    pub fn factory(&self) -> &Arc<BufferFactory> {
        &self.factory
    }

    /// The shared vertex buffer, if any shared submesh holds vertices.
    pub fn shared_vertex_buffer(&self) -> Option<&SharedBuffer> {
        self.shared_vertices.as_ref()
    }

    /// The shared index buffer, if any shared submesh holds indices.
    pub fn shared_index_buffer(&self) -> Option<&SharedBuffer> {
        self.shared_indices.as_ref()
    }

    /// Look up a submesh by name.
    pub fn submesh(&self, name: &str) -> Option<&SubMesh> {
        self.submeshes.iter().find(|s| s.name() == name)
    }

    /// All submeshes, in insertion order.
    pub fn submeshes(&self) -> &[SubMesh] {
        &self.submeshes
    }

    /// Number of submeshes.
    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    /// Allocation of one buffer kind of a submesh.
    pub fn allocation(&self, kind: BufferKind, name: &str) -> Option<&AllocationState> {
        self.submesh(name).map(|s| s.allocation(kind))
    }

    /// Add a submesh with the given storage.
    ///
    /// # Errors
    ///
    /// Returns an argument error for an empty or duplicate name or element
    /// types that do not match the mesh strides. If the backend fails, the
    /// partial allocation is rolled back and the shared buffers are shrunk to
    /// their previous capacity.
    pub fn add_submesh<V: Pod, I: Pod>(
        &mut self,
        name: &str,
        vertices: &[V],
        indices: &[I],
        storage: StorageMode,
    ) -> Result<(), GraphicsError> {
        if name.is_empty() {
            return Err(GraphicsError::InvalidArgument(
                "submesh name is empty".to_string(),
            ));
        }
        if self.submesh(name).is_some() {
            return Err(GraphicsError::InvalidArgument(format!(
                "submesh '{name}' already exists"
            )));
        }
        let vertex_bytes = self.element_bytes(BufferKind::Vertex, vertices)?;
        let index_bytes = self.element_bytes(BufferKind::Index, indices)?;
        let capacities = BufferKind::ALL
            .map(|kind| self.shared_buffer(kind).map(|buffer| buffer.read().capacity()));

        self.submeshes
            .push(SubMesh::new(name.to_string(), storage));
        let index = self.submeshes.len() - 1;
        let result = self
            .allocate(index, BufferKind::Vertex, vertex_bytes)
            .and_then(|()| self.allocate(index, BufferKind::Index, index_bytes));
        if let Err(err) = result {
            self.roll_back_add(index, capacities);
            return self.settle(Err(err));
        }

        log::debug!(
            "Mesh {:?}: added {:?} submesh '{}' ({} vertices, {} indices)",
            self.descriptor.label,
            storage,
            name,
            vertices.len(),
            indices.len()
        );
        self.finish()
    }

    /// Add a submesh with the descriptor's default storage.
    pub fn add_submesh_default<V: Pod, I: Pod>(
        &mut self,
        name: &str,
        vertices: &[V],
        indices: &[I],
    ) -> Result<(), GraphicsError> {
        self.add_submesh(name, vertices, indices, self.descriptor.default_storage)
    }

    /// Append vertices to a submesh.
    pub fn append_vertices<V: Pod>(&mut self, name: &str, vertices: &[V]) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let bytes = self.element_bytes(BufferKind::Vertex, vertices)?;
        let result = self.append(index, BufferKind::Vertex, bytes);
        self.settle(result)
    }

    /// Append indices to a submesh.
    pub fn append_indices<I: Pod>(&mut self, name: &str, indices: &[I]) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let bytes = self.element_bytes(BufferKind::Index, indices)?;
        let result = self.append(index, BufferKind::Index, bytes);
        self.settle(result)
    }

    /// Replace all vertices of a submesh. Empty data releases its allocation.
    pub fn replace_vertices<V: Pod>(&mut self, name: &str, vertices: &[V]) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let bytes = self.element_bytes(BufferKind::Vertex, vertices)?;
        let result = self.replace(index, BufferKind::Vertex, bytes);
        self.settle(result)
    }

    /// Replace all indices of a submesh. Empty data releases its allocation.
    pub fn replace_indices<I: Pod>(&mut self, name: &str, indices: &[I]) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let bytes = self.element_bytes(BufferKind::Index, indices)?;
        let result = self.replace(index, BufferKind::Index, bytes);
        self.settle(result)
    }

    /// Remove `length` vertices at `offset` (relative to the submesh).
    ///
    /// With `reset_only` the range is zeroed and nothing moves.
    pub fn remove_vertices(
        &mut self,
        name: &str,
        offset: usize,
        length: usize,
        reset_only: bool,
    ) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let result = self.remove_range(index, BufferKind::Vertex, offset, length, reset_only);
        self.settle(result)
    }

    /// Remove `length` indices at `offset` (relative to the submesh).
    ///
    /// With `reset_only` the range is zeroed and nothing moves.
    pub fn remove_indices(
        &mut self,
        name: &str,
        offset: usize,
        length: usize,
        reset_only: bool,
    ) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let result = self.remove_range(index, BufferKind::Index, offset, length, reset_only);
        self.settle(result)
    }

    /// Remove a submesh, releasing its buffers or shared regions.
    pub fn remove_submesh(&mut self, name: &str) -> Result<(), GraphicsError> {
        let index = self.find(name)?;
        let result = self.release_submesh(index);
        if result.is_ok() {
            self.submeshes.remove(index);
            log::debug!(
                "Mesh {:?}: removed submesh '{}'",
                self.descriptor.label,
                name
            );
        }
        self.settle(result)
    }

    /// Read all vertices of a submesh.
    pub fn read_vertices<V: Pod>(&self, name: &str) -> Result<Vec<V>, GraphicsError> {
        self.check_element::<V>(BufferKind::Vertex)?;
        self.read_elements(self.find(name)?, BufferKind::Vertex)
    }

    /// Read all indices of a submesh.
    pub fn read_indices<I: Pod>(&self, name: &str) -> Result<Vec<I>, GraphicsError> {
        self.check_element::<I>(BufferKind::Index)?;
        self.read_elements(self.find(name)?, BufferKind::Index)
    }

    /// Close every gap in the shared buffers and trim free tail capacity.
    ///
    /// Records keep their relative order. Returns the number of elements
    /// reclaimed over both buffers.
    pub fn compact(&mut self) -> Result<usize, GraphicsError> {
        let mut reclaimed = 0;
        for kind in BufferKind::ALL {
            let Some(buffer) = self.shared_buffer(kind).cloned() else {
                continue;
            };

            let mut order: Vec<(usize, AllocationRecord)> = self
                .submeshes
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.allocation(kind).record().map(|r| (i, r)))
                .collect();
            order.sort_by_key(|(_, r)| r.offset);

            let mut handle = buffer.write();
            let capacity = handle.capacity();
            let mut packed = Vec::new();
            let mut placements = Vec::with_capacity(order.len());
            let mut cursor = 0;
            for (index, record) in &order {
                packed.extend(handle.read_bytes(record.offset, record.length)?);
                placements.push((*index, cursor));
                cursor += record.length;
            }

            if cursor == 0 {
                drop(handle);
                *self.shared_slot(kind) = None;
                reclaimed += capacity;
                continue;
            }

            if cursor < capacity {
                handle.rebuild(cursor, &packed)?;
                reclaimed += capacity - cursor;
            } else {
                handle.write_bytes(0, &packed, self.descriptor.write_options)?;
            }
            for (index, offset) in placements {
                if let Some(record) = self.submeshes[index].record_mut(kind) {
                    record.offset = offset;
                }
            }
            log::debug!(
                "Mesh {:?}: compacted shared {} buffer {} -> {}",
                self.descriptor.label,
                kind.name(),
                capacity,
                cursor
            );
        }
        self.finish()?;
        Ok(reclaimed)
    }

    /// Dispose the mesh, its shared buffers and every submesh's private buffers.
    pub fn dispose(self) {
        log::debug!(
            "Mesh {:?}: disposing {} submeshes",
            self.descriptor.label,
            self.submeshes.len()
        );
    }

    fn find(&self, name: &str) -> Result<usize, GraphicsError> {
        self.submeshes
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("no submesh named '{name}'")))
    }

    fn check_element<T: Pod>(&self, kind: BufferKind) -> Result<(), GraphicsError> {
        let size = std::mem::size_of::<T>();
        let stride = self.descriptor.stride(kind);
        if size != stride as usize {
            return Err(GraphicsError::InvalidArgument(format!(
                "{} element of {size} bytes does not match stride {stride}",
                kind.name()
            )));
        }
        Ok(())
    }

    fn element_bytes<'a, T: Pod>(
        &self,
        kind: BufferKind,
        data: &'a [T],
    ) -> Result<&'a [u8], GraphicsError> {
        self.check_element::<T>(kind)?;
        Ok(bytemuck::cast_slice(data))
    }

    fn element_count(&self, kind: BufferKind, bytes: &[u8]) -> usize {
        bytes.len() / self.descriptor.stride(kind) as usize
    }

    fn shared_buffer(&self, kind: BufferKind) -> Option<&SharedBuffer> {
        match kind {
            BufferKind::Vertex => self.shared_vertices.as_ref(),
            BufferKind::Index => self.shared_indices.as_ref(),
        }
    }

    fn shared_slot(&mut self, kind: BufferKind) -> &mut Option<SharedBuffer> {
        match kind {
            BufferKind::Vertex => &mut self.shared_vertices,
            BufferKind::Index => &mut self.shared_indices,
        }
    }

    fn require_shared(&self, kind: BufferKind) -> Result<SharedBuffer, GraphicsError> {
        self.shared_buffer(kind).cloned().ok_or_else(|| {
            GraphicsError::InvariantViolation(format!(
                "shared {} record without a shared buffer",
                kind.name()
            ))
        })
    }

    fn shared_records(&self, kind: BufferKind) -> Vec<AllocationRecord> {
        self.submeshes
            .iter()
            .filter_map(|s| s.allocation(kind).record())
            .collect()
    }

    fn create_buffer(
        &self,
        kind: BufferKind,
        bytes: &[u8],
        owner: Option<&str>,
    ) -> Result<SharedBuffer, GraphicsError> {
        let mesh = self.descriptor.label.as_deref().unwrap_or("mesh");
        let label = match owner {
            Some(submesh) => format!("{mesh}/{submesh}/{}", kind.name()),
            None => format!("{mesh}/shared-{}", kind.name()),
        };
        let descriptor = BufferDescriptor::new(
            kind,
            self.descriptor.stride(kind),
            self.element_count(kind, bytes),
        )
        .with_usage_kind(self.descriptor.usage(kind))
        .with_label(label);

        let buffer = self.factory.create_buffer(&descriptor)?;
        buffer
            .write()
            .write_bytes(0, bytes, self.descriptor.write_options)?;
        Ok(buffer)
    }

    // First allocation of an unallocated kind.
    fn allocate(&mut self, index: usize, kind: BufferKind, bytes: &[u8]) -> Result<(), GraphicsError> {
        let count = self.element_count(kind, bytes);
        if count == 0 {
            return Ok(());
        }
        debug_assert!(self.submeshes[index].allocation(kind).is_unallocated());

        let state = match self.submeshes[index].storage() {
            StorageMode::Private => {
                let buffer = self.create_buffer(kind, bytes, Some(self.submeshes[index].name()))?;
                AllocationState::Private(buffer)
            }
            StorageMode::Shared => {
                let offset = match self.shared_buffer(kind).cloned() {
                    Some(buffer) => {
                        let offset = arena::find_next_buffer_offset(&self.shared_records(kind));
                        buffer
                            .write()
                            .write_bytes(offset, bytes, self.descriptor.write_options)?;
                        offset
                    }
                    None => {
                        let buffer = self.create_buffer(kind, bytes, None)?;
                        *self.shared_slot(kind) = Some(buffer);
                        0
                    }
                };
                log::trace!(
                    "Mesh: allocated {} {} elements at {}",
                    count,
                    kind.name(),
                    offset
                );
                AllocationState::Shared(AllocationRecord::new(offset, count))
            }
        };
        *self.submeshes[index].allocation_mut(kind) = state;
        Ok(())
    }

    fn append(&mut self, index: usize, kind: BufferKind, bytes: &[u8]) -> Result<(), GraphicsError> {
        let count = self.element_count(kind, bytes);
        if count == 0 {
            return Ok(());
        }
        let options = self.descriptor.write_options;

        match self.submeshes[index].allocation(kind).clone() {
            AllocationState::Unallocated => self.allocate(index, kind, bytes),
            AllocationState::Private(buffer) => {
                let mut handle = buffer.write();
                let end = handle.element_count();
                handle.write_bytes(end, bytes, options)?;
                Ok(())
            }
            AllocationState::Shared(record) => {
                let buffer = self.require_shared(kind)?;
                let records = self.shared_records(kind);
                let capacity = buffer.read().capacity();
                let tail = arena::find_next_buffer_offset(&records);
                let gap_fits = arena::check_buffer_free_space(
                    &records,
                    record.offset,
                    record.length,
                    capacity,
                )
                .is_some_and(|gap| gap.length >= count);

                if gap_fits || record.end() == tail {
                    buffer.write().write_bytes(record.end(), bytes, options)?;
                    self.set_record(index, kind, AllocationRecord::new(record.offset, record.length + count));
                    return Ok(());
                }

                let mut payload = buffer.read().read_bytes(record.offset, record.length)?;
                payload.extend_from_slice(bytes);
                self.relocate(index, kind, record, &payload)
            }
        }
    }

    fn replace(&mut self, index: usize, kind: BufferKind, bytes: &[u8]) -> Result<(), GraphicsError> {
        let count = self.element_count(kind, bytes);
        let options = self.descriptor.write_options;

        match self.submeshes[index].allocation(kind).clone() {
            AllocationState::Unallocated => self.allocate(index, kind, bytes),
            AllocationState::Private(_) if count == 0 => {
                *self.submeshes[index].allocation_mut(kind) = AllocationState::Unallocated;
                Ok(())
            }
            AllocationState::Private(buffer) => {
                let mut handle = buffer.write();
                if handle.capacity() == count {
                    handle.write_bytes(0, bytes, options)?;
                } else {
                    handle.rebuild(count, bytes)?;
                }
                Ok(())
            }
            AllocationState::Shared(record) if count == 0 => {
                self.release_region(kind, record)?;
                *self.submeshes[index].allocation_mut(kind) = AllocationState::Unallocated;
                Ok(())
            }
            AllocationState::Shared(record) => {
                let buffer = self.require_shared(kind)?;
                let records = self.shared_records(kind);
                let capacity = buffer.read().capacity();
                let tail = arena::find_next_buffer_offset(&records);
                let room = record.length
                    + arena::check_buffer_free_space(&records, record.offset, record.length, capacity)
                        .map_or(0, |gap| gap.length);

                if count <= room || record.end() == tail {
                    buffer.write().write_bytes(record.offset, bytes, options)?;
                    self.set_record(index, kind, AllocationRecord::new(record.offset, count));
                    return Ok(());
                }

                self.relocate(index, kind, record, bytes)
            }
        }
    }

    fn remove_range(
        &mut self,
        index: usize,
        kind: BufferKind,
        offset: usize,
        length: usize,
        reset_only: bool,
    ) -> Result<(), GraphicsError> {
        if length == 0 {
            return Ok(());
        }
        let state = self.submeshes[index].allocation(kind).clone();
        let total = state.length();
        if length > total || offset >= total || offset + length > total {
            return Err(GraphicsError::out_of_range(
                "submesh range",
                offset,
                length,
                total,
            ));
        }

        match state {
            AllocationState::Unallocated => {}
            AllocationState::Private(buffer) => {
                if reset_only {
                    buffer.write().clear_range(offset, length)?;
                } else if length == total {
                    *self.submeshes[index].allocation_mut(kind) = AllocationState::Unallocated;
                } else if offset + length == total {
                    buffer.write().resize(offset)?;
                } else {
                    buffer.write().remove_data(offset, length, false)?;
                }
            }
            AllocationState::Shared(record) => {
                let region = AllocationRecord::new(record.offset + offset, length);
                if reset_only {
                    let buffer = self.require_shared(kind)?;
                    buffer.write().clear_range(region.offset, region.length)?;
                    return Ok(());
                }
                self.release_region(kind, region)?;
                let state = if length == total {
                    AllocationState::Unallocated
                } else {
                    AllocationState::Shared(AllocationRecord::new(record.offset, total - length))
                };
                *self.submeshes[index].allocation_mut(kind) = state;
            }
        }
        Ok(())
    }

    // Cut `record` out of the shared buffer and place `payload` after the last
    // remaining record. Records change only once the buffer swap succeeded.
    fn relocate(
        &mut self,
        index: usize,
        kind: BufferKind,
        record: AllocationRecord,
        payload: &[u8],
    ) -> Result<(), GraphicsError> {
        let buffer = self.require_shared(kind)?;
        let stride = self.descriptor.stride(kind) as usize;
        let count = payload.len() / stride;
        let tail = arena::find_next_buffer_offset(&self.shared_records(kind));
        {
            let mut handle = buffer.write();
            let mut contents = handle.read_bytes(0, tail)?;
            contents.drain(record.offset * stride..record.end() * stride);
            contents.extend_from_slice(payload);
            let capacity = handle.capacity().max(tail + count) - record.length;
            handle.rebuild(capacity, &contents)?;
        }

        arena::shift_offsets(
            self.submeshes.iter_mut().filter_map(|s| s.record_mut(kind)),
            record.offset,
            record.length,
        );
        let offset = tail - record.length;
        self.set_record(index, kind, AllocationRecord::new(offset, count));
        log::debug!(
            "Mesh: moved {} record {} -> {} ({} elements)",
            kind.name(),
            record.offset,
            offset,
            count
        );
        Ok(())
    }

    // Undo a partially allocated submesh at `index` and shrink the shared
    // buffers back to `capacities`.
    fn roll_back_add(&mut self, index: usize, capacities: [Option<usize>; 2]) {
        let name = self.submeshes[index].name().to_string();
        if let Err(err) = self.release_submesh(index) {
            log::warn!("Mesh: failed to roll back submesh '{}': {}", name, err);
        }
        self.submeshes.remove(index);

        for (kind, capacity) in BufferKind::ALL.into_iter().zip(capacities) {
            let (Some(buffer), Some(capacity)) = (self.shared_buffer(kind), capacity) else {
                continue;
            };
            let mut handle = buffer.write();
            if handle.capacity() > capacity {
                if let Err(err) = handle.resize(capacity) {
                    log::warn!(
                        "Mesh: failed to restore shared {} capacity {}: {}",
                        kind.name(),
                        capacity,
                        err
                    );
                }
            }
        }
    }

    // Re-derive draw data whether or not the edit succeeded, so bindings
    // always match the records.
    fn settle(&mut self, result: Result<(), GraphicsError>) -> Result<(), GraphicsError> {
        match result {
            Ok(()) => self.finish(),
            Err(err) => {
                if let Err(refresh) = self.finish() {
                    log::warn!("Mesh: failed to refresh draw data: {}", refresh);
                }
                Err(err)
            }
        }
    }

    fn release_submesh(&mut self, index: usize) -> Result<(), GraphicsError> {
        for kind in BufferKind::ALL {
            if let Some(record) = self.submeshes[index].allocation(kind).record() {
                self.release_region(kind, record)?;
            }
            *self.submeshes[index].allocation_mut(kind) = AllocationState::Unallocated;
        }
        Ok(())
    }

    // Give back a shared region no longer referenced as live data. Records
    // must already describe the state after the release, except that the
    // region may still lie inside its owner's record.
    fn release_region(
        &mut self,
        kind: BufferKind,
        region: AllocationRecord,
    ) -> Result<(), GraphicsError> {
        let buffer = self.require_shared(kind)?;
        let records = self.shared_records(kind);
        let data_follows = records.iter().any(|r| r.end() > region.end());

        if data_follows {
            buffer
                .write()
                .remove_data(region.offset, region.length, false)?;
            let shifted = arena::shift_offsets(
                self.submeshes.iter_mut().filter_map(|s| s.record_mut(kind)),
                region.offset,
                region.length,
            );
            log::debug!(
                "Mesh: compacted {} {} elements at {}, shifted {} records",
                region.length,
                kind.name(),
                region.offset,
                shifted
            );
        } else if records
            .iter()
            .all(|r| r.offset >= region.offset && r.end() <= region.end())
        {
            log::debug!("Mesh: releasing shared {} buffer", kind.name());
            *self.shared_slot(kind) = None;
        } else {
            buffer.write().clear_range(region.offset, region.length)?;
            log::trace!(
                "Mesh: freed {} {} elements at the tail ({})",
                region.length,
                kind.name(),
                region.offset
            );
        }
        Ok(())
    }

    fn set_record(&mut self, index: usize, kind: BufferKind, record: AllocationRecord) {
        *self.submeshes[index].allocation_mut(kind) = AllocationState::Shared(record);
    }

    fn read_elements<T: Pod>(&self, index: usize, kind: BufferKind) -> Result<Vec<T>, GraphicsError> {
        match self.submeshes[index].allocation(kind) {
            AllocationState::Unallocated => Ok(Vec::new()),
            AllocationState::Private(buffer) => buffer.read().read_all(),
            AllocationState::Shared(record) => {
                let buffer = self.require_shared(kind)?;
                let mut out = vec![T::zeroed(); record.length];
                buffer
                    .read()
                    .get_data(record.offset, &mut out, 0, record.length)?;
                Ok(out)
            }
        }
    }

    // Validate the arena and re-derive every submesh's draw data.
    fn finish(&mut self) -> Result<(), GraphicsError> {
        for kind in BufferKind::ALL {
            let records = self.shared_records(kind);
            match self.shared_buffer(kind) {
                Some(buffer) => arena::validate_records(&records, buffer.read().capacity())?,
                None if records.is_empty() => {}
                None => {
                    self.require_shared(kind)?;
                }
            }
        }

        let shared_vertices = self.shared_vertices.clone();
        let shared_indices = self.shared_indices.clone();
        let format = self.descriptor.index_format;
        for submesh in &mut self.submeshes {
            let vertices = binding_source(submesh.allocation(BufferKind::Vertex), &shared_vertices);
            let indices = binding_source(submesh.allocation(BufferKind::Index), &shared_indices);
            let (streams, range) = submesh.draw_data_mut();

            match vertices {
                Some((buffer, offset, count)) => {
                    streams.set_binding(&buffer, to_u32(offset, "vertex offset")?, 0, 0)?;
                    streams.set_vertex_count(to_u32(count, "vertex count")?);
                }
                None => {
                    streams.clear();
                    streams.set_vertex_count(0);
                }
            }

            *range = match indices {
                Some((buffer, offset, count)) => IndexRange::new(
                    &buffer,
                    format,
                    to_u32(offset, "start index")?,
                    to_u32(count, "index count")?,
                ),
                None => {
                    let mut range = IndexRange::default();
                    range.format = format;
                    range
                }
            };
        }
        Ok(())
    }
}

fn binding_source(
    state: &AllocationState,
    shared: &Option<SharedBuffer>,
) -> Option<(SharedBuffer, usize, usize)> {
    match state {
        AllocationState::Unallocated => None,
        AllocationState::Private(buffer) => {
            let count = buffer.read().element_count();
            Some((Arc::clone(buffer), 0, count))
        }
        AllocationState::Shared(record) => shared
            .as_ref()
            .map(|buffer| (Arc::clone(buffer), record.offset, record.length)),
    }
}

fn to_u32(value: usize, what: &'static str) -> Result<u32, GraphicsError> {
    u32::try_from(value)
        .map_err(|_| GraphicsError::out_of_range(what, value, 0, u32::MAX as usize))
}

impl Drop for Mesh {
    fn drop(&mut self) {
        // Submeshes first so their private buffers go before the shared ones
        self.submeshes.clear();
        self.shared_vertices = None;
        self.shared_indices = None;
        log::trace!("Mesh {:?}: dropped", self.descriptor.label);
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("label", &self.descriptor.label)
            .field("submeshes", &self.submeshes.len())
            .field("shared_vertices", &self.shared_vertices.as_ref().map(|b| b.read().id()))
            .field("shared_indices", &self.shared_indices.as_ref().map(|b| b.read().id()))
            .finish()
    }
}

// Ensure Mesh is Send + Sync
static_assertions::assert_impl_all!(Mesh: Send, Sync);
