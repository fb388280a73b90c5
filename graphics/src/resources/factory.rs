//! Buffer factory.
//!
//! The [`BufferFactory`] is the single place buffers come from. It validates
//! descriptors against its [`FactoryParameters`], asks the backend for hardware
//! buffers, wraps them in [`BufferHandle`]s and keeps weak references to every
//! handle it created for accounting.

use std::sync::{Arc, Weak};

use bytemuck::Pod;
use parking_lot::RwLock;

use crate::backend::{self, BackendType, GpuBackend, GpuBuffer};
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferKind, IndexFormat, SetDataOptions, UsageKind};

use super::{BufferHandle, SharedBuffer};

/// Configuration of a [`BufferFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactoryParameters {
    /// Backend to create when the factory builds its own.
    pub backend: BackendType,
    /// Largest buffer the factory will create, in bytes.
    pub max_buffer_size: u64,
    /// Prefix prepended to every buffer label.
    pub label_prefix: Option<String>,
}

impl Default for FactoryParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            max_buffer_size: 1 << 30, // 1 GB
            label_prefix: None,
        }
    }
}

impl FactoryParameters {
    /// Create parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend type.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set the maximum buffer size in bytes.
    pub fn with_max_buffer_size(mut self, max_buffer_size: u64) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Set the label prefix.
    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = Some(prefix.into());
        self
    }
}

/// Creates [`BufferHandle`]s of a requested kind, usage, stride and capacity.
///
/// # Example
///
/// ```ignore
/// let factory = BufferFactory::new(FactoryParameters::default());
/// let vertices = factory.create_vertex_buffer::<Vertex>(UsageKind::Static, 1024)?;
/// let indices = factory.create_index_buffer(IndexFormat::Uint16, UsageKind::Static, 3072)?;
/// ```
pub struct BufferFactory {
    backend: Arc<dyn GpuBackend>,
    parameters: FactoryParameters,
    // Weak references for accounting; ownership stays with the callers.
    buffers: RwLock<Vec<Weak<RwLock<BufferHandle>>>>,
}

impl BufferFactory {
    /// Create a factory with the backend named in `parameters`.
    pub fn new(parameters: FactoryParameters) -> Arc<Self> {
        let backend = backend::create_backend(parameters.backend);
        Self::with_backend(backend, parameters)
    }

    /// Create a factory on top of an existing backend.
    pub fn with_backend(backend: Arc<dyn GpuBackend>, parameters: FactoryParameters) -> Arc<Self> {
        log::debug!(
            "Creating BufferFactory on {} backend (max buffer size {})",
            backend.name(),
            parameters.max_buffer_size
        );
        Arc::new(Self {
            backend,
            parameters,
            buffers: RwLock::new(Vec::new()),
        })
    }

    /// The backend buffers are created on.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The factory configuration.
    pub fn parameters(&self) -> &FactoryParameters {
        &self.parameters
    }

    /// Create an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is zero, the size exceeds
    /// [`FactoryParameters::max_buffer_size`], or the backend fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<SharedBuffer, GraphicsError> {
        let mut descriptor = descriptor.clone();
        if let Some(prefix) = &self.parameters.label_prefix {
            descriptor.label = Some(match descriptor.label.take() {
                Some(label) => format!("{prefix}/{label}"),
                None => prefix.clone(),
            });
        }

        let handle = BufferHandle::new(Arc::clone(self), descriptor)?;
        let buffer = Arc::new(RwLock::new(handle));
        let mut buffers = self.buffers.write();
        buffers.retain(|b| b.strong_count() > 0);
        buffers.push(Arc::downgrade(&buffer));
        drop(buffers);
        Ok(buffer)
    }

    /// Create an empty vertex buffer for elements of type `V`.
    pub fn create_vertex_buffer<V: Pod>(
        self: &Arc<Self>,
        usage_kind: UsageKind,
        capacity: usize,
    ) -> Result<SharedBuffer, GraphicsError> {
        let descriptor = BufferDescriptor::new(
            BufferKind::Vertex,
            std::mem::size_of::<V>() as u32,
            capacity,
        )
        .with_usage_kind(usage_kind);
        self.create_buffer(&descriptor)
    }

    /// Create an empty index buffer.
    pub fn create_index_buffer(
        self: &Arc<Self>,
        format: IndexFormat,
        usage_kind: UsageKind,
        capacity: usize,
    ) -> Result<SharedBuffer, GraphicsError> {
        let descriptor = BufferDescriptor::new(BufferKind::Index, format.size(), capacity)
            .with_usage_kind(usage_kind);
        self.create_buffer(&descriptor)
    }

    /// Create a buffer sized exactly to `data` and upload it.
    pub fn create_with_data<T: Pod>(
        self: &Arc<Self>,
        kind: BufferKind,
        usage_kind: UsageKind,
        data: &[T],
    ) -> Result<SharedBuffer, GraphicsError> {
        let descriptor = BufferDescriptor::new(kind, std::mem::size_of::<T>() as u32, data.len())
            .with_usage_kind(usage_kind)
            .with_label(kind.name());
        self.create_labeled_with_data(&descriptor, data)
    }

    /// Create a buffer from `descriptor` (its capacity is replaced by
    /// `data.len()`) and upload `data`.
    pub fn create_labeled_with_data<T: Pod>(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        data: &[T],
    ) -> Result<SharedBuffer, GraphicsError> {
        let descriptor = descriptor.clone().with_capacity(data.len());
        let buffer = self.create_buffer(&descriptor)?;
        buffer
            .write()
            .set_data(0, data, 0, data.len(), SetDataOptions::Discard)?;
        Ok(buffer)
    }

    /// Validate a descriptor and create the hardware buffer for it.
    pub(crate) fn allocate_raw(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError> {
        if descriptor.capacity == 0 {
            return Err(GraphicsError::InvariantViolation(
                "buffer capacity cannot be zero".to_string(),
            ));
        }
        if descriptor.element_stride == 0 {
            return Err(GraphicsError::InvalidArgument(
                "element stride cannot be zero".to_string(),
            ));
        }
        if descriptor.size() > self.parameters.max_buffer_size {
            return Err(GraphicsError::out_of_range(
                "buffer size",
                0,
                descriptor.size() as usize,
                self.parameters.max_buffer_size as usize,
            ));
        }

        let raw = self.backend.create_buffer(descriptor)?;
        log::trace!(
            "BufferFactory: created {} buffer {:?}, {} x {} bytes",
            descriptor.kind.name(),
            descriptor.label,
            descriptor.capacity,
            descriptor.element_stride
        );
        Ok(raw)
    }

    /// Number of live buffers created by this factory.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .read()
            .iter()
            .filter(|b| b.strong_count() > 0)
            .count()
    }

    /// Sum of the hardware sizes of all live buffers, in bytes.
    pub fn total_allocated_bytes(&self) -> u64 {
        self.buffers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|b| b.read().size_in_bytes())
            .sum()
    }

    /// Forget dropped buffers. Creating a buffer also does this.
    pub fn cleanup_dead_buffers(&self) {
        self.buffers.write().retain(|b| b.strong_count() > 0);
    }
}

impl std::fmt::Debug for BufferFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFactory")
            .field("backend", &self.backend.name())
            .field("parameters", &self.parameters)
            .field("buffer_count", &self.buffer_count())
            .finish()
    }
}

// Ensure BufferFactory is Send + Sync
static_assertions::assert_impl_all!(BufferFactory: Send, Sync);
