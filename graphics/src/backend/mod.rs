//! GPU backend abstraction layer.
//!
//! The buffer code in this crate never talks to a graphics API directly. It
//! consumes the small capability set of [`GpuBackend`]: create a buffer of a
//! given size, write bytes into it and read bytes back. Hardware buffers are
//! opaque [`GpuBuffer`] values; growing or shrinking one is always expressed by
//! the caller as create-new, copy, swap.
//!
//! # Available Backends
//!
//! - `dummy` (default): host-memory backend for testing and tooling

pub mod dummy;
mod error;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{BufferDescriptor, BufferUsage, SetDataOptions};

pub use dummy::{DummyBackend, DummyStats};
pub use error::BackendError;

/// Handle to a hardware buffer.
pub enum GpuBuffer {
    /// Host-memory buffer owned by the [`DummyBackend`].
    Dummy {
        /// Buffer contents.
        data: RwLock<Vec<u8>>,
        /// Usage flags the buffer was created with.
        usage: BufferUsage,
    },
    /// Buffer owned by a backend outside this crate, identified by its own id.
    External {
        /// Backend-specific identifier.
        id: u64,
        /// Size in bytes.
        size: u64,
    },
}

impl GpuBuffer {
    /// Size of the hardware buffer in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { data, .. } => data.read().len() as u64,
            Self::External { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { data, usage } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("size", &data.read().len())
                .field("usage", usage)
                .finish(),
            Self::External { id, size } => f
                .debug_struct("GpuBuffer::External")
                .field("id", id)
                .field("size", size)
                .finish(),
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Offsets and sizes are in bytes. Implementations only need to honour the
/// exact ranges they are given; all bounds and growth logic lives in
/// [`BufferHandle`](crate::BufferHandle).
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a zero-initialised buffer of `descriptor.size()` bytes with
    /// `descriptor.usage()` flags.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, BackendError>;

    /// Write `data` at `offset`. Requires [`BufferUsage::COPY_DST`].
    ///
    /// `options` is passed through from the caller unchanged.
    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
        options: SetDataOptions,
    ) -> Result<(), BackendError>;

    /// Read `dest.len()` bytes starting at `offset`. Requires
    /// [`BufferUsage::COPY_SRC`].
    ///
    /// This is a blocking operation.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, dest: &mut [u8])
        -> Result<(), BackendError>;
}

/// Which backend [`create_backend`] should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Host-memory backend.
    #[default]
    Dummy,
}

/// Create a backend of the requested type.
pub fn create_backend(backend_type: BackendType) -> Arc<dyn GpuBackend> {
    match backend_type {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Arc::new(DummyBackend::new())
        }
    }
}
