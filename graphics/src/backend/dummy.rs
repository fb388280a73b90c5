//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to any GPU. Buffers live in host memory, which
//! makes every write observable through [`GpuBackend::read_buffer`] and lets
//! tests verify buffer contents byte for byte.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::{BufferDescriptor, BufferUsage, SetDataOptions};

use super::{BackendError, GpuBackend, GpuBuffer};

/// Operation counters of a [`DummyBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DummyStats {
    /// Buffers created.
    pub buffers_created: u64,
    /// Write calls.
    pub writes: u64,
    /// Read calls.
    pub reads: u64,
    /// Total bytes written.
    pub bytes_written: u64,
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    max_allocation: Option<u64>,
    creation_limit: Option<u64>,
    buffers_created: AtomicU64,
    writes: AtomicU64,
    reads: AtomicU64,
    bytes_written: AtomicU64,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that fails any single allocation larger than `bytes`
    /// with [`BackendError::OutOfMemory`].
    pub fn with_max_allocation(bytes: u64) -> Self {
        Self {
            max_allocation: Some(bytes),
            ..Self::default()
        }
    }

    /// Create a backend that fails every buffer creation after the first
    /// `count` with [`BackendError::OutOfMemory`].
    pub fn with_creation_limit(count: u64) -> Self {
        Self {
            creation_limit: Some(count),
            ..Self::default()
        }
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> DummyStats {
        DummyStats {
            buffers_created: self.buffers_created.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    fn host_data(
        buffer: &GpuBuffer,
        required: BufferUsage,
    ) -> Result<&RwLock<Vec<u8>>, BackendError> {
        match buffer {
            GpuBuffer::Dummy { data, usage } if usage.contains(required) => Ok(data),
            GpuBuffer::Dummy { .. } => Err(BackendError::MissingUsage(required)),
            GpuBuffer::External { .. } => Err(BackendError::ForeignBuffer("dummy")),
        }
    }

    fn check_access(offset: u64, size: u64, buffer_size: u64) -> Result<(), BackendError> {
        match offset.checked_add(size) {
            Some(end) if end <= buffer_size => Ok(()),
            _ => Err(BackendError::InvalidAccess {
                offset,
                size,
                buffer_size,
            }),
        }
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, BackendError> {
        let size = descriptor.size();
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            size
        );

        if self.max_allocation.is_some_and(|max| size > max)
            || self
                .creation_limit
                .is_some_and(|limit| self.buffers_created.load(Ordering::Relaxed) >= limit)
        {
            return Err(BackendError::OutOfMemory);
        }
        let len = usize::try_from(size).map_err(|_| BackendError::OutOfMemory)?;

        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(GpuBuffer::Dummy {
            data: RwLock::new(vec![0; len]),
            usage: descriptor.usage(),
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
        options: SetDataOptions,
    ) -> Result<(), BackendError> {
        let host = Self::host_data(buffer, BufferUsage::COPY_DST)?;
        let mut bytes = host.write();
        Self::check_access(offset, data.len() as u64, bytes.len() as u64)?;

        log::trace!(
            "DummyBackend: writing {} bytes at {} ({:?})",
            data.len(),
            offset,
            options
        );

        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        dest: &mut [u8],
    ) -> Result<(), BackendError> {
        let host = Self::host_data(buffer, BufferUsage::COPY_SRC)?;
        let bytes = host.read();
        Self::check_access(offset, dest.len() as u64, bytes.len() as u64)?;

        let start = offset as usize;
        dest.copy_from_slice(&bytes[start..start + dest.len()]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
