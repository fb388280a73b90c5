//! CPU-side handle owning exactly one hardware buffer.
//!
//! A [`BufferHandle`] tracks the capacity and element stride of its hardware
//! buffer and offers typed element access on top of the byte-oriented
//! [`GpuBackend`](crate::backend::GpuBackend). Whenever an operation needs a
//! different size, the handle reallocates:
//!
//! 1. read out the existing elements,
//! 2. create a new hardware buffer of the new capacity,
//! 3. write the preserved elements (and any new data) into it,
//! 4. swap it in and notify listeners.
//!
//! The old buffer is only released after step 3 succeeded, so a failing
//! operation always leaves the handle exactly as it was.
//!
//! # Example
//!
//! ```ignore
//! let factory = BufferFactory::new(FactoryParameters::default());
//! let buffer = factory.create_with_data(BufferKind::Vertex, UsageKind::Static, &vertices)?;
//! buffer.write().add_data(&more_vertices)?;
//! let all: Vec<Vertex> = buffer.read().read_all()?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use parking_lot::RwLock;

use crate::backend::GpuBuffer;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferKind, SetDataOptions, UsageKind};

use super::BufferFactory;

/// A buffer handle shared between its owner and non-owning observers.
pub type SharedBuffer = Arc<RwLock<BufferHandle>>;

/// Process-unique identifier of a [`BufferHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observer of hardware buffer changes.
///
/// Listeners are held weakly; a dropped listener is pruned on the next
/// notification.
pub trait BufferListener: Send + Sync {
    /// The handle swapped in a new hardware buffer.
    fn buffer_reallocated(&self, id: BufferId, buffer: &Arc<GpuBuffer>);

    /// The handle was dropped.
    fn buffer_disposed(&self, _id: BufferId) {}
}

/// Owns one hardware buffer and its element bookkeeping.
pub struct BufferHandle {
    id: BufferId,
    factory: Arc<BufferFactory>,
    descriptor: BufferDescriptor,
    element_count: usize,
    raw: Arc<GpuBuffer>,
    generation: u64,
    listeners: Vec<Weak<dyn BufferListener>>,
}

impl BufferHandle {
    /// Create a new handle (called by BufferFactory).
    pub(crate) fn new(
        factory: Arc<BufferFactory>,
        descriptor: BufferDescriptor,
    ) -> Result<Self, GraphicsError> {
        let raw = factory.allocate_raw(&descriptor)?;
        Ok(Self {
            id: BufferId::next(),
            factory,
            descriptor,
            element_count: 0,
            raw: Arc::new(raw),
            generation: 0,
            listeners: Vec::new(),
        })
    }

    /// Unique id of this handle.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Vertex or index buffer.
    pub fn kind(&self) -> BufferKind {
        self.descriptor.kind
    }

    /// Usage class the buffer was created with.
    pub fn usage_kind(&self) -> UsageKind {
        self.descriptor.usage_kind
    }

    /// Byte size of one element.
    pub fn element_stride(&self) -> u32 {
        self.descriptor.element_stride
    }

    /// Number of elements the hardware buffer can hold. Never zero.
    pub fn capacity(&self) -> usize {
        self.descriptor.capacity
    }

    /// Number of elements holding defined data, counted from the start.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Size of the hardware buffer in bytes.
    pub fn size_in_bytes(&self) -> u64 {
        self.descriptor.size()
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// The current hardware buffer.
    pub fn raw(&self) -> &Arc<GpuBuffer> {
        &self.raw
    }

    /// Number of reallocations so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copy `count` elements starting at `buffer_offset` into
    /// `dest[start_index..start_index + count]`.
    pub fn get_data<T: Pod>(
        &self,
        buffer_offset: usize,
        dest: &mut [T],
        start_index: usize,
        count: usize,
    ) -> Result<(), GraphicsError> {
        self.check_element_type::<T>()?;
        check_slice_range("destination", start_index, count, dest.len())?;
        if count == 0 {
            return Ok(());
        }
        if buffer_offset
            .checked_add(count)
            .map_or(true, |end| end > self.capacity())
        {
            return Err(GraphicsError::out_of_range(
                "read",
                buffer_offset,
                count,
                self.capacity(),
            ));
        }

        let target: &mut [u8] =
            bytemuck::cast_slice_mut(&mut dest[start_index..start_index + count]);
        self.factory
            .backend()
            .read_buffer(&self.raw, self.byte_offset(buffer_offset), target)?;
        Ok(())
    }

    /// Write `source[start_index..start_index + count]` at `buffer_offset`.
    ///
    /// If the write does not fit, the buffer grows to
    /// `capacity + (count - (capacity - buffer_offset))` elements first; all
    /// existing elements keep their values.
    pub fn set_data<T: Pod>(
        &mut self,
        buffer_offset: usize,
        source: &[T],
        start_index: usize,
        count: usize,
        options: SetDataOptions,
    ) -> Result<(), GraphicsError> {
        self.check_element_type::<T>()?;
        check_slice_range("source", start_index, count, source.len())?;
        let bytes: &[u8] = bytemuck::cast_slice(&source[start_index..start_index + count]);
        self.write_bytes(buffer_offset, bytes, options)
    }

    /// Append `source` after the last defined element. Returns the offset the
    /// data was written at.
    pub fn add_data<T: Pod>(&mut self, source: &[T]) -> Result<usize, GraphicsError> {
        let offset = self.element_count;
        self.set_data(offset, source, 0, source.len(), SetDataOptions::None)?;
        Ok(offset)
    }

    /// Read every defined element.
    pub fn read_all<T: Pod>(&self) -> Result<Vec<T>, GraphicsError> {
        let mut out = vec![T::zeroed(); self.element_count];
        self.get_data(0, &mut out, 0, self.element_count)?;
        Ok(out)
    }

    /// Remove `length` elements at `offset`.
    ///
    /// With `reset_only` the range is overwritten with zeroed elements and the
    /// size stays the same. Otherwise everything after the range moves left to
    /// close the gap and the buffer shrinks by `length`.
    ///
    /// `length == 0` is a no-op. A range reaching the last defined element is
    /// rejected, as is any removal that would leave the buffer empty.
    pub fn remove_data(
        &mut self,
        offset: usize,
        length: usize,
        reset_only: bool,
    ) -> Result<(), GraphicsError> {
        if length == 0 {
            return Ok(());
        }

        let count = self.element_count;
        if length > count || offset >= count {
            return Err(GraphicsError::out_of_range("remove", offset, length, count));
        }
        if count - length == 0 {
            return Err(GraphicsError::InvariantViolation(format!(
                "removing {length} elements would leave buffer {} empty",
                self.id
            )));
        }
        if offset + length >= count {
            return Err(GraphicsError::out_of_range("remove", offset, length, count));
        }

        if reset_only {
            return self.clear_range(offset, length);
        }

        let stride = self.element_stride() as usize;
        let mut contents = self.read_bytes(0, count)?;
        contents.drain(offset * stride..(offset + length) * stride);

        let new_capacity = self.capacity() - length;
        log::debug!(
            "BufferHandle {}: compacting {} elements at {}, capacity {} -> {}",
            self.id,
            length,
            offset,
            self.capacity(),
            new_capacity
        );
        self.reallocate(new_capacity, &contents, None)?;
        self.element_count = count - length;
        Ok(())
    }

    /// Overwrite `[offset, offset + length)` with zeroed elements.
    ///
    /// Unlike [`remove_data`](Self::remove_data) this accepts ranges that end
    /// at the last defined element.
    pub fn clear_range(&mut self, offset: usize, length: usize) -> Result<(), GraphicsError> {
        if length == 0 {
            return Ok(());
        }
        if offset
            .checked_add(length)
            .map_or(true, |end| end > self.element_count)
        {
            return Err(GraphicsError::out_of_range(
                "clear",
                offset,
                length,
                self.element_count,
            ));
        }

        let zeros = vec![0u8; length * self.element_stride() as usize];
        self.factory.backend().write_buffer(
            &self.raw,
            self.byte_offset(offset),
            &zeros,
            SetDataOptions::None,
        )?;
        Ok(())
    }

    /// Reallocate to exactly `new_capacity` elements, keeping as many leading
    /// elements as fit.
    pub fn resize(&mut self, new_capacity: usize) -> Result<(), GraphicsError> {
        if new_capacity == 0 {
            return Err(GraphicsError::InvariantViolation(format!(
                "buffer {} cannot be resized to zero elements",
                self.id
            )));
        }
        if new_capacity == self.capacity() {
            return Ok(());
        }

        let keep = self.element_count.min(new_capacity);
        let contents = self.read_bytes(0, keep)?;
        log::debug!(
            "BufferHandle {}: resizing {} -> {}",
            self.id,
            self.capacity(),
            new_capacity
        );
        self.reallocate(new_capacity, &contents, None)?;
        self.element_count = keep;
        Ok(())
    }

    /// Swap in a buffer of `new_capacity` elements holding exactly `contents`.
    ///
    /// One reallocation, so on error the handle is left as it was.
    pub(crate) fn rebuild(
        &mut self,
        new_capacity: usize,
        contents: &[u8],
    ) -> Result<(), GraphicsError> {
        let stride = self.element_stride() as usize;
        debug_assert_eq!(contents.len() % stride, 0);
        let count = contents.len() / stride;
        if new_capacity == 0 || count > new_capacity {
            return Err(GraphicsError::InvariantViolation(format!(
                "buffer {} cannot hold {} elements in {} slots",
                self.id, count, new_capacity
            )));
        }

        log::debug!(
            "BufferHandle {}: rebuilding {} -> {} with {} elements",
            self.id,
            self.capacity(),
            new_capacity,
            count
        );
        self.reallocate(new_capacity, contents, None)?;
        self.element_count = count;
        Ok(())
    }

    /// Register a listener for reallocation and disposal events.
    pub fn subscribe(&mut self, listener: Weak<dyn BufferListener>) {
        self.listeners.retain(|l| l.strong_count() > 0);
        if !self.listeners.iter().any(|l| Weak::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    /// Remove a previously registered listener.
    pub fn unsubscribe(&mut self, listener: &Weak<dyn BufferListener>) {
        self.listeners
            .retain(|l| l.strong_count() > 0 && !Weak::ptr_eq(l, listener));
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.strong_count() > 0).count()
    }

    /// Write raw element bytes at `buffer_offset`, growing if needed.
    pub(crate) fn write_bytes(
        &mut self,
        buffer_offset: usize,
        bytes: &[u8],
        options: SetDataOptions,
    ) -> Result<(), GraphicsError> {
        let stride = self.element_stride() as usize;
        debug_assert_eq!(bytes.len() % stride, 0);
        let count = bytes.len() / stride;
        if count == 0 {
            return Ok(());
        }
        if buffer_offset > self.capacity() {
            return Err(GraphicsError::out_of_range(
                "write",
                buffer_offset,
                count,
                self.capacity(),
            ));
        }

        let available = self.capacity() - buffer_offset;
        if available < count {
            let new_capacity = self.capacity() + (count - available);
            let contents = self.read_bytes(0, self.element_count)?;
            log::debug!(
                "BufferHandle {}: growing {} -> {} for {} elements at {}",
                self.id,
                self.capacity(),
                new_capacity,
                count,
                buffer_offset
            );
            self.reallocate(new_capacity, &contents, Some((buffer_offset, bytes, options)))?;
        } else {
            log::trace!(
                "BufferHandle {}: writing {} elements at {}",
                self.id,
                count,
                buffer_offset
            );
            self.factory.backend().write_buffer(
                &self.raw,
                self.byte_offset(buffer_offset),
                bytes,
                options,
            )?;
        }

        self.element_count = self.element_count.max(buffer_offset + count);
        Ok(())
    }

    /// Read `count` elements at `offset` as raw bytes.
    pub(crate) fn read_bytes(&self, offset: usize, count: usize) -> Result<Vec<u8>, GraphicsError> {
        let mut bytes = vec![0u8; count * self.element_stride() as usize];
        if !bytes.is_empty() {
            self.factory
                .backend()
                .read_buffer(&self.raw, self.byte_offset(offset), &mut bytes)?;
        }
        Ok(bytes)
    }

    /// Create a buffer of `new_capacity`, fill it with `contents` (at element 0)
    /// and an optional extra write, then swap it in.
    fn reallocate(
        &mut self,
        new_capacity: usize,
        contents: &[u8],
        extra: Option<(usize, &[u8], SetDataOptions)>,
    ) -> Result<(), GraphicsError> {
        let descriptor = self.descriptor.clone().with_capacity(new_capacity);
        let backend = self.factory.backend();
        let raw = self.factory.allocate_raw(&descriptor)?;

        if !contents.is_empty() {
            backend.write_buffer(&raw, 0, contents, SetDataOptions::Discard)?;
        }
        if let Some((offset, bytes, options)) = extra {
            backend.write_buffer(&raw, self.byte_offset(offset), bytes, options)?;
        }

        self.raw = Arc::new(raw);
        self.descriptor = descriptor;
        self.generation += 1;
        self.notify_reallocated();
        Ok(())
    }

    fn notify_reallocated(&mut self) {
        let raw = Arc::clone(&self.raw);
        let id = self.id;
        self.listeners.retain(|listener| match listener.upgrade() {
            Some(listener) => {
                listener.buffer_reallocated(id, &raw);
                true
            }
            None => false,
        });
    }

    fn check_element_type<T: Pod>(&self) -> Result<(), GraphicsError> {
        let size = std::mem::size_of::<T>();
        if size != self.element_stride() as usize {
            return Err(GraphicsError::InvalidArgument(format!(
                "element type of {size} bytes does not match stride {} of buffer {}",
                self.element_stride(),
                self.id
            )));
        }
        Ok(())
    }

    fn byte_offset(&self, element: usize) -> u64 {
        element as u64 * self.element_stride() as u64
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        log::trace!("BufferHandle {}: disposed", self.id);
        for listener in self.listeners.drain(..) {
            if let Some(listener) = listener.upgrade() {
                listener.buffer_disposed(self.id);
            }
        }
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("kind", &self.descriptor.kind)
            .field("capacity", &self.descriptor.capacity)
            .field("element_count", &self.element_count)
            .field("stride", &self.descriptor.element_stride)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

fn check_slice_range(
    what: &'static str,
    start: usize,
    count: usize,
    len: usize,
) -> Result<(), GraphicsError> {
    match start.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(GraphicsError::out_of_range(what, start, count, len)),
    }
}

// Ensure BufferHandle is Send + Sync
static_assertions::assert_impl_all!(BufferHandle: Send, Sync);
