//! Vertex stream bindings.
//!
//! A [`VertexStreamSet`] is the ordered list of vertex buffers a draw call
//! binds. Slot `n` of the set is vertex stream `n` of the draw.
//!
//! The set subscribes to every buffer it binds. When a bound [`BufferHandle`]
//! swaps its hardware buffer (growth, compaction, resize) the set picks up the
//! new [`GpuBuffer`] through [`BufferListener`], so the derived
//! [`VertexStream`]s are always current without the caller re-binding.
//!
//! # Lock order
//!
//! A handle notifies its listeners while it is write-locked, and the listener
//! locks the stream table. The set therefore never locks a handle while holding
//! its own table lock.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::backend::GpuBuffer;
use crate::error::GraphicsError;
use crate::resources::{BufferHandle, BufferId, BufferListener, SharedBuffer};
use crate::types::{BufferKind, VertexStepMode};

/// One slot of a [`VertexStreamSet`] as configured by the caller.
#[derive(Clone)]
pub struct StreamBinding {
    buffer: Weak<RwLock<BufferHandle>>,
    buffer_id: BufferId,
    stride: u32,
    vertex_offset: u32,
    frequency: u32,
    raw: Option<Arc<GpuBuffer>>,
}

impl StreamBinding {
    /// The bound buffer, if it is still alive.
    pub fn buffer(&self) -> Option<SharedBuffer> {
        self.buffer.upgrade()
    }

    /// Id of the bound buffer.
    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }

    /// Byte stride of one vertex.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// First vertex of the stream, in elements.
    pub fn vertex_offset(&self) -> u32 {
        self.vertex_offset
    }

    /// Instance frequency; `0` means per vertex.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Whether the bound buffer is still alive.
    pub fn is_live(&self) -> bool {
        self.raw.is_some()
    }
}

impl std::fmt::Debug for StreamBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBinding")
            .field("buffer_id", &self.buffer_id)
            .field("stride", &self.stride)
            .field("vertex_offset", &self.vertex_offset)
            .field("frequency", &self.frequency)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Draw-call-facing vertex stream derived from a [`StreamBinding`].
#[derive(Debug, Clone)]
pub struct VertexStream {
    /// Stream slot.
    pub slot: usize,
    /// Id of the owning handle.
    pub buffer_id: BufferId,
    /// Current hardware buffer.
    pub buffer: Arc<GpuBuffer>,
    /// Byte stride of one vertex.
    pub stride: u32,
    /// First vertex of the stream, in elements.
    pub vertex_offset: u32,
    /// Instance frequency; `0` means per vertex.
    pub frequency: u32,
}

impl VertexStream {
    /// How the stream advances.
    pub fn step_mode(&self) -> VertexStepMode {
        VertexStepMode::from_frequency(self.frequency)
    }

    /// Byte offset of the first vertex in the hardware buffer.
    pub fn byte_offset(&self) -> u64 {
        self.vertex_offset as u64 * self.stride as u64
    }
}

#[derive(Default)]
struct StreamTable {
    bindings: Vec<StreamBinding>,
    vertex_count: u32,
}

impl BufferListener for Mutex<StreamTable> {
    fn buffer_reallocated(&self, id: BufferId, buffer: &Arc<GpuBuffer>) {
        let mut table = self.lock();
        for binding in table.bindings.iter_mut().filter(|b| b.buffer_id == id) {
            binding.raw = Some(Arc::clone(buffer));
        }
        log::trace!("VertexStreamSet: refreshed bindings of buffer {}", id);
    }

    fn buffer_disposed(&self, id: BufferId) {
        let mut table = self.lock();
        for binding in table.bindings.iter_mut().filter(|b| b.buffer_id == id) {
            binding.raw = None;
        }
        log::trace!("VertexStreamSet: buffer {} disposed", id);
    }
}

/// Ordered list of vertex buffer bindings for one draw.
///
/// Bindings hold their buffers weakly; ownership stays with whoever created
/// them (a [`Mesh`](super::Mesh) or the caller).
pub struct VertexStreamSet {
    table: Arc<Mutex<StreamTable>>,
}

impl VertexStreamSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(StreamTable::default())),
        }
    }

    /// Bind `buffer` to stream slot `index`.
    ///
    /// `index == len()` appends a slot, a smaller index replaces that slot.
    ///
    /// # Errors
    ///
    /// Returns a range error for `index > len()` and an argument error if
    /// `buffer` is not a vertex buffer.
    pub fn set_binding(
        &mut self,
        buffer: &SharedBuffer,
        vertex_offset: u32,
        frequency: u32,
        index: usize,
    ) -> Result<(), GraphicsError> {
        let len = self.len();
        if index > len {
            return Err(GraphicsError::out_of_range("stream slot", index, 1, len));
        }

        let binding = {
            let mut handle = buffer.write();
            if handle.kind() != BufferKind::Vertex {
                return Err(GraphicsError::InvalidArgument(format!(
                    "buffer {} is not a vertex buffer",
                    handle.id()
                )));
            }
            handle.subscribe(self.listener());
            StreamBinding {
                buffer: Arc::downgrade(buffer),
                buffer_id: handle.id(),
                stride: handle.element_stride(),
                vertex_offset,
                frequency,
                raw: Some(Arc::clone(handle.raw())),
            }
        };

        let replaced = {
            let mut table = self.table.lock();
            if index == table.bindings.len() {
                table.bindings.push(binding);
                None
            } else {
                Some(std::mem::replace(&mut table.bindings[index], binding))
            }
        };
        if let Some(old) = replaced {
            self.release(&old);
        }
        Ok(())
    }

    /// Remove stream slot `index`; later slots move down by one.
    pub fn unset_binding(&mut self, index: usize) -> Result<(), GraphicsError> {
        let removed = {
            let mut table = self.table.lock();
            let len = table.bindings.len();
            if index >= len {
                return Err(GraphicsError::out_of_range("stream slot", index, 1, len));
            }
            table.bindings.remove(index)
        };
        self.release(&removed);
        Ok(())
    }

    /// Remove every slot.
    pub fn clear(&mut self) {
        let removed = std::mem::take(&mut self.table.lock().bindings);
        for binding in &removed {
            self.release(binding);
        }
    }

    /// Configured binding of slot `index`.
    pub fn binding(&self, index: usize) -> Option<StreamBinding> {
        self.table.lock().bindings.get(index).cloned()
    }

    /// The draw-call-facing streams, in slot order. Slots whose buffer has
    /// been disposed are left out.
    pub fn streams(&self) -> Vec<VertexStream> {
        self.table
            .lock()
            .bindings
            .iter()
            .enumerate()
            .filter_map(|(slot, binding)| {
                binding.raw.as_ref().map(|raw| VertexStream {
                    slot,
                    buffer_id: binding.buffer_id,
                    buffer: Arc::clone(raw),
                    stride: binding.stride,
                    vertex_offset: binding.vertex_offset,
                    frequency: binding.frequency,
                })
            })
            .collect()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.table.lock().bindings.len()
    }

    /// Whether no slot is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot refers to a live buffer.
    pub fn is_valid(&self) -> bool {
        self.table.lock().bindings.iter().all(StreamBinding::is_live)
    }

    /// Number of vertices to draw.
    pub fn vertex_count(&self) -> u32 {
        self.table.lock().vertex_count
    }

    /// Set the number of vertices to draw.
    pub fn set_vertex_count(&mut self, count: u32) {
        self.table.lock().vertex_count = count;
    }

    fn listener(&self) -> Weak<dyn BufferListener> {
        let table: Arc<dyn BufferListener> = self.table.clone();
        Arc::downgrade(&table)
    }

    // Unsubscribe from a buffer no remaining slot refers to.
    fn release(&self, old: &StreamBinding) {
        let still_bound = self
            .table
            .lock()
            .bindings
            .iter()
            .any(|b| b.buffer_id == old.buffer_id);
        if still_bound {
            return;
        }
        if let Some(buffer) = old.buffer.upgrade() {
            buffer.write().unsubscribe(&self.listener());
        }
    }
}

impl Default for VertexStreamSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VertexStreamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("VertexStreamSet")
            .field("bindings", &table.bindings)
            .field("vertex_count", &table.vertex_count)
            .finish()
    }
}

static_assertions::assert_impl_all!(VertexStreamSet: Send, Sync);
