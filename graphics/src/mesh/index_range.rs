//! Index range for indexed draws.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::resources::{BufferHandle, SharedBuffer};
use crate::types::{IndexFormat, PrimitiveTopology};

/// A `(buffer, start_index, index_count)` triple consumed by an indexed draw.
///
/// The buffer is referenced weakly. Unlike [`VertexStreamSet`](super::VertexStreamSet)
/// there is no derived state, so nothing needs refreshing when the buffer
/// reallocates; the current hardware buffer is read from the handle at draw time.
#[derive(Debug, Clone, Default)]
pub struct IndexRange {
    buffer: Option<Weak<RwLock<BufferHandle>>>,
    /// Index element format.
    pub format: IndexFormat,
    /// First index, in elements.
    pub start_index: u32,
    /// Number of indices to draw.
    pub index_count: u32,
}

impl IndexRange {
    /// Create a range over `buffer`.
    pub fn new(
        buffer: &SharedBuffer,
        format: IndexFormat,
        start_index: u32,
        index_count: u32,
    ) -> Self {
        Self {
            buffer: Some(Arc::downgrade(buffer)),
            format,
            start_index,
            index_count,
        }
    }

    /// The index buffer, if one is set and still alive.
    pub fn buffer(&self) -> Option<SharedBuffer> {
        self.buffer.as_ref().and_then(Weak::upgrade)
    }

    /// Replace the referenced buffer.
    pub fn set_buffer(&mut self, buffer: Option<&SharedBuffer>) {
        self.buffer = buffer.map(Arc::downgrade);
    }

    /// Whether the range draws anything from a live buffer.
    pub fn is_drawable(&self) -> bool {
        self.index_count > 0 && self.buffer().is_some()
    }

    /// Byte offset of the first index.
    pub fn byte_offset(&self) -> u64 {
        self.start_index as u64 * self.format.size() as u64
    }

    /// Number of primitives the range produces.
    pub fn primitive_count(&self, topology: PrimitiveTopology) -> u32 {
        topology.primitive_count(self.index_count)
    }
}
