//! Buffer types and descriptors.

use bitflags::bitflags;

/// What a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex data consumed through vertex streams.
    Vertex,
    /// Index data consumed by indexed draws.
    Index,
}

impl BufferKind {
    /// Both kinds, vertex first.
    pub const ALL: [BufferKind; 2] = [BufferKind::Vertex, BufferKind::Index];

    /// Short lowercase name used in labels and log messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Index => "index",
        }
    }
}

/// How a buffer is expected to be updated.
///
/// Write-only usages tell the backend that the CPU never needs prior contents
/// back; reads still work against the backend's shadow data where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UsageKind {
    /// Written rarely, read by the GPU many times.
    #[default]
    Static,
    /// Static, and the CPU never reads it back.
    StaticWriteOnly,
    /// Rewritten frequently.
    Dynamic,
    /// Dynamic, and the CPU never reads it back.
    DynamicWriteOnly,
}

impl UsageKind {
    /// Whether this is one of the dynamic usages.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic | Self::DynamicWriteOnly)
    }

    /// Whether this is one of the write-only usages.
    pub fn is_write_only(&self) -> bool {
        matches!(self, Self::StaticWriteOnly | Self::DynamicWriteOnly)
    }
}

bitflags! {
    /// Usage flags for buffers, as handed to the backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 2;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 3;
        /// Buffer is mappable for CPU reads.
        const MAP_READ = 1 << 4;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferUsage {
    /// Derive backend usage flags from a buffer kind and usage class.
    pub fn from_kind(kind: BufferKind, usage_kind: UsageKind) -> Self {
        let mut usage = match kind {
            BufferKind::Vertex => Self::VERTEX,
            BufferKind::Index => Self::INDEX,
        } | Self::COPY_DST
            | Self::COPY_SRC;
        if !usage_kind.is_write_only() {
            usage |= Self::MAP_READ;
        }
        usage
    }
}

/// Hint passed through unchanged to the backend on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SetDataOptions {
    /// No hint; the backend must preserve contents in flight.
    #[default]
    None,
    /// Prior contents of the whole buffer may be discarded.
    Discard,
    /// The write does not overlap data the GPU may still be reading.
    NoOverwrite,
}

/// Descriptor for creating a buffer.
///
/// Sizes are expressed in elements; [`size`](Self::size) gives bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Vertex or index data.
    pub kind: BufferKind,
    /// Update frequency class.
    pub usage_kind: UsageKind,
    /// Byte size of one element.
    pub element_stride: u32,
    /// Number of elements.
    pub capacity: usize,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(kind: BufferKind, element_stride: u32, capacity: usize) -> Self {
        Self {
            label: None,
            kind,
            usage_kind: UsageKind::default(),
            element_stride,
            capacity,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the usage class.
    pub fn with_usage_kind(mut self, usage_kind: UsageKind) -> Self {
        self.usage_kind = usage_kind;
        self
    }

    /// Set the capacity in elements.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.capacity as u64 * self.element_stride as u64
    }

    /// Backend usage flags for this descriptor.
    pub fn usage(&self) -> BufferUsage {
        BufferUsage::from_kind(self.kind, self.usage_kind)
    }
}
