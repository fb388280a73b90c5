//! Index formats and primitive topologies.

/// Primitive topology describing how vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Each vertex is a separate point.
    PointList,
    /// Every two vertices form a line.
    LineList,
    /// Vertices form a connected strip of lines.
    LineStrip,
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Vertices form a connected strip of triangles.
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Number of primitives produced by `count` vertices or indices.
    pub fn primitive_count(&self, count: u32) -> u32 {
        match self {
            Self::PointList => count,
            Self::LineList => count / 2,
            Self::LineStrip => count.saturating_sub(1),
            Self::TriangleList => count / 3,
            Self::TriangleStrip => count.saturating_sub(2),
        }
    }
}

/// Index format for indexed drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// 16-bit unsigned integers (max 65535 vertices).
    #[default]
    Uint16,
    /// 32-bit unsigned integers.
    Uint32,
}

impl IndexFormat {
    /// Get the size in bytes of each index.
    pub fn size(&self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// How a vertex stream advances: per-vertex or per-instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Stream advances once per vertex (default).
    #[default]
    Vertex,
    /// Stream advances once every `n` instances.
    Instance(u32),
}

impl VertexStepMode {
    /// Step mode for an instance frequency; `0` means per vertex.
    pub fn from_frequency(frequency: u32) -> Self {
        match frequency {
            0 => Self::Vertex,
            n => Self::Instance(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_count() {
        assert_eq!(PrimitiveTopology::TriangleList.primitive_count(36), 12);
        assert_eq!(PrimitiveTopology::TriangleStrip.primitive_count(1), 0);
        assert_eq!(PrimitiveTopology::LineStrip.primitive_count(5), 4);
        assert_eq!(PrimitiveTopology::PointList.primitive_count(7), 7);
    }

    #[test]
    fn test_index_size() {
        assert_eq!(IndexFormat::Uint16.size(), 2);
        assert_eq!(IndexFormat::Uint32.size(), 4);
    }

    #[test]
    fn test_step_mode_from_frequency() {
        assert_eq!(VertexStepMode::from_frequency(0), VertexStepMode::Vertex);
        assert_eq!(VertexStepMode::from_frequency(2), VertexStepMode::Instance(2));
    }
}
