//! # Meshpool Graphics
//!
//! Vertex and index buffer management for multi-submesh meshes.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`BufferFactory`] - Creates typed vertex/index buffers on a [`GpuBackend`]
//! - [`BufferHandle`] - One hardware buffer with growth, compaction and change notification
//! - [`VertexStreamSet`] / [`IndexRange`] - Draw-call-facing buffer bindings
//! - [`Mesh`] - Submeshes packed into shared buffers by an arena allocator
//! - A Dummy backend keeping buffers in host memory (for testing and tooling)
//!
//! ## Example
//!
//! ```ignore
//! use meshpool_graphics::{BufferFactory, FactoryParameters, Mesh, MeshDescriptor};
//!
//! let factory = BufferFactory::new(FactoryParameters::default());
//! let mut mesh = Mesh::new(factory, MeshDescriptor::for_vertex::<[f32; 3]>())?;
//! mesh.add_submesh_default("body", &positions, &indices)?;
//! for submesh in mesh.submeshes() {
//!     let streams = submesh.vertex_streams().streams();
//!     let range = submesh.index_range();
//!     // Bind streams and draw range...
//! }
//! ```

pub mod backend;
pub mod error;
pub mod mesh;
pub mod resources;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendError, BackendType, DummyBackend, GpuBackend, GpuBuffer};
pub use error::{ErrorKind, GraphicsError};
pub use mesh::{
    AllocationRecord, AllocationState, IndexRange, Mesh, MeshDescriptor, StorageMode, SubMesh,
    VertexStream, VertexStreamSet,
};
pub use resources::{
    BufferFactory, BufferHandle, BufferId, BufferListener, FactoryParameters, SharedBuffer,
};
pub use types::{
    BufferDescriptor, BufferKind, BufferUsage, IndexFormat, PrimitiveTopology, SetDataOptions,
    UsageKind, VertexStepMode,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// This should be called before using any graphics functionality.
pub fn init() {
    log::info!("Meshpool Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert!(backend.name() == "Dummy");
    }

    #[test]
    fn test_empty_mesh() {
        let factory = BufferFactory::new(FactoryParameters::default());
        let mesh = Mesh::new(factory, MeshDescriptor::new(16)).unwrap();
        assert_eq!(mesh.submesh_count(), 0);
        assert!(mesh.shared_vertex_buffer().is_none());
    }
}
