//! Common utilities for buffer and mesh integration tests.
//!
//! This module provides shared test infrastructure: logging setup, a context
//! owning a factory on an inspectable Dummy backend, and geometry generators.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use meshpool_graphics::{
    AllocationRecord, BufferFactory, BufferKind, DummyBackend, FactoryParameters, IndexFormat,
    Mesh, MeshDescriptor, SetDataOptions, StorageMode,
};

/// Interleaved position + texcoord vertex (20 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context owning a factory and its backend.
pub struct TestContext {
    /// Backend, kept to inspect operation counters.
    #[allow(dead_code)]
    pub backend: Arc<DummyBackend>,
    /// Factory all buffers are created with.
    pub factory: Arc<BufferFactory>,
}

impl TestContext {
    /// Create a context on an unlimited Dummy backend.
    pub fn new() -> Self {
        Self::with_backend(DummyBackend::new())
    }

    /// Create a context on the given backend.
    #[allow(dead_code)]
    pub fn with_backend(backend: DummyBackend) -> Self {
        init_logging();
        let backend = Arc::new(backend);
        let factory = BufferFactory::with_backend(
            backend.clone(),
            FactoryParameters::new().with_label_prefix("test"),
        );
        Self { backend, factory }
    }

    /// Create a mesh of [`Vertex`] with 16-bit indices.
    #[allow(dead_code)]
    pub fn mesh(&self, storage: StorageMode) -> Mesh {
        self.mesh_with(storage, SetDataOptions::None)
    }

    /// Create a mesh of [`Vertex`] with 16-bit indices and the given write hint.
    #[allow(dead_code)]
    pub fn mesh_with(&self, storage: StorageMode, options: SetDataOptions) -> Mesh {
        let descriptor = MeshDescriptor::for_vertex::<Vertex>()
            .with_label("mesh")
            .with_index_format(IndexFormat::Uint16)
            .with_default_storage(storage)
            .with_write_options(options);
        Mesh::new(self.factory.clone(), descriptor).expect("Failed to create mesh")
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// `count` distinct vertices; vertex `i` has `position.x == start + i`.
pub fn vertices(start: usize, count: usize) -> Vec<Vertex> {
    (start..start + count)
        .map(|i| Vertex {
            position: [i as f32, (i % 7) as f32, 1.0],
            uv: [0.5, (i % 3) as f32],
        })
        .collect()
}

/// Triangle list indices for a strip of `quads` quads.
#[allow(dead_code)]
pub fn quad_indices(quads: u16) -> Vec<u16> {
    (0..quads)
        .flat_map(|q| {
            let base = q * 4;
            [base, base + 1, base + 2, base + 2, base + 1, base + 3]
        })
        .collect()
}

/// Shared record of a submesh, panicking if it is not shared.
#[allow(dead_code)]
pub fn shared_record(mesh: &Mesh, kind: BufferKind, name: &str) -> AllocationRecord {
    mesh.allocation(kind, name)
        .and_then(|state| state.record())
        .unwrap_or_else(|| panic!("submesh '{name}' has no shared {} record", kind.name()))
}

/// Assert shared records of one kind are disjoint and fit their buffer.
#[allow(dead_code)]
pub fn assert_arena_consistent(mesh: &Mesh, kind: BufferKind) {
    let records: Vec<AllocationRecord> = mesh
        .submeshes()
        .iter()
        .filter_map(|s| s.allocation(kind).record())
        .collect();
    let buffer = match kind {
        BufferKind::Vertex => mesh.shared_vertex_buffer(),
        BufferKind::Index => mesh.shared_index_buffer(),
    };
    match buffer {
        Some(buffer) => {
            let capacity = buffer.read().capacity();
            meshpool_graphics::mesh::arena::validate_records(&records, capacity)
                .expect("arena records are inconsistent");
        }
        None => assert!(records.is_empty(), "records without a shared buffer"),
    }
}
