//! Meshes and the draw data derived from them.
//!
//! This module provides:
//!
//! - [`Mesh`] - named submeshes stored in private or shared buffers
//! - [`SubMesh`] - one submesh with its [`AllocationState`] per buffer kind
//! - [`VertexStreamSet`] - vertex buffer bindings for a draw, refreshed on reallocation
//! - [`IndexRange`] - index buffer range for an indexed draw
//! - [`arena`] - offset bookkeeping for shared buffers
//!
//! # Shared Buffers
//!
//! Shared storage packs the geometry of many submeshes into one vertex buffer
//! and one index buffer per mesh, so drawing a whole mesh needs a single pair
//! of buffer bindings. Editing one submesh may move others; their draw data is
//! re-derived by the mesh after every change.

pub mod arena;
mod builder;
mod index_range;
mod streams;
mod submesh;

pub use arena::{AllocationRecord, FreeSpan};
pub use builder::{Mesh, MeshDescriptor};
pub use index_range::IndexRange;
pub use streams::{StreamBinding, VertexStream, VertexStreamSet};
pub use submesh::{AllocationState, StorageMode, SubMesh};
