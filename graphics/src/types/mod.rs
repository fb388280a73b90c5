//! Common types and descriptors for buffers and geometry.
//!
//! This module contains buffer kinds, usage classes and flags, write hints and
//! the descriptor used to create buffers.

mod buffer;
mod geometry;

pub use buffer::{BufferDescriptor, BufferKind, BufferUsage, SetDataOptions, UsageKind};
pub use geometry::{IndexFormat, PrimitiveTopology, VertexStepMode};
