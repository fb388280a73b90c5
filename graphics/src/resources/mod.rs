//! Buffer resources.
//!
//! This module contains the buffer types created by [`BufferFactory`]:
//! - [`BufferHandle`] - one hardware buffer with typed, growable element access
//! - [`SharedBuffer`] - the `Arc<RwLock<_>>` form handles are handed out in
//! - [`BufferListener`] - observer notified when a handle swaps its hardware buffer
//!
//! Handles are reference-counted and can be shared across threads. Each handle
//! holds a reference back to the factory that created it, which it uses to
//! reallocate itself.

mod buffer;
mod factory;

pub use buffer::{BufferHandle, BufferId, BufferListener, SharedBuffer};
pub use factory::{BufferFactory, FactoryParameters};
