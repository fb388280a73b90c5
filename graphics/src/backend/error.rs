//! Backend error types.

use crate::types::BufferUsage;

/// Errors that can occur in backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The device was lost.
    DeviceLost,
    /// A read or write touched bytes outside the hardware buffer.
    InvalidAccess {
        /// First byte accessed.
        offset: u64,
        /// Number of bytes accessed.
        size: u64,
        /// Size of the hardware buffer in bytes.
        buffer_size: u64,
    },
    /// The buffer lacks a usage flag the operation needs.
    MissingUsage(BufferUsage),
    /// The buffer was created by a different backend.
    ForeignBuffer(&'static str),
    /// Internal backend error.
    Internal(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidAccess {
                offset,
                size,
                buffer_size,
            } => write!(
                f,
                "buffer access of {size} bytes at {offset} exceeds buffer size {buffer_size}"
            ),
            Self::MissingUsage(usage) => write!(f, "buffer was not created with {usage:?} usage"),
            Self::ForeignBuffer(backend) => {
                write!(f, "buffer was not created by the {backend} backend")
            }
            Self::Internal(msg) => write!(f, "internal backend error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}
