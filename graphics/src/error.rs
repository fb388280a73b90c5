//! Graphics error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Broad classification of a [`GraphicsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller supplied an invalid argument (unknown name, wrong element type, ...).
    Argument,
    /// An offset or length fell outside the valid bounds.
    Range,
    /// The operation would break a structural invariant of a buffer or arena.
    Invariant,
    /// The graphics backend failed.
    Backend,
}

/// Errors that can occur in the graphics system.
///
/// Every mutating operation validates its input before touching any buffer, so
/// an error never leaves a buffer or allocation record half-updated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// An invalid argument was provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A range check failed.
    #[error("{what} out of range: offset {offset}, length {length}, bound {bound}")]
    OutOfRange {
        /// What was being accessed.
        what: &'static str,
        /// Requested offset (in elements).
        offset: usize,
        /// Requested length (in elements).
        length: usize,
        /// The bound that was violated.
        bound: usize,
    },
    /// The operation would violate an invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The backend reported an error.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl GraphicsError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::Argument,
            Self::OutOfRange { .. } => ErrorKind::Range,
            Self::InvariantViolation(_) => ErrorKind::Invariant,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }

    pub(crate) fn out_of_range(
        what: &'static str,
        offset: usize,
        length: usize,
        bound: usize,
    ) -> Self {
        Self::OutOfRange {
            what,
            offset,
            length,
            bound,
        }
    }
}
