//! Error types for the heap core.
//!
//! Registry CAS races are never reported here: they are retried internally.
//! Everything below propagates to the immediate caller and is not retried.

use thiserror::Error;

use crate::TypeTag;

/// Kind of a registry node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Payload-free epoch edge
    Boundary,
    /// Node owning a reference to one heap object
    Data,
}

/// Fieldless classification of a [`HeapError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Use of an empty (moved-from) handle
    InvalidHandle,
    /// Payload access on a boundary node
    WrongNodeKind,
    /// Storage limit reached
    AllocationExhausted,
    /// Refcount decremented below zero
    RefcountUnderflow,
    /// Variant-specific operation on the wrong variant
    WrongType,
}

/// An error raised by the heap core.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, HeapError};
///
/// let error = HeapError::AllocationExhausted { limit: 16 };
/// assert_eq!(error.kind(), ErrorKind::AllocationExhausted);
/// assert_eq!(error.to_string(), "heap exhausted: object limit of 16 reached");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// Using an empty handle, or a handle from another heap
    #[error("invalid handle: empty or owned by another heap")]
    InvalidHandle,
    /// Reading the payload of a boundary registry node
    #[error("expected a {expected:?} node, found a {found:?} node")]
    WrongNodeKind {
        /// Kind the caller asked for
        expected: NodeKind,
        /// Kind of the node actually reached
        found: NodeKind,
    },
    /// The heap cannot satisfy a new object request
    #[error("heap exhausted: object limit of {limit} reached")]
    AllocationExhausted {
        /// Configured object limit
        limit: usize,
    },
    /// A refcount was decremented below zero
    #[error("refcount underflow on {tag} object")]
    RefcountUnderflow {
        /// Tag of the object whose count underflowed
        tag: TypeTag,
    },
    /// A variant-specific operation reached a different variant
    #[error("expected {expected}, found {found}")]
    WrongType {
        /// Variant the operation works on
        expected: TypeTag,
        /// Variant of the object actually referenced
        found: TypeTag,
    },
}

impl HeapError {
    /// Returns the fieldless kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeapError::InvalidHandle => ErrorKind::InvalidHandle,
            HeapError::WrongNodeKind { .. } => ErrorKind::WrongNodeKind,
            HeapError::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            HeapError::RefcountUnderflow { .. } => ErrorKind::RefcountUnderflow,
            HeapError::WrongType { .. } => ErrorKind::WrongType,
        }
    }

    /// Returns true for contract violations that indicate a bug elsewhere.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            HeapError::WrongNodeKind { .. } | HeapError::RefcountUnderflow { .. }
        )
    }
}
