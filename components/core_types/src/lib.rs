//! Core heap types shared by the allocator and its clients.
//!
//! This crate provides the leaf vocabulary of the Lisp heap: the type tag
//! carried by every heap object and the error taxonomy reported by handle,
//! registry and allocator operations.
//!
//! # Overview
//!
//! - [`TypeTag`] - Tag identifying the concrete variant of a heap object
//! - [`TypeInfo`] - Per-tag layout information, filled in by the heap
//! - [`HeapError`] - Errors surfaced by the heap core
//! - [`ErrorKind`] - Fieldless classification of [`HeapError`]
//! - [`NodeKind`] - Kind of a registry node (boundary or data)
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, HeapError, TypeTag};
//!
//! let tag = TypeTag::Fixnum;
//! assert_eq!(tag.name(), "fixnum");
//! assert!(!tag.has_references());
//!
//! let error = HeapError::WrongType {
//!     expected: TypeTag::Cons,
//!     found: TypeTag::Fixnum,
//! };
//! assert_eq!(error.kind(), ErrorKind::WrongType);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod tag;

pub use error::{ErrorKind, HeapError, NodeKind};
pub use tag::{TypeInfo, TypeTag};
