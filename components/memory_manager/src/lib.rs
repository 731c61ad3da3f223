//! Memory Manager - Lisp object heap and concurrent collector
//!
//! This component provides:
//! - Tagged heap objects (cons, fixnum, string, symbol, package, readtable)
//! - Reference-counted handles tied to the heap that produced them
//! - A lock-free, boundary-segmented allocation registry
//! - A concurrent tri-color mark and sweep collector with a write barrier
//! - An optional background collection thread
//!
//! # Examples
//!
//! ```
//! use memory_manager::Heap;
//!
//! let heap = Heap::new();
//! let a = heap.allocate_cons(&heap.nil(), &heap.nil()).unwrap();
//! let b = heap.allocate_cons(&heap.nil(), &a).unwrap();
//! a.set_cdr(&b).unwrap();
//! drop((a, b));
//!
//! let stats = heap.collect_garbage();
//! assert_eq!(stats.last_reclaimed, 2);
//! assert_eq!(heap.object_count(), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod config;
pub mod handle;
pub mod heap;
pub mod object;
pub mod readtable;
pub mod registry;
mod write_barrier;

// Re-export main types
pub use collector::{BackgroundCollector, GcPhase, NoRoots, RootSet, StartError};
pub use config::{ConfigError, GcConfig};
pub use handle::Handle;
pub use heap::{GcStats, Heap};
pub use object::{type_info, LispObject, MarkColor, ObjectData, Slot, SymbolTable};
pub use readtable::{Readtable, SyntaxType, READTABLE_SIZE};
pub use registry::{Iter, Node, Registry};

// Re-export shared error and tag types
pub use core_types::{ErrorKind, HeapError, NodeKind, TypeInfo, TypeTag};
