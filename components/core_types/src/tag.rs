//! Heap object type tags.
//!
//! Every heap variant is assigned exactly one tag. Tags are fixed at compile
//! time; the per-tag layout table lives next to the payload types it
//! measures.

use std::fmt;

/// Tag identifying the concrete variant of a heap object.
///
/// Tags are stable for the lifetime of an object and are used both for
/// dispatch and for collector-side layout introspection.
///
/// # Examples
///
/// ```
/// use core_types::TypeTag;
///
/// let tag = TypeTag::Cons;
/// assert_eq!(TypeTag::from_u8(tag as u8), Some(TypeTag::Cons));
/// assert!(tag.has_references());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypeTag {
    /// The per-heap `nil` singleton
    Nil = 0,
    /// Two-slot mutable pair
    Cons = 1,
    /// Immutable integer
    Fixnum = 2,
    /// Mutable character buffer
    String = 3,
    /// Named symbol with an optional home package
    Symbol = 4,
    /// Mapping from symbol names to symbols
    Package = 5,
    /// Reader syntax table
    Readtable = 6,
}

/// Layout information for one registered tag.
///
/// The table itself is built by the heap crate, which owns the payload types
/// the sizes are measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// The tag this entry describes
    pub tag: TypeTag,
    /// Lower-case printable name
    pub name: &'static str,
    /// Inline payload size in bytes, excluding the object header
    pub payload_size: usize,
    /// Whether objects of this variant hold references the collector must trace
    pub has_references: bool,
}

impl TypeTag {
    /// Every registered tag, in discriminant order.
    pub const ALL: [TypeTag; 7] = [
        TypeTag::Nil,
        TypeTag::Cons,
        TypeTag::Fixnum,
        TypeTag::String,
        TypeTag::Symbol,
        TypeTag::Package,
        TypeTag::Readtable,
    ];

    /// Converts a raw discriminant back into a tag.
    ///
    /// Returns `None` for values that no variant was registered with.
    pub fn from_u8(raw: u8) -> Option<TypeTag> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Returns the printable name of this tag.
    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Cons => "cons",
            TypeTag::Fixnum => "fixnum",
            TypeTag::String => "string",
            TypeTag::Symbol => "symbol",
            TypeTag::Package => "package",
            TypeTag::Readtable => "readtable",
        }
    }

    /// Returns true for variants whose payload can reference other objects.
    pub const fn has_references(self) -> bool {
        matches!(
            self,
            TypeTag::Cons | TypeTag::Symbol | TypeTag::Package | TypeTag::Readtable
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
