//! Heap object representation.
//!
//! Every heap value is a [`LispObject`]: a small header (type tag, atomic
//! refcount, atomic mark color) followed by an [`ObjectData`] payload. Dispatch
//! over variants is a `match` on the payload; there are no trait objects on the
//! allocation path.
//!
//! References between objects (`car`/`cdr`, a symbol's home package, a
//! package's symbols, readtable dispatch functions) are non-owning. They keep
//! their target alive only through the collector's trace, never through the
//! refcount.

use crate::readtable::Readtable;
use core_types::{TypeInfo, TypeTag};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};

/// Mark colors for tri-color marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkColor {
    /// Not yet reached in the current cycle
    White = 0,
    /// Reached, children not yet scanned
    Gray = 1,
    /// Reached and fully scanned
    Black = 2,
}

impl MarkColor {
    fn from_u8(raw: u8) -> MarkColor {
        match raw {
            1 => MarkColor::Gray,
            2 => MarkColor::Black,
            _ => MarkColor::White,
        }
    }
}

/// Atomic mark color for thread-safe marking operations.
#[repr(transparent)]
pub(crate) struct AtomicMarkColor(AtomicU8);

impl AtomicMarkColor {
    pub(crate) fn new(color: MarkColor) -> Self {
        AtomicMarkColor(AtomicU8::new(color as u8))
    }

    pub(crate) fn load(&self) -> MarkColor {
        MarkColor::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, color: MarkColor) {
        self.0.store(color as u8, Ordering::Release);
    }

    /// Moves `current` to `new`; returns false if the color was something else.
    pub(crate) fn transition(&self, current: MarkColor, new: MarkColor) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Raw, non-owning reference to a heap object.
///
/// Never leaves the crate: everything outside goes through handles.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjRef(NonNull<LispObject>);

// SAFETY: objects are shared between threads by design; all of their mutable
// state is atomic or behind a lock, and their storage is only released by the
// collector after the object became unreachable.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    pub(crate) fn from_box(object: Box<LispObject>) -> Self {
        ObjRef(NonNull::from(Box::leak(object)))
    }

    /// # Safety
    ///
    /// The object must not have been released yet, and the returned reference
    /// must not outlive the heap or the epoch guard that keeps it alive.
    pub(crate) unsafe fn get<'a>(self) -> &'a LispObject {
        self.0.as_ref()
    }

    pub(crate) fn as_ptr(self) -> *mut LispObject {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// No other reference to the object may be used afterwards.
    pub(crate) unsafe fn release_storage(self) {
        drop(Box::from_raw(self.0.as_ptr()));
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:p})", self.0.as_ptr())
    }
}

/// An atomically updated reference slot inside a heap object.
///
/// Loads and stores are individually atomic; there is no way to update two
/// slots of the same object together.
pub struct Slot(AtomicPtr<LispObject>);

impl Slot {
    pub(crate) fn new(target: Option<ObjRef>) -> Self {
        Slot(AtomicPtr::new(target.map_or(ptr::null_mut(), ObjRef::as_ptr)))
    }

    pub(crate) fn load(&self) -> Option<ObjRef> {
        NonNull::new(self.0.load(Ordering::SeqCst)).map(ObjRef)
    }

    /// Stores `target` and returns the previous referent.
    pub(crate) fn swap(&self, target: Option<ObjRef>) -> Option<ObjRef> {
        let raw = target.map_or(ptr::null_mut(), ObjRef::as_ptr);
        NonNull::new(self.0.swap(raw, Ordering::SeqCst)).map(ObjRef)
    }

    /// Returns true if the slot currently refers to an object.
    pub fn is_set(&self) -> bool {
        !self.0.load(Ordering::Acquire).is_null()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.load() {
            Some(target) => write!(f, "Slot({:p})", target.as_ptr()),
            None => f.write_str("Slot(unset)"),
        }
    }
}

/// A package's name-to-symbol mapping.
pub struct SymbolTable(pub(crate) RwLock<HashMap<String, ObjRef>>);

impl SymbolTable {
    pub(crate) fn new() -> Self {
        SymbolTable(RwLock::new(HashMap::new()))
    }

    /// Returns the number of symbols in the table.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Returns true if no symbol is present.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Returns true if a symbol with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }

    /// Returns the names of all symbols, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Payload of a heap object.
#[derive(Debug)]
pub enum ObjectData {
    /// The heap's `nil` singleton
    Nil,
    /// Two-slot mutable pair
    Cons {
        /// First element
        car: Slot,
        /// Rest of the list
        cdr: Slot,
    },
    /// Immutable integer
    Fixnum(i64),
    /// Mutable character buffer
    String(RwLock<String>),
    /// Named symbol
    Symbol {
        /// Immutable print name
        name: String,
        /// Owning package, unset for uninterned symbols
        home_package: Slot,
    },
    /// Name-to-symbol mapping
    Package {
        /// Package name
        name: String,
        /// Symbols owned by the package
        symbols: SymbolTable,
    },
    /// Reader syntax table
    Readtable(Readtable),
}

impl ObjectData {
    /// Returns the tag of this variant.
    pub fn tag(&self) -> TypeTag {
        match self {
            ObjectData::Nil => TypeTag::Nil,
            ObjectData::Cons { .. } => TypeTag::Cons,
            ObjectData::Fixnum(_) => TypeTag::Fixnum,
            ObjectData::String(_) => TypeTag::String,
            ObjectData::Symbol { .. } => TypeTag::Symbol,
            ObjectData::Package { .. } => TypeTag::Package,
            ObjectData::Readtable(_) => TypeTag::Readtable,
        }
    }
}

const fn layout(tag: TypeTag, payload_size: usize) -> TypeInfo {
    TypeInfo {
        tag,
        name: tag.name(),
        payload_size,
        has_references: tag.has_references(),
    }
}

/// Layout of every variant, indexed by tag discriminant.
static TYPE_TABLE: [TypeInfo; 7] = [
    layout(TypeTag::Nil, 0),
    layout(TypeTag::Cons, 2 * size_of::<Slot>()),
    layout(TypeTag::Fixnum, size_of::<i64>()),
    layout(TypeTag::String, size_of::<RwLock<String>>()),
    layout(TypeTag::Symbol, size_of::<String>() + size_of::<Slot>()),
    layout(
        TypeTag::Package,
        size_of::<String>() + size_of::<SymbolTable>(),
    ),
    layout(TypeTag::Readtable, size_of::<Readtable>()),
];

/// Returns the layout entry for `tag`.
pub fn type_info(tag: TypeTag) -> &'static TypeInfo {
    &TYPE_TABLE[tag as usize]
}

/// A heap object: header plus payload.
pub struct LispObject {
    tag: TypeTag,
    refcount: AtomicUsize,
    pub(crate) color: AtomicMarkColor,
    data: ObjectData,
}

impl LispObject {
    pub(crate) fn new(data: ObjectData, color: MarkColor) -> Self {
        LispObject {
            tag: data.tag(),
            refcount: AtomicUsize::new(0),
            color: AtomicMarkColor::new(color),
            data,
        }
    }

    /// Returns the type tag of this object.
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Returns the number of live handles referencing this object.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    /// Returns the current mark color.
    pub fn mark_color(&self) -> MarkColor {
        self.color.load()
    }

    /// Returns the payload.
    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    /// Returns the layout entry for this object's variant.
    pub fn info(&self) -> &'static TypeInfo {
        type_info(self.tag)
    }

    /// Bytes accounted to this object: the header plus its variant's inline
    /// payload.
    pub fn footprint(&self) -> usize {
        size_of::<LispObject>() - size_of::<ObjectData>() + self.info().payload_size
    }

    pub(crate) fn retain(&self) {
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the refcount. Fails without modifying it if it is already zero.
    pub(crate) fn release(&self) -> Result<usize, usize> {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map(|previous| previous - 1)
    }

    /// Calls `visit` with every object this one references.
    pub(crate) fn for_each_reference(&self, mut visit: impl FnMut(ObjRef)) {
        match &self.data {
            ObjectData::Nil | ObjectData::Fixnum(_) | ObjectData::String(_) => {}
            ObjectData::Cons { car, cdr } => {
                car.load().into_iter().for_each(&mut visit);
                cdr.load().into_iter().for_each(&mut visit);
            }
            ObjectData::Symbol { home_package, .. } => {
                home_package.load().into_iter().for_each(&mut visit);
            }
            ObjectData::Package { symbols, .. } => {
                symbols.0.read().values().copied().for_each(&mut visit);
            }
            ObjectData::Readtable(readtable) => readtable.for_each_function(&mut visit),
        }
    }
}

impl fmt::Debug for LispObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LispObject")
            .field("tag", &self.tag)
            .field("refcount", &self.refcount())
            .field("color", &self.mark_color())
            .field("data", &self.data)
            .finish()
    }
}
