//! Reference-counted handles.
//!
//! A [`Handle`] is the only way code outside this crate reaches a heap object.
//! Creating or cloning a handle increments the object's refcount, dropping it
//! decrements, and [`Handle::take`] moves ownership out while leaving an empty
//! handle behind. An object whose count reaches zero is not freed here: it
//! becomes a candidate for the next collection, which also decides whether it
//! is still reachable from other objects.

use crate::heap::Heap;
use crate::object::{LispObject, ObjRef, ObjectData, Slot, SymbolTable};
use crate::readtable::Readtable;
use core_types::{HeapError, TypeTag};
use crossbeam_epoch as epoch;
use std::fmt;

/// Owning reference to a heap object, bound to the heap that produced it.
///
/// # Examples
///
/// ```
/// use memory_manager::Heap;
///
/// let heap = Heap::new();
/// let mut first = heap.allocate_fixnum(42).unwrap();
/// assert_eq!(first.refcount().unwrap(), 1);
///
/// let copy = first.clone();
/// assert_eq!(first.refcount().unwrap(), 2);
/// drop(copy);
///
/// let moved = first.take();
/// assert!(first.get().is_err());
/// assert_eq!(moved.fixnum().unwrap(), 42);
/// assert_eq!(moved.refcount().unwrap(), 1);
/// ```
pub struct Handle<'h> {
    heap: &'h Heap,
    object: Option<ObjRef>,
}

impl<'h> Handle<'h> {
    /// Wraps `object`, incrementing its refcount.
    pub(crate) fn acquire(heap: &'h Heap, object: ObjRef) -> Self {
        // SAFETY: callers only pass objects that are reachable or pinned, so
        // the storage is live.
        unsafe { object.get() }.retain();
        Handle {
            heap,
            object: Some(object),
        }
    }

    /// Wraps `object` whose refcount was already incremented for this handle.
    fn adopt(heap: &'h Heap, object: ObjRef) -> Self {
        Handle {
            heap,
            object: Some(object),
        }
    }

    /// Returns true if this handle was moved from.
    pub fn is_empty(&self) -> bool {
        self.object.is_none()
    }

    /// Moves ownership into a new handle, leaving this one empty.
    ///
    /// The refcount is unchanged.
    pub fn take(&mut self) -> Handle<'h> {
        Handle {
            heap: self.heap,
            object: self.object.take(),
        }
    }

    /// Copies the handle, failing on an empty handle.
    pub fn try_clone(&self) -> Result<Handle<'h>, HeapError> {
        let object = self.object_ref()?;
        Ok(Handle::acquire(self.heap, object))
    }

    /// Dereferences the handle.
    pub fn get(&self) -> Result<&LispObject, HeapError> {
        let object = self.object_ref()?;
        // SAFETY: this handle holds a refcount on the object, so the collector
        // will not release it while `self` is borrowed.
        Ok(unsafe { object.get() })
    }

    /// Returns the heap this handle belongs to.
    pub fn heap(&self) -> &'h Heap {
        self.heap
    }

    pub(crate) fn object_ref(&self) -> Result<ObjRef, HeapError> {
        self.object.ok_or(HeapError::InvalidHandle)
    }

    /// Returns the referenced object if this handle belongs to `heap`.
    pub(crate) fn object_in(&self, heap: &Heap) -> Result<ObjRef, HeapError> {
        if !std::ptr::eq(self.heap, heap) {
            return Err(HeapError::InvalidHandle);
        }
        self.object_ref()
    }

    /// Returns the type tag of the referenced object.
    pub fn tag(&self) -> Result<TypeTag, HeapError> {
        Ok(self.get()?.tag())
    }

    /// Returns the refcount of the referenced object.
    pub fn refcount(&self) -> Result<usize, HeapError> {
        Ok(self.get()?.refcount())
    }

    /// Returns true if the handle refers to the heap's `nil`.
    pub fn is_nil(&self) -> Result<bool, HeapError> {
        Ok(self.tag()? == TypeTag::Nil)
    }

    /// Returns true if both handles refer to the same object.
    ///
    /// Empty handles are never equal to anything.
    pub fn ptr_eq(&self, other: &Handle<'_>) -> bool {
        matches!((self.object, other.object), (Some(a), Some(b)) if a == b)
    }

    fn wrong_type(&self, expected: TypeTag) -> HeapError {
        match self.tag() {
            Ok(found) => HeapError::WrongType { expected, found },
            Err(err) => err,
        }
    }

    /// Acquires whatever `read` returns, retrying until the read is stable.
    ///
    /// The refcount is taken before re-reading, so a referent that was
    /// swapped out and released concurrently is never handed out.
    fn acquire_stable(&self, read: impl Fn() -> Option<ObjRef>) -> Option<Handle<'h>> {
        let _gate = self.heap.barrier.enter();
        let _guard = epoch::pin();
        loop {
            let target = read()?;
            // SAFETY: released objects are freed through the epoch collector,
            // so the storage stays valid while pinned.
            let object = unsafe { target.get() };
            object.retain();
            if read() == Some(target) {
                self.heap.barrier.record_acquire(target);
                return Some(Handle::adopt(self.heap, target));
            }
            let _ = object.release();
        }
    }

    /// Acquires an object found in a table. The gate must be held.
    fn acquire_found(&self, target: ObjRef) -> Handle<'h> {
        self.heap.barrier.record_acquire(target);
        Handle::acquire(self.heap, target)
    }

    fn load_slot(&self, slot: &Slot) -> Option<Handle<'h>> {
        self.acquire_stable(|| slot.load())
    }

    // Cons

    fn cons_slots(&self) -> Result<(&Slot, &Slot), HeapError> {
        match self.get()?.data() {
            ObjectData::Cons { car, cdr } => Ok((car, cdr)),
            _ => Err(self.wrong_type(TypeTag::Cons)),
        }
    }

    /// Returns the first element of a cons.
    pub fn car(&self) -> Result<Handle<'h>, HeapError> {
        let (car, _) = self.cons_slots()?;
        Ok(self.load_slot(car).unwrap_or_else(|| self.heap.nil()))
    }

    /// Returns the rest of a cons.
    pub fn cdr(&self) -> Result<Handle<'h>, HeapError> {
        let (_, cdr) = self.cons_slots()?;
        Ok(self.load_slot(cdr).unwrap_or_else(|| self.heap.nil()))
    }

    /// Replaces the first element of a cons.
    pub fn set_car(&self, value: &Handle<'_>) -> Result<(), HeapError> {
        let (car, _) = self.cons_slots()?;
        let target = value.object_in(self.heap)?;
        self.heap.barrier.store(car, Some(target));
        Ok(())
    }

    /// Replaces the rest of a cons.
    pub fn set_cdr(&self, value: &Handle<'_>) -> Result<(), HeapError> {
        let (_, cdr) = self.cons_slots()?;
        let target = value.object_in(self.heap)?;
        self.heap.barrier.store(cdr, Some(target));
        Ok(())
    }

    // Fixnum

    /// Returns the value of a fixnum.
    pub fn fixnum(&self) -> Result<i64, HeapError> {
        match self.get()?.data() {
            ObjectData::Fixnum(n) => Ok(*n),
            _ => Err(self.wrong_type(TypeTag::Fixnum)),
        }
    }

    // String

    fn string_buffer(&self) -> Result<&parking_lot::RwLock<String>, HeapError> {
        match self.get()?.data() {
            ObjectData::String(buffer) => Ok(buffer),
            _ => Err(self.wrong_type(TypeTag::String)),
        }
    }

    /// Returns a copy of a string's contents.
    pub fn string_value(&self) -> Result<String, HeapError> {
        Ok(self.string_buffer()?.read().clone())
    }

    /// Appends to a string.
    pub fn string_push_str(&self, text: &str) -> Result<(), HeapError> {
        self.string_buffer()?.write().push_str(text);
        Ok(())
    }

    /// Returns the length of a string in bytes.
    pub fn string_len(&self) -> Result<usize, HeapError> {
        Ok(self.string_buffer()?.read().len())
    }

    // Symbol

    fn symbol_parts(&self) -> Result<(&str, &Slot), HeapError> {
        match self.get()?.data() {
            ObjectData::Symbol { name, home_package } => Ok((name, home_package)),
            _ => Err(self.wrong_type(TypeTag::Symbol)),
        }
    }

    /// Returns a symbol's name.
    pub fn symbol_name(&self) -> Result<&str, HeapError> {
        Ok(self.symbol_parts()?.0)
    }

    /// Returns a symbol's home package, if it has one.
    pub fn home_package(&self) -> Result<Option<Handle<'h>>, HeapError> {
        let (_, home_package) = self.symbol_parts()?;
        Ok(self.load_slot(home_package))
    }

    /// Sets or clears a symbol's home package.
    pub fn set_home_package(&self, package: Option<&Handle<'_>>) -> Result<(), HeapError> {
        let (_, home_package) = self.symbol_parts()?;
        let target = match package {
            Some(package) => {
                if package.tag()? != TypeTag::Package {
                    return Err(package.wrong_type(TypeTag::Package));
                }
                Some(package.object_in(self.heap)?)
            }
            None => None,
        };
        self.heap.barrier.store(home_package, target);
        Ok(())
    }

    // Package

    fn package_parts(&self) -> Result<(&str, &SymbolTable), HeapError> {
        match self.get()?.data() {
            ObjectData::Package { name, symbols } => Ok((name, symbols)),
            _ => Err(self.wrong_type(TypeTag::Package)),
        }
    }

    /// Returns a package's name.
    pub fn package_name(&self) -> Result<&str, HeapError> {
        Ok(self.package_parts()?.0)
    }

    /// Returns the symbol table of a package.
    pub fn package_symbols(&self) -> Result<&SymbolTable, HeapError> {
        Ok(self.package_parts()?.1)
    }

    /// Returns the number of symbols in a package.
    pub fn package_len(&self) -> Result<usize, HeapError> {
        Ok(self.package_parts()?.1.len())
    }

    /// Looks up a symbol by name.
    pub fn package_find(&self, name: &str) -> Result<Option<Handle<'h>>, HeapError> {
        let (_, symbols) = self.package_parts()?;
        let _gate = self.heap.barrier.enter();
        let table = symbols.0.read();
        let found = table.get(name).map(|&symbol| self.acquire_found(symbol));
        Ok(found)
    }

    /// Binds `symbol` under its own name, returning the symbol it replaced.
    pub fn package_insert(&self, symbol: &Handle<'_>) -> Result<Option<Handle<'h>>, HeapError> {
        let (_, symbols) = self.package_parts()?;
        let name = symbol.symbol_name()?.to_string();
        let target = symbol.object_in(self.heap)?;

        let _gate = self.heap.barrier.enter();
        let previous = symbols.0.write().insert(name, target);
        self.heap.barrier.record(previous, Some(target));
        Ok(previous.map(|previous| Handle::acquire(self.heap, previous)))
    }

    /// Returns the symbol named `name`, creating and binding it if absent.
    ///
    /// A newly created symbol gets this package as its home package.
    pub fn package_intern(&self, name: &str) -> Result<Handle<'h>, HeapError> {
        if let Some(existing) = self.package_find(name)? {
            return Ok(existing);
        }
        let (_, symbols) = self.package_parts()?;
        let symbol = self.heap.allocate_symbol(name)?;
        symbol.set_home_package(Some(self))?;
        let target = symbol.object_ref()?;

        let _gate = self.heap.barrier.enter();
        let mut table = symbols.0.write();
        if let Some(&existing) = table.get(name) {
            return Ok(self.acquire_found(existing));
        }
        table.insert(name.to_string(), target);
        self.heap.barrier.record(None, Some(target));
        Ok(symbol)
    }

    // Readtable

    /// Returns the readtable this handle refers to.
    pub fn readtable(&self) -> Result<&Readtable, HeapError> {
        match self.get()?.data() {
            ObjectData::Readtable(readtable) => Ok(readtable),
            _ => Err(self.wrong_type(TypeTag::Readtable)),
        }
    }

    /// Returns the function bound to `disp_char` `sub_char`, if any.
    pub fn dispatch_macro(
        &self,
        disp_char: char,
        sub_char: char,
    ) -> Result<Option<Handle<'h>>, HeapError> {
        let readtable = self.readtable()?;
        Ok(self.acquire_stable(|| readtable.dispatch_function(disp_char, sub_char)))
    }

    /// Binds or clears the function for `disp_char` `sub_char`.
    ///
    /// Returns false if `disp_char` is not a dispatch-macro character.
    pub fn set_dispatch_macro(
        &self,
        disp_char: char,
        sub_char: char,
        function: Option<&Handle<'_>>,
    ) -> Result<bool, HeapError> {
        let readtable = self.readtable()?;
        let target = function
            .map(|function| function.object_in(self.heap))
            .transpose()?;

        let _gate = self.heap.barrier.enter();
        match readtable.set_dispatch_function(disp_char, sub_char, target) {
            Ok(previous) => {
                self.heap.barrier.record(previous, target);
                Ok(true)
            }
            Err(()) => Ok(false),
        }
    }
}

impl Clone for Handle<'_> {
    /// Copies the handle.
    ///
    /// `Clone` cannot fail, so copying an empty handle logs a warning and
    /// yields another empty handle instead of reporting
    /// [`HeapError::InvalidHandle`]. Use [`Handle::try_clone`] where that
    /// error should reach the caller.
    fn clone(&self) -> Self {
        match self.object {
            Some(object) => Handle::acquire(self.heap, object),
            None => {
                tracing::warn!("cloned an empty handle");
                Handle {
                    heap: self.heap,
                    object: None,
                }
            }
        }
    }
}

impl Drop for Handle<'_> {
    fn drop(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        // SAFETY: this handle still holds its refcount, so the object is live.
        let header = unsafe { object.get() };
        if header.release().is_err() {
            let err = HeapError::RefcountUnderflow { tag: header.tag() };
            tracing::error!(%err, "refcount underflow while dropping handle");
            panic!("{err}");
        }
    }
}

impl fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Ok(object) => f
                .debug_struct("Handle")
                .field("tag", &object.tag())
                .field("refcount", &object.refcount())
                .finish(),
            Err(_) => f.write_str("Handle(empty)"),
        }
    }
}
