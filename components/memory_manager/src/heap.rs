//! Heap façade: allocation, publication and diagnostics.
//!
//! Every object the heap hands out goes through the same publication order:
//! the object is boxed, wrapped in a [`Handle`] (refcount 1), and only then
//! appended to the registry. A collector scanning the registry can therefore
//! never see a zero refcount on an object that some thread already holds.

use crate::collector::GcPhase;
use crate::config::GcConfig;
use crate::handle::Handle;
use crate::object::{LispObject, MarkColor, ObjRef, ObjectData, Slot, SymbolTable};
use crate::readtable::Readtable;
use crate::registry::Registry;
use crate::write_barrier::WriteBarrier;
use core_types::HeapError;
use crossbeam::atomic::AtomicCell;
use crossbeam_epoch as epoch;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of heap and collector statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Objects allocated since the heap was created
    pub allocations: usize,
    /// Objects currently registered (excluding `nil`)
    pub live_objects: usize,
    /// Header and inline payload bytes of the registered objects
    pub live_bytes: usize,
    /// Completed collection cycles
    pub collections: usize,
    /// Objects reclaimed over all cycles
    pub total_reclaimed: usize,
    /// Objects marked reachable by the last cycle
    pub last_marked: usize,
    /// Objects reclaimed by the last cycle
    pub last_reclaimed: usize,
    /// Duration of the last cycle in microseconds
    pub last_duration_us: u64,
    /// Objects shaded by the write barrier over all cycles
    pub barrier_shades: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) allocations: AtomicUsize,
    pub(crate) live: AtomicUsize,
    pub(crate) live_bytes: AtomicUsize,
    pub(crate) collections: AtomicUsize,
    pub(crate) reclaimed: AtomicUsize,
    pub(crate) last_marked: AtomicUsize,
    pub(crate) last_reclaimed: AtomicUsize,
    pub(crate) last_duration_us: AtomicU64,
}

/// A garbage-collected heap of Lisp objects.
///
/// Allocation, handle traffic and slot mutation are safe from any number of
/// threads. Collection cycles are serialized internally and run concurrently
/// with all of them.
///
/// # Examples
///
/// ```
/// use memory_manager::{Heap, TypeTag};
///
/// let heap = Heap::new();
/// let answer = heap.allocate_fixnum(42).unwrap();
/// assert_eq!(answer.tag().unwrap(), TypeTag::Fixnum);
/// assert_eq!(answer.refcount().unwrap(), 1);
/// assert_eq!(heap.object_count(), 1);
/// ```
pub struct Heap {
    config: GcConfig,
    pub(crate) registry: Registry<ObjRef>,
    pub(crate) nil: ObjRef,
    pub(crate) barrier: WriteBarrier,
    pub(crate) collector: Mutex<()>,
    pub(crate) phase: AtomicCell<GcPhase>,
    pub(crate) counters: Counters,
}

impl Heap {
    /// Creates a heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Creates a heap with the given configuration.
    pub fn with_config(config: GcConfig) -> Self {
        // nil is never registered and stays black, so marking never queues it.
        let nil = ObjRef::from_box(Box::new(LispObject::new(
            ObjectData::Nil,
            MarkColor::Black,
        )));
        Heap {
            config,
            registry: Registry::new(),
            nil,
            barrier: WriteBarrier::new(),
            collector: Mutex::new(()),
            phase: AtomicCell::new(GcPhase::Idle),
            counters: Counters::default(),
        }
    }

    /// Returns the configuration this heap was created with.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Returns a handle to the heap's `nil`.
    pub fn nil(&self) -> Handle<'_> {
        Handle::acquire(self, self.nil)
    }

    /// Allocates a fixnum.
    pub fn allocate_fixnum(&self, value: i64) -> Result<Handle<'_>, HeapError> {
        self.allocate_object(ObjectData::Fixnum(value))
    }

    /// Allocates a cons cell.
    pub fn allocate_cons(
        &self,
        car: &Handle<'_>,
        cdr: &Handle<'_>,
    ) -> Result<Handle<'_>, HeapError> {
        let car = car.object_in(self)?;
        let cdr = cdr.object_in(self)?;
        self.allocate_object(ObjectData::Cons {
            car: Slot::new(Some(car)),
            cdr: Slot::new(Some(cdr)),
        })
    }

    /// Allocates a proper list of `items`.
    pub fn allocate_list(&self, items: &[Handle<'_>]) -> Result<Handle<'_>, HeapError> {
        let mut list = self.nil();
        for item in items.iter().rev() {
            list = self.allocate_cons(item, &list)?;
        }
        Ok(list)
    }

    /// Allocates a string.
    pub fn allocate_string(&self, text: &str) -> Result<Handle<'_>, HeapError> {
        self.allocate_object(ObjectData::String(RwLock::new(text.to_string())))
    }

    /// Allocates an uninterned symbol.
    pub fn allocate_symbol(&self, name: &str) -> Result<Handle<'_>, HeapError> {
        self.allocate_object(ObjectData::Symbol {
            name: name.to_string(),
            home_package: Slot::new(None),
        })
    }

    /// Allocates an empty package.
    pub fn allocate_package(&self, name: &str) -> Result<Handle<'_>, HeapError> {
        self.allocate_object(ObjectData::Package {
            name: name.to_string(),
            symbols: SymbolTable::new(),
        })
    }

    /// Allocates a readtable with the standard syntax.
    pub fn allocate_readtable(&self) -> Result<Handle<'_>, HeapError> {
        self.allocate_object(ObjectData::Readtable(Readtable::standard()))
    }

    fn reserve(&self) -> Result<(), HeapError> {
        let limit = self.config.max_objects;
        if limit == 0 {
            self.counters.live.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        self.counters
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map(|_| ())
            .map_err(|live| {
                tracing::warn!(limit, live, "heap object limit reached");
                HeapError::AllocationExhausted { limit }
            })
    }

    fn allocate_object(&self, data: ObjectData) -> Result<Handle<'_>, HeapError> {
        self.reserve()?;

        let _gate = self.barrier.enter();
        let marking = self.barrier.is_marking();
        let color = if marking {
            MarkColor::Black
        } else {
            MarkColor::White
        };
        let object = ObjRef::from_box(Box::new(LispObject::new(data, color)));
        if marking {
            // SAFETY: the object was just created and is owned by this call.
            unsafe { object.get() }.for_each_reference(|child| self.barrier.shade(Some(child)));
        }

        // SAFETY: as above.
        let footprint = unsafe { object.get() }.footprint();

        let handle = Handle::acquire(self, object);
        let guard = epoch::pin();
        self.registry.push_back(object, &guard);
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_add(footprint, Ordering::Relaxed);
        Ok(handle)
    }

    /// Returns the current collector phase.
    pub fn phase(&self) -> GcPhase {
        self.phase.load()
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> GcStats {
        let counters = &self.counters;
        GcStats {
            allocations: counters.allocations.load(Ordering::Relaxed),
            live_objects: counters.live.load(Ordering::Relaxed),
            live_bytes: counters.live_bytes.load(Ordering::Relaxed),
            collections: counters.collections.load(Ordering::Relaxed),
            total_reclaimed: counters.reclaimed.load(Ordering::Relaxed),
            last_marked: counters.last_marked.load(Ordering::Relaxed),
            last_reclaimed: counters.last_reclaimed.load(Ordering::Relaxed),
            last_duration_us: counters.last_duration_us.load(Ordering::Relaxed),
            barrier_shades: self.barrier.shade_count(),
        }
    }

    /// Returns the number of registry nodes, boundaries included.
    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }

    /// Returns the number of objects in the registry.
    pub fn object_count(&self) -> usize {
        self.registry.data_len()
    }

    /// Returns the number of boundary nodes in the registry.
    pub fn boundary_count(&self) -> usize {
        self.registry.boundary_len()
    }

    /// Returns true if the handle's object is linked into this heap's registry.
    ///
    /// Always false for `nil` and for empty or foreign handles.
    pub fn is_registered(&self, handle: &Handle<'_>) -> bool {
        let Ok(target) = handle.object_in(self) else {
            return false;
        };
        let guard = epoch::pin();
        self.registry
            .iter(&guard)
            .any(|node| node.datum().is_ok_and(|&object| object == target))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out live handles and concurrent access, so
        // every registered object can be released directly.
        unsafe {
            let guard = epoch::unprotected();
            for node in self.registry.iter(guard) {
                if let Ok(&object) = node.datum() {
                    object.release_storage();
                }
            }
            self.nil.release_storage();
        }
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("phase", &self.phase())
            .field("stats", &self.stats())
            .finish()
    }
}
