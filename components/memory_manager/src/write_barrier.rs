//! Write barrier for concurrent marking.
//!
//! While a collection is marking, every reference store shades both the value
//! being overwritten (snapshot-at-the-beginning) and the value being written
//! (incremental update). Shaded objects are pushed onto a shared gray queue
//! that the collector drains.
//!
//! Mutators hold the read side of the barrier gate for the duration of a store
//! or an allocation. The collector takes the write side only to flip marking on
//! and to run the final remark, so a mutator never observes a half-finished
//! phase change.

use crate::object::{MarkColor, ObjRef, Slot};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) struct WriteBarrier {
    gate: RwLock<()>,
    marking: AtomicBool,
    gray: Injector<ObjRef>,
    shades: AtomicUsize,
}

impl WriteBarrier {
    pub(crate) fn new() -> Self {
        WriteBarrier {
            gate: RwLock::new(()),
            marking: AtomicBool::new(false),
            gray: Injector::new(),
            shades: AtomicUsize::new(0),
        }
    }

    /// Enters a mutator critical section.
    pub(crate) fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Excludes every mutator critical section.
    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    pub(crate) fn is_marking(&self) -> bool {
        self.marking.load(Ordering::Acquire)
    }

    /// Must be called with the gate held exclusively.
    pub(crate) fn set_marking(&self, marking: bool) {
        self.marking.store(marking, Ordering::Release);
    }

    /// Stores `target` into `slot`, shading old and new referents if marking.
    pub(crate) fn store(&self, slot: &Slot, target: Option<ObjRef>) {
        let _gate = self.enter();
        let previous = slot.swap(target);
        self.record(previous, target);
    }

    /// Shades both sides of a reference update made under the gate.
    pub(crate) fn record(&self, previous: Option<ObjRef>, target: Option<ObjRef>) {
        if self.is_marking() {
            self.shade(previous);
            self.shade(target);
        }
    }

    /// Shades an object a mutator just obtained a handle to from a slot or
    /// table, so that handles created after the root scan are still traced.
    pub(crate) fn record_acquire(&self, target: ObjRef) {
        if self.is_marking() {
            self.shade(Some(target));
        }
    }

    /// Shades a referent gray if it is still white.
    ///
    /// Callers that mutate references outside `store` must hold the gate.
    pub(crate) fn shade(&self, object: Option<ObjRef>) {
        let Some(object) = object else {
            return;
        };
        // SAFETY: a shaded object is referenced from a slot or handle that is
        // live for the duration of the barrier, so it has not been released.
        let header = unsafe { object.get() };
        if header.color.transition(MarkColor::White, MarkColor::Gray) {
            self.gray.push(object);
            self.shades.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn steal(&self) -> Option<ObjRef> {
        loop {
            match self.gray.steal() {
                Steal::Success(object) => return Some(object),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn shade_count(&self) -> usize {
        self.shades.load(Ordering::Relaxed)
    }
}
