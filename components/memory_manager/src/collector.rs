//! Concurrent tri-color mark and sweep over the allocation registry.
//!
//! A cycle runs alongside mutator threads:
//!
//! 1. A boundary `B` is pushed. Every node before it now belongs to a closed
//!    span that producers will never append into.
//! 2. Marking is switched on under the exclusive barrier gate. From here on
//!    new objects are allocated black and every reference store shades both
//!    its old and new referent.
//! 3. Roots are shaded: every registered object with a non-zero refcount and
//!    every handle the caller's [`RootSet`] enumerates.
//! 4. Gray objects are traced concurrently through a work-stealing queue.
//! 5. A short remark under the exclusive gate drains whatever the barrier
//!    shaded in the meantime, then marking is switched off.
//! 6. The span `head..B` is swept. White objects with a zero refcount are
//!    unlinked and their storage is released through the epoch collector.
//!    Boundaries left by earlier cycles are folded away.
//! 7. Every surviving object is whitened for the next cycle.

use crate::config::ConfigError;
use crate::handle::Handle;
use crate::heap::{GcStats, Heap};
use crate::object::{MarkColor, ObjRef};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use crossbeam_deque::Worker;
use crossbeam_epoch as epoch;
use std::io;
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// State of the collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GcPhase {
    /// No collection in progress
    #[default]
    Idle,
    /// Concurrent marking
    Marking,
    /// Final remark with mutators excluded from the barrier gate
    Remark,
    /// Reclaiming unmarked objects
    Sweeping,
}

/// External roots supplied to a collection.
///
/// Implemented by whatever owns bindings outside the heap (call frames,
/// special-variable tables). Every handle passed to `visit` is treated as
/// reachable for the whole cycle.
pub trait RootSet {
    /// Calls `visit` with every root handle.
    fn for_each_root(&self, visit: &mut dyn FnMut(&Handle<'_>));
}

/// A root set with no roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoots;

impl RootSet for NoRoots {
    fn for_each_root(&self, _visit: &mut dyn FnMut(&Handle<'_>)) {}
}

impl<'h> RootSet for [Handle<'h>] {
    fn for_each_root(&self, visit: &mut dyn FnMut(&Handle<'_>)) {
        self.iter().for_each(|handle| visit(handle));
    }
}

impl<'h> RootSet for Vec<Handle<'h>> {
    fn for_each_root(&self, visit: &mut dyn FnMut(&Handle<'_>)) {
        self.as_slice().for_each_root(visit);
    }
}

impl<R: RootSet + ?Sized> RootSet for &R {
    fn for_each_root(&self, visit: &mut dyn FnMut(&Handle<'_>)) {
        (**self).for_each_root(visit);
    }
}

/// Gray objects awaiting a scan.
///
/// Children found by the collector go to a local deque; objects shaded by the
/// write barrier are stolen from the barrier's shared injector.
struct MarkStack<'a> {
    heap: &'a Heap,
    local: Worker<ObjRef>,
    marked: usize,
}

impl<'a> MarkStack<'a> {
    fn new(heap: &'a Heap) -> Self {
        MarkStack {
            heap,
            local: Worker::new_lifo(),
            marked: 0,
        }
    }

    fn pop(&self) -> Option<ObjRef> {
        self.local.pop().or_else(|| self.heap.barrier.steal())
    }

    /// Scans one gray object, shading its white children.
    fn scan(&mut self, object: ObjRef) {
        // SAFETY: gray objects were reachable when shaded and nothing in the
        // current cycle has swept yet.
        let header = unsafe { object.get() };
        if !header.color.transition(MarkColor::Gray, MarkColor::Black) {
            return;
        }
        self.marked += 1;
        if !header.info().has_references {
            return;
        }
        header.for_each_reference(|child| {
            // SAFETY: `child` is referenced from a live object.
            let child_header = unsafe { child.get() };
            if child_header.color.transition(MarkColor::White, MarkColor::Gray) {
                self.local.push(child);
            }
        });
    }

    /// Traces until both queues are empty, yielding every `batch` objects.
    fn drain(&mut self, batch: usize) {
        let mut since_yield = 0;
        while let Some(object) = self.pop() {
            self.scan(object);
            since_yield += 1;
            if batch > 0 && since_yield >= batch {
                since_yield = 0;
                thread::yield_now();
            }
        }
    }

    /// Traces until both queues are empty without yielding.
    fn finish(&mut self) {
        while let Some(object) = self.pop() {
            self.scan(object);
        }
    }
}

impl Heap {
    /// Runs one full collection cycle with the given external roots.
    ///
    /// Objects that have a live handle, that are reachable from one, or that
    /// are reachable from `roots` survive. Everything else registered before
    /// the cycle started is reclaimed, cycles included.
    pub fn collect(&self, roots: &dyn RootSet) -> GcStats {
        let _cycle = self.collector.lock();
        let started = Instant::now();
        let guard = epoch::pin();

        let boundary = self.registry.push_back_boundary(&guard);

        {
            let _exclusive = self.barrier.exclusive();
            self.barrier.set_marking(true);
            self.phase.store(GcPhase::Marking);
        }
        tracing::trace!("marking started");

        for node in self.registry.iter(&guard) {
            if let Ok(&object) = node.datum() {
                // SAFETY: registered objects are only released by the sweep,
                // which this cycle has not reached.
                if unsafe { object.get() }.refcount() > 0 {
                    self.barrier.shade(Some(object));
                }
            }
        }
        roots.for_each_root(&mut |handle: &Handle<'_>| {
            if let Ok(object) = handle.object_in(self) {
                self.barrier.shade(Some(object));
            }
        });

        let mut stack = MarkStack::new(self);
        stack.drain(self.config().mark_batch);

        {
            let _exclusive = self.barrier.exclusive();
            self.phase.store(GcPhase::Remark);
            stack.finish();
            self.barrier.set_marking(false);
        }
        let marked = stack.marked;
        tracing::trace!(marked, "marking finished");

        self.phase.store(GcPhase::Sweeping);
        let mut reclaimed = 0;
        let mut reclaimed_bytes = 0;
        let mut previous = self.registry.head(&guard);
        while let Some(node) = previous.next(&guard) {
            if ptr::eq(node, boundary) {
                break;
            }
            let doomed = match node.datum() {
                Ok(&object) => {
                    // SAFETY: still registered, so not yet released.
                    let header = unsafe { object.get() };
                    header.mark_color() == MarkColor::White && header.refcount() == 0
                }
                Err(_) => true,
            };
            if !doomed {
                previous = node;
                continue;
            }
            let datum = node.datum().ok().copied();
            // SAFETY: the collector lock serializes removals, and `node` lies
            // before `boundary`, so no producer appends after it.
            if !unsafe { self.registry.remove_successor(previous, &guard) } {
                break;
            }
            if let Some(object) = datum {
                // SAFETY: unlinked but not yet released.
                reclaimed_bytes += unsafe { object.get() }.footprint();
                // SAFETY: the object is unreachable and unlinked; readers that
                // loaded it earlier are still pinned, so the free is deferred.
                unsafe { guard.defer_unchecked(move || object.release_storage()) };
                reclaimed += 1;
            }
        }
        self.counters.live.fetch_sub(reclaimed, Ordering::AcqRel);
        self.counters
            .live_bytes
            .fetch_sub(reclaimed_bytes, Ordering::Relaxed);

        for node in self.registry.iter(&guard) {
            if let Ok(&object) = node.datum() {
                // SAFETY: registered objects are live.
                unsafe { object.get() }.color.store(MarkColor::White);
            }
        }
        self.phase.store(GcPhase::Idle);
        drop(guard);

        let elapsed = started.elapsed();
        let counters = &self.counters;
        counters.collections.fetch_add(1, Ordering::Relaxed);
        counters.reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
        counters.last_marked.store(marked, Ordering::Relaxed);
        counters.last_reclaimed.store(reclaimed, Ordering::Relaxed);
        counters
            .last_duration_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
        tracing::debug!(
            marked,
            reclaimed,
            elapsed_us = elapsed.as_micros() as u64,
            "collection finished"
        );

        self.stats()
    }

    /// Runs one full collection cycle with no external roots.
    pub fn collect_garbage(&self) -> GcStats {
        self.collect(&NoRoots)
    }
}

/// Errors raised while starting a [`BackgroundCollector`].
#[derive(Debug, Error)]
pub enum StartError {
    /// The heap's configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The collector thread could not be spawned
    #[error("failed to spawn collector thread: {0}")]
    Spawn(#[from] io::Error),
}

enum Command {
    Collect,
    Stop,
}

/// Runs [`Heap::collect_garbage`] periodically on a dedicated thread.
///
/// The thread stops when [`stop`](Self::stop) is called or the collector is
/// dropped.
pub struct BackgroundCollector {
    sender: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundCollector {
    /// Spawns the collector thread.
    pub fn start(heap: Arc<Heap>, interval: Duration) -> io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Command>();
        let thread = thread::Builder::new()
            .name("gc-collector".into())
            .spawn(move || {
                tracing::debug!(
                    interval_ms = interval.as_millis() as u64,
                    "background collector started"
                );
                loop {
                    match receiver.recv_timeout(interval) {
                        Ok(Command::Collect) | Err(RecvTimeoutError::Timeout) => {
                            heap.collect_garbage();
                        }
                        Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("background collector stopped");
            })?;
        Ok(BackgroundCollector {
            sender,
            thread: Some(thread),
        })
    }

    /// Starts a collector if the heap's configuration asks for one.
    ///
    /// A configuration that fails [`GcConfig::validate`](crate::GcConfig::validate)
    /// is rejected before any thread is spawned.
    pub fn for_heap(heap: &Arc<Heap>) -> Result<Option<Self>, StartError> {
        let config = heap.config();
        config.validate()?;
        if !config.background {
            return Ok(None);
        }
        let collector = Self::start(Arc::clone(heap), config.collect_interval())?;
        Ok(Some(collector))
    }

    /// Requests a collection without waiting for the interval.
    pub fn trigger(&self) {
        let _ = self.sender.send(Command::Collect);
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(&mut self) {
        let _ = self.sender.send(Command::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("background collector panicked");
            }
        }
    }

    /// Returns true while the thread is running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for BackgroundCollector {
    fn drop(&mut self) {
        self.stop();
    }
}
