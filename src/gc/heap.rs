//! The garbage-collected heap.
//!
//! A semispace copying collector: the heap is one anonymous allocation split
//! into two equal regions, the tospace (active) and the fromspace (reserve).
//! Allocation bumps a pointer in the tospace. When it fills, the regions are
//! flipped and every live object is copied into the new tospace (Cheney-style
//! with an explicit worklist), guided by the root-frame chain.
//!
//! Cells that own off-heap payloads sit on a finalization queue; after a
//! collection, unforwarded entries are dead and get finalized, forwarded
//! entries are rewritten to their new addresses. Both halves are required.
//!
//! Debug builds overwrite relocated fromspace cells with a distinctive bit
//! pattern so stale references crash visibly on use. Stress mode forces a
//! collection on every allocation; heap-verify mode walks the reachable graph
//! before and after each collection.

use super::{contract, roots, GcRef, Sexp, SexpValue};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::mem;
use std::ptr;

pub const PAGE_SIZE: usize = 4096;
// Perf: tweak this number. The prelude's meaning trees stay live for the
// whole run, so the semispaces need headroom beyond the working set.
const NUMBER_OF_PAGES: usize = 64;

/// The cell stride. Every heap value occupies exactly one cell.
pub const CELL_SIZE: usize = mem::size_of::<Sexp>().next_power_of_two();

const _: () = assert!(
    PAGE_SIZE % CELL_SIZE == 0,
    "the cell stride must evenly divide a page"
);
const _: () = assert!(
    CELL_SIZE < PAGE_SIZE,
    "a cell must be smaller than a page"
);

#[cfg(debug_assertions)]
const POISON: u8 = 0xAB;

pub struct GcHeap {
    heap_start: *mut u8,
    heap_end: *mut u8,
    tospace: *mut u8,
    fromspace: *mut u8,
    /// Bump pointer into the tospace.
    free: *mut u8,
    /// End of the tospace.
    top: *mut u8,
    extent: usize,
    gc_number: usize,
    stress: bool,
    verify: bool,
    forwarding: HashMap<GcRef, GcRef>,
    worklist: Vec<GcRef>,
    finalize_queue: Vec<GcRef>,
}

thread_local! {
    static HEAP: RefCell<Option<GcHeap>> = const { RefCell::new(None) };
    static THE_EMPTY: Cell<GcRef> = const { Cell::new(ptr::null_mut()) };
}

/// Maps the heap and creates the empty-list singleton. Idempotent.
pub fn initialize(stress: bool, verify: bool) {
    HEAP.with(|heap| {
        let mut heap = heap.borrow_mut();
        if heap.is_none() {
            *heap = Some(GcHeap::new(stress, verify));
        }
    });
    THE_EMPTY.with(|singleton| {
        if singleton.get().is_null() {
            // the one possible empty value lives outside the managed heap
            singleton.set(Box::into_raw(Box::new(Sexp {
                value: SexpValue::Empty,
            })));
        }
    });
}

/// The empty-list singleton.
pub fn empty() -> GcRef {
    let singleton = THE_EMPTY.with(|singleton| singleton.get());
    assert!(!singleton.is_null(), "heap used before initialization");
    singleton
}

/// Allocates one cell, collecting first if the tospace is full (or always,
/// under stress). The caller must initialize the cell before the next
/// allocation point. Exhaustion of both semispaces is fatal.
pub fn allocate(needs_finalize: bool) -> GcRef {
    contract::performs_gc();
    with_heap(|heap| heap.allocate(needs_finalize))
}

/// Forces a collection.
pub fn force_collect() {
    with_heap(|heap| heap.collect());
}

pub fn gc_count() -> usize {
    with_heap(|heap| heap.gc_number)
}

pub fn finalize_queue_len() -> usize {
    with_heap(|heap| heap.finalize_queue.len())
}

pub fn live_cells() -> usize {
    with_heap(|heap| (heap.free as usize - heap.tospace as usize) / CELL_SIZE)
}

fn with_heap<T>(f: impl FnOnce(&mut GcHeap) -> T) -> T {
    HEAP.with(|heap| {
        let mut heap = heap.borrow_mut();
        f(heap.as_mut().expect("heap used before initialization"))
    })
}

impl GcHeap {
    fn new(stress: bool, verify: bool) -> GcHeap {
        let heap_start = unsafe { alloc_zeroed(heap_layout()) };
        if heap_start.is_null() {
            panic!("failed to allocate heap");
        }
        let heap_end = unsafe { heap_start.add(PAGE_SIZE * NUMBER_OF_PAGES) };
        let extent = (PAGE_SIZE * NUMBER_OF_PAGES) / 2;
        let tospace = heap_start;
        let fromspace = unsafe { heap_start.add(extent) };
        assert!(heap_start < heap_end);
        GcHeap {
            heap_start,
            heap_end,
            tospace,
            fromspace,
            free: tospace,
            top: fromspace,
            extent,
            gc_number: 0,
            stress,
            verify,
            forwarding: HashMap::new(),
            worklist: Vec::new(),
            finalize_queue: Vec::new(),
        }
    }

    fn allocate(&mut self, needs_finalize: bool) -> GcRef {
        let mut result = self.free;
        let mut bump = unsafe { result.add(CELL_SIZE) };
        if self.stress || bump > self.top {
            tracing::trace!("bump pointer allocation failed, triggering a collection");
            self.collect();

            result = self.free;
            bump = unsafe { result.add(CELL_SIZE) };
            if bump > self.top {
                panic!("out of memory: both semispaces exhausted");
            }
        }

        self.free = bump;
        unsafe {
            ptr::write_bytes(result, 0, CELL_SIZE);
        }

        let cell = result as GcRef;
        if needs_finalize {
            self.finalize_queue.push(cell);
        }
        cell
    }

    fn collect(&mut self) {
        if self.verify {
            self.verify_heap();
        }

        self.gc_number += 1;
        tracing::debug!(gc = self.gc_number, "beginning a collection");
        debug_assert!(self.forwarding.is_empty());
        debug_assert!(self.worklist.is_empty());

        // flip the semispaces; all live objects relocate to the new tospace
        self.flip();

        // all roots are known live; process them first
        roots::scan_roots(|slot| self.process(slot));

        // drain the worklist: each entry has been relocated, its transitive
        // closure has not
        while let Some(cell) = self.worklist.pop() {
            unsafe {
                super::trace(cell, &mut |slot| self.process(slot));
            }
        }

        // finalization pass: an entry with no forwarding address did not
        // relocate, so it is dead and its fromspace pointer is still usable
        let queue = mem::take(&mut self.finalize_queue);
        for cell in queue {
            let forwarded = self.forwarding.get(&cell).copied();
            match forwarded {
                None => {
                    tracing::trace!(gc = self.gc_number, "finalizing dead object {:p}", cell);
                    unsafe {
                        super::finalize(cell);
                    }
                }
                Some(forwarded) => self.finalize_queue.push(forwarded),
            }
        }

        self.forwarding.clear();
        self.worklist.clear();
        tracing::debug!(
            gc = self.gc_number,
            live = (self.free as usize - self.tospace as usize) / CELL_SIZE,
            "collection complete"
        );

        if self.verify {
            self.verify_heap();
        }
    }

    /// Updates a slot to refer to the tospace replica of its target.
    fn process(&mut self, slot: *mut GcRef) {
        unsafe {
            if slot.is_null() || (*slot).is_null() {
                // roots may be null: a collection can happen before a value
                // is assigned to a protected slot
                return;
            }
            let target = *slot;
            if target == empty() {
                // the empty list is not managed by the collector
                return;
            }
            if self.in_tospace(target) {
                // already relocated and updated; forwarding it again would
                // copy a live tospace cell to a garbage location
                return;
            }
            debug_assert!(self.in_heap(target), "pointer not in heap");
            *slot = self.forward(target);
        }
    }

    /// Returns the tospace address of an object, copying it on first sight.
    fn forward(&mut self, target: GcRef) -> GcRef {
        if let Some(&forwarded) = self.forwarding.get(&target) {
            return forwarded;
        }
        self.copy(target)
    }

    /// Copies one cell into the tospace and records its forwarding address.
    fn copy(&mut self, from: GcRef) -> GcRef {
        let to = self.free as GcRef;
        unsafe {
            self.free = self.free.add(CELL_SIZE);
            assert!(self.free <= self.top, "tospace exhausted during a collection");

            #[cfg(debug_assertions)]
            assert!(!is_poisoned(from), "relocating an invalid object");

            // guaranteed not to overlap: the copy never crosses the
            // fromspace/tospace boundary
            ptr::copy_nonoverlapping(from as *const u8, to as *mut u8, mem::size_of::<Sexp>());

            #[cfg(debug_assertions)]
            ptr::write_bytes(from as *mut u8, POISON, mem::size_of::<Sexp>());
        }
        tracing::trace!(gc = self.gc_number, "relocated {:p} -> {:p}", from, to);
        self.forwarding.insert(from, to);
        self.worklist.push(to);
        to
    }

    fn flip(&mut self) {
        mem::swap(&mut self.fromspace, &mut self.tospace);
        self.top = unsafe { self.tospace.add(self.extent) };
        self.free = self.tospace;
    }

    fn in_heap(&self, target: GcRef) -> bool {
        let p = target as usize;
        p >= self.heap_start as usize && p <= self.heap_end as usize
    }

    fn in_tospace(&self, target: GcRef) -> bool {
        let p = target as usize;
        p >= self.tospace as usize && p < self.free as usize
    }

    /// Walks the reachable graph from the roots and the finalization queue,
    /// checking that every pointer stays inside the heap and that none
    /// carries the relocation poison pattern.
    fn verify_heap(&mut self) {
        #[cfg(debug_assertions)]
        {
            tracing::debug!(gc = self.gc_number, "verifying heap");
            let mut stack: Vec<GcRef> = Vec::new();
            let mut visited: HashSet<GcRef> = HashSet::new();
            roots::scan_roots(|slot| unsafe {
                if slot.is_null() || (*slot).is_null() {
                    return;
                }
                let target = *slot;
                if target == empty() {
                    return;
                }
                stack.push(target);
            });
            stack.extend(self.finalize_queue.iter().copied());

            while let Some(target) = stack.pop() {
                if !visited.insert(target) {
                    continue;
                }
                assert!(self.in_heap(target), "heap verify: pointer not in heap");
                assert!(
                    !is_poisoned(target),
                    "heap verify: observed a pointer that has been relocated"
                );
                unsafe {
                    super::trace(target, &mut |slot| {
                        let child = *slot;
                        if child.is_null() || child == empty() {
                            return;
                        }
                        stack.push(child);
                    });
                }
            }
        }
    }
}

impl Drop for GcHeap {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.heap_start, heap_layout());
        }
    }
}

fn heap_layout() -> Layout {
    Layout::from_size_align(PAGE_SIZE * NUMBER_OF_PAGES, PAGE_SIZE)
        .expect("heap layout is valid")
}

#[cfg(debug_assertions)]
fn is_poisoned(target: GcRef) -> bool {
    unsafe { *(target as *const u64) == u64::from_ne_bytes([POISON; 8]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{self, roots::FrameGuard};
    use crate::runtime;
    use crate::{gc_local, gc_value};

    #[test]
    fn the_cell_stride_fits_the_value_union() {
        assert!(CELL_SIZE >= mem::size_of::<Sexp>());
        assert_eq!(PAGE_SIZE % CELL_SIZE, 0);
    }

    #[test]
    fn collection_preserves_rooted_structure() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, list);

        list = empty();
        for n in (0..32).rev() {
            list = gc::alloc_cons(gc::alloc_fixnum(n), list);
        }
        // drop some garbage between the live cells
        for _ in 0..64 {
            gc::alloc_fixnum(-1);
        }

        force_collect();

        let mut cursor = list;
        for n in 0..32 {
            assert!(matches!(
                gc_value!(gc::car(cursor)),
                SexpValue::Fixnum(m) if *m == n
            ));
            cursor = gc::cdr(cursor);
        }
        assert!(gc::is_empty(cursor));
    }

    #[test]
    fn collection_reclaims_garbage() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, keep);

        keep = gc::alloc_cons(gc::alloc_fixnum(1), empty());
        for _ in 0..128 {
            gc::alloc_fixnum(0);
        }
        force_collect();
        let live_after_first = live_cells();
        assert!(
            live_after_first < 130,
            "garbage should have been reclaimed, {} cells live",
            live_after_first
        );
        assert!(matches!(
            gc_value!(gc::car(keep)),
            SexpValue::Fixnum(1)
        ));
    }

    #[test]
    fn shared_structure_is_copied_once() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, shared, a, b);

        shared = gc::alloc_string("shared".to_string());
        a = gc::alloc_cons(shared, empty());
        b = gc::alloc_cons(shared, empty());

        force_collect();

        // both pairs must agree on the relocated cell
        assert_eq!(gc::car(a), gc::car(b));
        assert!(matches!(
            gc_value!(gc::car(a)),
            SexpValue::Str(text) if text == "shared"
        ));
    }

    #[test]
    fn finalization_is_exact_across_collections() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, keep);

        keep = gc::alloc_string("keep".to_string());
        for n in 0..10 {
            gc::alloc_string(format!("garbage-{}", n));
        }
        assert_eq!(finalize_queue_len(), 11);

        force_collect();
        assert_eq!(finalize_queue_len(), 1, "only the rooted string survives");

        // the surviving entry was rewritten to the relocated cell
        force_collect();
        assert_eq!(finalize_queue_len(), 1);
        assert!(matches!(
            gc_value!(keep),
            SexpValue::Str(text) if text == "keep"
        ));
    }

    #[test]
    fn stress_mode_collects_on_every_allocation() {
        runtime::initialize(true, true);
        let frame = FrameGuard::new("test");
        gc_local!(frame, list);

        let before = gc_count();
        list = empty();
        for n in (0..8).rev() {
            list = gc::alloc_cons(gc::alloc_fixnum(n), list);
        }
        assert!(gc_count() >= before + 16);

        let mut cursor = list;
        for n in 0..8 {
            assert!(matches!(
                gc_value!(gc::car(cursor)),
                SexpValue::Fixnum(m) if *m == n
            ));
            cursor = gc::cdr(cursor);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    fn relocated_cells_are_poisoned() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, value);

        value = gc::alloc_fixnum(7);
        let stale = value;
        force_collect();
        assert_ne!(stale, value);
        assert!(is_poisoned(stale));
        assert!(!is_poisoned(value));
    }
}
