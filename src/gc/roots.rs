//! The root protection protocol.
//!
//! When execution crosses into native code, the collector has no way to find
//! the managed pointers held in native stack frames, so every routine that
//! may allocate must report them. A `FrameGuard` pushes a frame onto a
//! thread-local chain on construction and pops it when dropped, on every exit
//! path. Within a frame, callers register the *address* of a stack-local
//! `GcRef` (or of a growable `Vec<GcRef>`); during a collection the frames
//! are scanned precisely and every registered slot is relocated in place.
//!
//! Registering a slot before storing into it is safe: null slots are skipped
//! during tracing. Registering a slot after an allocation that could have
//! moved its value is a bug waiting to happen.

use crate::gc::GcRef;
use std::cell::Cell;
use std::ptr;

pub struct Frame {
    name: &'static str,
    slots: Vec<(*mut GcRef, &'static str)>,
    vecs: Vec<(*mut Vec<GcRef>, &'static str)>,
    parent: *mut Frame,
}

thread_local! {
    static CURRENT_FRAME: Cell<*mut Frame> = const { Cell::new(ptr::null_mut()) };
    static GLOBAL_ACTIVATION_SLOT: Cell<*mut GcRef> = const { Cell::new(ptr::null_mut()) };
}

/// Installs the sentinel frame. Idempotent; must run before any `FrameGuard`
/// is constructed.
pub fn initialize() {
    CURRENT_FRAME.with(|current| {
        if !current.get().is_null() {
            return;
        }
        let sentinel = Box::into_raw(Box::new(Frame {
            name: "<toplevel>",
            slots: Vec::new(),
            vecs: Vec::new(),
            parent: ptr::null_mut(),
        }));
        // the sentinel carries one permanent slot: the global activation,
        // which eval and macro expansion reach across collections
        let slot: *mut GcRef = Box::into_raw(Box::new(ptr::null_mut()));
        unsafe {
            (*sentinel).slots.push((slot, "global activation"));
        }
        current.set(sentinel);
        GLOBAL_ACTIVATION_SLOT.with(|global| global.set(slot));
    });
}

pub fn set_global_activation(activation: GcRef) {
    GLOBAL_ACTIVATION_SLOT.with(|global| {
        let slot = global.get();
        assert!(!slot.is_null(), "root frames used before initialization");
        unsafe { *slot = activation };
    });
}

pub fn global_activation() -> GcRef {
    GLOBAL_ACTIVATION_SLOT.with(|global| {
        let slot = global.get();
        assert!(!slot.is_null(), "root frames used before initialization");
        unsafe { *slot }
    })
}

/// A scoped handle to a root frame. Lives on the native stack of the
/// function it protects; the frame is removed when the guard drops.
pub struct FrameGuard {
    frame: *mut Frame,
}

impl FrameGuard {
    pub fn new(name: &'static str) -> FrameGuard {
        let parent = CURRENT_FRAME.with(|current| current.get());
        assert!(!parent.is_null(), "root frames used before initialization");
        let frame = Box::into_raw(Box::new(Frame {
            name,
            slots: Vec::new(),
            vecs: Vec::new(),
            parent,
        }));
        CURRENT_FRAME.with(|current| current.set(frame));
        FrameGuard { frame }
    }

    /// Registers the address of a stack-local `GcRef`. The registration
    /// lives until the guard drops.
    pub fn protect(&self, slot: *mut GcRef, name: &'static str) {
        unsafe {
            (*self.frame).slots.push((slot, name));
        }
    }

    /// Registers a growable sequence of `GcRef`s; the collector iterates its
    /// current elements at scan time.
    pub fn protect_vec(&self, vec: *mut Vec<GcRef>, name: &'static str) {
        unsafe {
            (*self.frame).vecs.push((vec, name));
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        CURRENT_FRAME.with(|current| {
            assert!(
                current.get() == self.frame,
                "root frames popped out of order"
            );
            current.set(unsafe { (*self.frame).parent });
        });
        drop(unsafe { Box::from_raw(self.frame) });
    }
}

/// Applies `f` to every registered root slot, innermost frame first.
pub fn scan_roots(mut f: impl FnMut(*mut GcRef)) {
    let mut frame = CURRENT_FRAME.with(|current| current.get());
    while !frame.is_null() {
        unsafe {
            tracing::trace!("scanning roots for frame '{}'", (*frame).name);
            for &(slot, _name) in &(*frame).slots {
                f(slot);
            }
            for &(vec, _name) in &(*frame).vecs {
                for slot in (*vec).iter_mut() {
                    f(slot as *mut GcRef);
                }
            }
            frame = (*frame).parent;
        }
    }
}

/// Registers lvalues in the given frame. The values MUST be locals: the
/// collector relocates pointers through their recorded addresses.
#[macro_export]
macro_rules! gc_protect {
    ($frame:expr, $($var:ident),+ $(,)?) => {
        $( $frame.protect(core::ptr::addr_of_mut!($var), stringify!($var)); )+
    };
}

/// Declares protected locals initialized to null. Automatically relocated
/// upon a collection.
#[macro_export]
macro_rules! gc_local {
    ($frame:expr, $($var:ident),+ $(,)?) => {
        $(
            let mut $var: $crate::gc::GcRef = core::ptr::null_mut();
            $frame.protect(core::ptr::addr_of_mut!($var), stringify!($var));
        )+
    };
}

/// Declares a protected growable sequence of values.
#[macro_export]
macro_rules! gc_local_vec {
    ($frame:expr, $var:ident) => {
        let mut $var: Vec<$crate::gc::GcRef> = Vec::new();
        $frame.protect_vec(core::ptr::addr_of_mut!($var), stringify!($var));
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{self, heap, SexpValue};
    use crate::runtime;
    use crate::{gc_local, gc_local_vec};

    #[test]
    fn protected_locals_are_relocated() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, value);
        value = gc::alloc_fixnum(42);
        let before = value;
        heap::force_collect();
        assert_ne!(before, value, "the cell should have moved");
        assert!(matches!(crate::gc_value!(value), SexpValue::Fixnum(42)));
    }

    #[test]
    fn protected_vecs_are_relocated() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local_vec!(frame, values);
        for n in 0..8 {
            values.push(gc::alloc_fixnum(n));
        }
        heap::force_collect();
        for (n, &value) in values.iter().enumerate() {
            assert!(matches!(
                crate::gc_value!(value),
                SexpValue::Fixnum(m) if *m == n as i64
            ));
        }
    }

    #[test]
    fn unprotected_values_die() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, keep);
        keep = gc::alloc_string("keep".to_string());
        gc::alloc_string("garbage".to_string());
        let queued = heap::finalize_queue_len();
        heap::force_collect();
        assert_eq!(heap::finalize_queue_len(), queued - 1);
        assert!(matches!(
            crate::gc_value!(keep),
            SexpValue::Str(text) if text == "keep"
        ));
    }

    #[test]
    fn frames_pop_on_scope_exit() {
        runtime::initialize(false, false);
        let depth_before = frame_depth();
        {
            let frame = FrameGuard::new("inner");
            gc_local!(frame, _unused);
            assert_eq!(frame_depth(), depth_before + 1);
        }
        assert_eq!(frame_depth(), depth_before);
    }

    fn frame_depth() -> usize {
        let mut depth = 0;
        let mut frame = CURRENT_FRAME.with(|current| current.get());
        while !frame.is_null() {
            depth += 1;
            frame = unsafe { (*frame).parent };
        }
        depth
    }
}
