//! A limited contract system for asserting VM invariants.
//!
//! The collector requires that, when a collection occurs, every native frame
//! between the allocation site and the interpreter protects its managed
//! pointers. A function may omit protection only if it is certain that
//! neither it nor any callee can trigger a collection. That is hard to
//! reason about, so this module lets such functions assert it: a frame marked
//! `forbid_gc` causes a panic if any allocation happens beneath it.
//!
//! Everything here compiles to no-ops in release builds.

#[cfg(debug_assertions)]
mod imp {
    use std::cell::Cell;
    use std::ptr;

    pub struct ContractFrame {
        pub no_gc: bool,
        pub function: &'static str,
        pub parent: *mut ContractFrame,
    }

    thread_local! {
        pub static CURRENT: Cell<*mut ContractFrame> = const { Cell::new(ptr::null_mut()) };
    }
}

pub struct ContractGuard {
    #[cfg(debug_assertions)]
    frame: *mut imp::ContractFrame,
}

/// Installs the sentinel contract frame. Idempotent.
pub fn initialize() {
    #[cfg(debug_assertions)]
    imp::CURRENT.with(|current| {
        if current.get().is_null() {
            current.set(Box::into_raw(Box::new(imp::ContractFrame {
                no_gc: false,
                function: "<toplevel>",
                parent: std::ptr::null_mut(),
            })));
        }
    });
}

/// Opens a contract frame for the current function.
#[cfg(debug_assertions)]
pub fn enter(function: &'static str) -> ContractGuard {
    let parent = imp::CURRENT.with(|current| current.get());
    assert!(
        !parent.is_null(),
        "contract frames used before initialization"
    );
    let frame = Box::into_raw(Box::new(imp::ContractFrame {
        no_gc: false,
        function,
        parent,
    }));
    imp::CURRENT.with(|current| current.set(frame));
    ContractGuard { frame }
}

/// Opens a contract frame for the current function.
#[cfg(not(debug_assertions))]
pub fn enter(_function: &'static str) -> ContractGuard {
    ContractGuard {}
}

impl ContractGuard {
    /// Asserts that no collection can occur while this frame is live.
    pub fn forbid_gc(&self) {
        #[cfg(debug_assertions)]
        unsafe {
            (*self.frame).no_gc = true;
        }
    }

    /// Records a named precondition check.
    pub fn precondition(&self, expr: bool, stringified: &str) {
        #[cfg(debug_assertions)]
        if !expr {
            let function = unsafe { (*self.frame).function };
            panic!("precondition failed in {}: {}", function, stringified);
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = (expr, stringified);
        }
    }
}

impl Drop for ContractGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        imp::CURRENT.with(|current| {
            assert!(
                current.get() == self.frame,
                "contract frames popped out of order"
            );
            current.set(unsafe { (*self.frame).parent });
            drop(unsafe { Box::from_raw(self.frame) });
        });
    }
}

/// Signalled by every allocation site. Walks the contract chain and panics
/// if any enclosing frame asserted that no collection can happen.
pub fn performs_gc() {
    #[cfg(debug_assertions)]
    {
        let mut frame = imp::CURRENT.with(|current| current.get());
        while !frame.is_null() {
            unsafe {
                if (*frame).no_gc {
                    panic!(
                        "allocation inside a NoGc contract asserted by {}",
                        (*frame).function
                    );
                }
                frame = (*frame).parent;
            }
        }
    }
}
