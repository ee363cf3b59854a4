//! Runtime variable storage.
//!
//! An activation is the variable store for one scope: a dense vector of
//! slots plus a link to the enclosing scope. A new activation is introduced
//! for every function call. Variable positions are the `(up, right)`
//! coordinates produced by semantic analysis: walk `up` parent links, then
//! index slot `right`.

use crate::error::{Error, JetResult};
use crate::gc::{self, contract, GcRef, SexpValue};
use crate::gc_value;
use std::ptr;

pub struct Activation {
    /// The enclosing scope: an Activation cell, or null for the global scope.
    parent: GcRef,
    /// Dense variable slots; null entries are uninitialized.
    slots: Vec<GcRef>,
}

impl Activation {
    pub fn new(parent: GcRef) -> Activation {
        Activation {
            parent,
            slots: Vec::new(),
        }
    }

    /// Reads the slot at the given coordinates.
    ///
    /// Bad `up` coordinates are an analysis bug and panic. An unset or
    /// out-of-range slot is a runtime error: the global activation permits
    /// slots that were assigned in the analysis environment but never
    /// defined by evaluated code.
    pub fn get(&self, up: usize, right: usize) -> JetResult<GcRef> {
        let contract = contract::enter("Activation::get");
        contract.forbid_gc();

        let mut cursor: *const Activation = self;
        unsafe {
            for _ in 0..up {
                cursor = (*cursor).parent_record();
            }
            match (&(*cursor).slots).get(right) {
                Some(&slot) if !slot.is_null() => Ok(slot),
                _ => Err(Error::runtime("use of an uninitialized variable")),
            }
        }
    }

    /// Stores into the slot at the given coordinates, growing the slot
    /// vector with uninitialized entries as needed.
    pub fn set(&mut self, up: usize, right: usize, value: GcRef) -> JetResult<()> {
        let contract = contract::enter("Activation::set");
        contract.forbid_gc();

        if gc::is_activation(value) {
            return Err(Error::runtime("cannot store an activation in a variable"));
        }

        let mut cursor: *mut Activation = self;
        unsafe {
            for _ in 0..up {
                cursor = (*cursor).parent_record();
            }
            while (*cursor).slots.len() <= right {
                (*cursor).slots.push(ptr::null_mut());
            }
            (&mut (*cursor).slots)[right] = value;
        }
        Ok(())
    }

    fn parent_record(&self) -> *mut Activation {
        assert!(
            !self.parent.is_null(),
            "activation walk went past the global scope"
        );
        match gc_value!(self.parent) {
            SexpValue::Activation(record) => *record,
            _ => panic!("activation parent is not an activation"),
        }
    }

    pub fn parent(&self) -> GcRef {
        self.parent
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Visits every slot address and the parent link. The parent cell is
    /// traced like any other value, so the whole chain relocates correctly.
    pub fn trace(&mut self, f: &mut dyn FnMut(*mut GcRef)) {
        for slot in self.slots.iter_mut() {
            f(slot);
        }
        f(&mut self.parent);
    }
}
