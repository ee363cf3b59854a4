//! Runtime value representation.
//!
//! Every value at runtime is a `Sexp` cell on the managed heap, addressed by
//! a raw `GcRef`. All cells share one allocation size so the heap can bump a
//! pointer uniformly; payloads that do not fit a cell (strings, activation
//! records, native callables, meanings) live off-heap and are owned by their
//! cell, released by the collector's finalizer pass.
//!
//! This module provides:
//! - The `Sexp`/`SexpValue` tagged union and the `gc_value!` accessor macros
//! - Predicates, accessors, list iteration and equality
//! - Tracing and finalization, as required by the collector
//! - Constructors that protect their managed arguments before allocating

pub mod contract;
pub mod heap;
pub mod roots;

use crate::activation::Activation;
use crate::error::{Error, JetResult};
use crate::meaning::Meaning;
use self::roots::FrameGuard;
use std::ptr;

pub use self::heap::empty;

// core types
pub type GcRef = *mut Sexp;

pub struct Sexp {
    pub value: SexpValue,
}

/// A native function, called with a buffer of already-evaluated arguments of
/// the declared arity. The record is owned by its cell and finalized when the
/// cell becomes unreachable.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[GcRef]) -> JetResult<GcRef>,
}

pub enum SexpValue {
    /// The empty list. A singleton that lives outside the managed heap.
    Empty,
    /// A pair; car and cdr are never null.
    Cons(GcRef, GcRef),
    /// An interned symbol id.
    Symbol(usize),
    /// An owned byte sequence.
    Str(String),
    /// A fixed-width signed integer.
    Fixnum(i64),
    Bool(bool),
    Eof,
    /// A runtime scope record, owned by this cell.
    Activation(*mut Activation),
    /// A user function: the cell of its Lambda meaning plus the activation
    /// captured where the lambda was evaluated.
    Function { lambda: GcRef, activation: GcRef },
    /// A native function record, owned by this cell.
    Native(*mut NativeFunction),
    /// An analyzed meaning. Not exposed to user code, but carried by a cell
    /// so the collector traces its children.
    Meaning(*mut Meaning),
}

#[macro_export]
macro_rules! gc_value {
    ($r:expr) => {{
        // SAFETY: caller must ensure $r is a valid GcRef pointing to live data
        unsafe { &(*$r).value }
    }};
}

#[macro_export]
macro_rules! gc_value_mut {
    ($r:expr) => {{
        // SAFETY: caller must ensure $r is a valid GcRef pointing to live data
        unsafe { &mut (*$r).value }
    }};
}

// ============================================================================
// PREDICATES
// ============================================================================

pub fn is_empty(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Empty)
}

pub fn is_cons(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Cons(_, _))
}

pub fn is_symbol(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Symbol(_))
}

pub fn is_string(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Str(_))
}

pub fn is_fixnum(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Fixnum(_))
}

pub fn is_bool(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Bool(_))
}

pub fn is_eof(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Eof)
}

pub fn is_activation(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Activation(_))
}

pub fn is_function(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Function { .. })
}

pub fn is_native(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Native(_))
}

pub fn is_meaning(r: GcRef) -> bool {
    matches!(gc_value!(r), SexpValue::Meaning(_))
}

/// True if this value evaluates to itself. Covers most primitives; the empty
/// list, pairs and symbols are the exceptions.
pub fn is_already_quoted(r: GcRef) -> bool {
    !(is_empty(r) || is_cons(r) || is_symbol(r))
}

/// True if this value is truthy as the condition of `if`. Only `#f` is
/// false; everything else, including `()`, is truthy.
pub fn is_truthy(r: GcRef) -> bool {
    !matches!(gc_value!(r), SexpValue::Bool(false))
}

// ============================================================================
// ACCESSORS
// ============================================================================

pub fn car(r: GcRef) -> GcRef {
    match gc_value!(r) {
        SexpValue::Cons(car, _) => *car,
        _ => panic!("car: not a pair"),
    }
}

pub fn cdr(r: GcRef) -> GcRef {
    match gc_value!(r) {
        SexpValue::Cons(_, cdr) => *cdr,
        _ => panic!("cdr: not a pair"),
    }
}

pub fn cadr(r: GcRef) -> GcRef {
    car(cdr(r))
}

pub fn caddr(r: GcRef) -> GcRef {
    car(cdr(cdr(r)))
}

pub fn symbol_id(r: GcRef) -> usize {
    match gc_value!(r) {
        SexpValue::Symbol(id) => *id,
        _ => panic!("symbol_id: not a symbol"),
    }
}

pub fn activation_record(r: GcRef) -> *mut Activation {
    match gc_value!(r) {
        SexpValue::Activation(record) => *record,
        _ => panic!("activation_record: not an activation"),
    }
}

pub fn meaning_record(r: GcRef) -> *mut Meaning {
    match gc_value!(r) {
        SexpValue::Meaning(record) => *record,
        _ => panic!("meaning_record: not a meaning"),
    }
}

pub fn native_record(r: GcRef) -> *mut NativeFunction {
    match gc_value!(r) {
        SexpValue::Native(record) => *record,
        _ => panic!("native_record: not a native function"),
    }
}

pub fn function_lambda(r: GcRef) -> GcRef {
    match gc_value!(r) {
        SexpValue::Function { lambda, .. } => *lambda,
        _ => panic!("function_lambda: not a function"),
    }
}

pub fn function_activation(r: GcRef) -> GcRef {
    match gc_value!(r) {
        SexpValue::Function { activation, .. } => *activation,
        _ => panic!("function_activation: not a function"),
    }
}

/// Reserved hook for a future generational collector. Stores need no
/// barrier under the semispace design.
#[inline]
pub fn write_barrier(_cell: GcRef, _value: GcRef) {}

pub fn set_car(pair: GcRef, value: GcRef) -> JetResult<()> {
    match gc_value_mut!(pair) {
        SexpValue::Cons(car, _) => {
            write_barrier(pair, value);
            *car = value;
            Ok(())
        }
        _ => Err(Error::runtime("set-car!: not a pair")),
    }
}

pub fn set_cdr(pair: GcRef, value: GcRef) -> JetResult<()> {
    match gc_value_mut!(pair) {
        SexpValue::Cons(_, cdr) => {
            write_barrier(pair, value);
            *cdr = value;
            Ok(())
        }
        _ => Err(Error::runtime("set-cdr!: not a pair")),
    }
}

// ============================================================================
// LISTS
// ============================================================================

/// Returns whether the value is a proper list and its length. A length of 0
/// with `false` means it is not a list at all; an improper list may report a
/// nonzero length.
pub fn length(r: GcRef) -> (bool, usize) {
    if !is_cons(r) {
        return (false, 0);
    }
    let mut cursor = r;
    let mut count = 0;
    loop {
        if is_empty(cursor) {
            break;
        }
        if !is_cons(cursor) {
            return (false, count);
        }
        count += 1;
        cursor = cdr(cursor);
    }
    (true, count)
}

pub fn is_proper_list(r: GcRef) -> bool {
    is_empty(r) || length(r).0
}

/// Iterates a proper list. The cursor is rooted because the callback may
/// allocate and trigger a collection.
pub fn for_each(list: GcRef, mut f: impl FnMut(GcRef) -> JetResult<()>) -> JetResult<()> {
    let frame = FrameGuard::new("for_each");
    crate::gc_local!(frame, cursor);
    cursor = list;
    while !is_empty(cursor) {
        f(car(cursor))?;
        cursor = cdr(cursor);
    }
    Ok(())
}

/// Reverses a proper list in place by rotating cdr pointers. Performs no
/// allocation.
pub fn reverse_in_place(list: GcRef) -> GcRef {
    let contract = contract::enter("reverse_in_place");
    contract.forbid_gc();

    let mut reversed = empty();
    let mut cursor = list;
    while is_cons(cursor) {
        let next = cdr(cursor);
        set_cdr(cursor, reversed).expect("reversing a non-pair");
        reversed = cursor;
        cursor = next;
    }
    reversed
}

// ============================================================================
// EQUALITY
// ============================================================================

/// Identity comparison. Symbols compare by interned id, fixnums and booleans
/// by value; everything else by cell identity. The empty list is a singleton,
/// so `()` is `eq` to `()`.
pub fn eq(a: GcRef, b: GcRef) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    match (gc_value!(a), gc_value!(b)) {
        (SexpValue::Symbol(x), SexpValue::Symbol(y)) => x == y,
        (SexpValue::Fixnum(x), SexpValue::Fixnum(y)) => x == y,
        (SexpValue::Bool(x), SexpValue::Bool(y)) => x == y,
        (SexpValue::Empty, SexpValue::Empty) => true,
        (SexpValue::Eof, SexpValue::Eof) => true,
        _ => false,
    }
}

/// Structural comparison: recursive on pairs, byte-for-byte on strings,
/// `eq` otherwise.
pub fn equal(a: GcRef, b: GcRef) -> bool {
    match (gc_value!(a), gc_value!(b)) {
        (SexpValue::Cons(a1, d1), SexpValue::Cons(a2, d2)) => {
            equal(*a1, *a2) && equal(*d1, *d2)
        }
        (SexpValue::Str(x), SexpValue::Str(y)) => x == y,
        _ => eq(a, b),
    }
}

// ============================================================================
// TRACING AND FINALIZATION
// ============================================================================

/// Applies `f` to the address of every managed pointer embedded in this cell.
///
/// # Safety
/// `r` must point to a live, initialized cell.
pub unsafe fn trace(r: GcRef, f: &mut dyn FnMut(*mut GcRef)) {
    match &mut (*r).value {
        SexpValue::Cons(car, cdr) => {
            f(car);
            f(cdr);
        }
        SexpValue::Function { lambda, activation } => {
            f(lambda);
            f(activation);
        }
        SexpValue::Activation(record) => (**record).trace(f),
        SexpValue::Meaning(record) => (**record).trace(f),
        _ => {}
    }
}

/// Releases the off-heap payload of a dead cell. Should only be called by
/// the collector's finalizer pass.
///
/// # Safety
/// `r` must point to a cell that was allocated with `needs_finalize` and is
/// no longer reachable.
pub unsafe fn finalize(r: GcRef) {
    match &mut (*r).value {
        SexpValue::Str(_) => ptr::drop_in_place(&mut (*r).value),
        SexpValue::Activation(record) => drop(Box::from_raw(*record)),
        SexpValue::Native(record) => drop(Box::from_raw(*record)),
        _ => panic!("finalized something that's not finalizable"),
    }
}

// ============================================================================
// CONSTRUCTORS
// ============================================================================

// Initialization happens right after the allocation, before the next
// allocation point, so a half-built cell is never traced.

pub fn alloc_cons(mut car: GcRef, mut cdr: GcRef) -> GcRef {
    let frame = FrameGuard::new("alloc_cons");
    crate::gc_protect!(frame, car, cdr);
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Cons(car, cdr));
    }
    cell
}

pub fn alloc_fixnum(n: i64) -> GcRef {
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Fixnum(n));
    }
    cell
}

pub fn alloc_symbol(id: usize) -> GcRef {
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Symbol(id));
    }
    cell
}

pub fn alloc_string(text: String) -> GcRef {
    let cell = heap::allocate(true);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Str(text));
    }
    cell
}

pub fn alloc_bool(b: bool) -> GcRef {
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Bool(b));
    }
    cell
}

pub fn alloc_eof() -> GcRef {
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Eof);
    }
    cell
}

/// Allocates an activation whose parent must be an Activation cell or null.
pub fn alloc_activation(mut parent: GcRef) -> GcRef {
    let frame = FrameGuard::new("alloc_activation");
    crate::gc_protect!(frame, parent);
    let cell = heap::allocate(true);
    let record = Box::into_raw(Box::new(Activation::new(parent)));
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Activation(record));
    }
    cell
}

/// Allocates a function closing over the given activation. `lambda` is the
/// cell of the Lambda meaning being evaluated.
pub fn alloc_function(mut lambda: GcRef, mut activation: GcRef) -> GcRef {
    let frame = FrameGuard::new("alloc_function");
    crate::gc_protect!(frame, lambda, activation);
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(
            &mut (*cell).value,
            SexpValue::Function { lambda, activation },
        );
    }
    cell
}

pub fn alloc_native(native: NativeFunction) -> GcRef {
    let cell = heap::allocate(true);
    let record = Box::into_raw(Box::new(native));
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Native(record));
    }
    cell
}

/// Allocates the cell carrying an analyzed meaning.
///
/// The record is built off-heap before the carrying cell exists, so its
/// embedded pointers are registered as roots first; otherwise this very
/// allocation could move children the new record is not yet traced through.
pub fn alloc_meaning(meaning: Box<Meaning>) -> GcRef {
    let frame = FrameGuard::new("alloc_meaning");
    let record = Box::into_raw(meaning);
    unsafe {
        (*record).trace(&mut |slot| frame.protect(slot, "meaning field"));
    }
    let cell = heap::allocate(false);
    unsafe {
        ptr::write(&mut (*cell).value, SexpValue::Meaning(record));
    }
    cell
}
