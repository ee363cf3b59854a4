//! Builtin procedure registration.
//!
//! Builtins are native functions installed into the global activation under
//! their surface names. Each is registered with a declared arity; the
//! evaluator enforces it before the call, so the bodies index their argument
//! buffer without checking.

pub mod display;
pub mod list;
pub mod number;
pub mod predicate;
pub mod sys;

use crate::env;
use crate::error::JetResult;
use crate::gc::{self, roots::FrameGuard, GcRef, NativeFunction};
use crate::interner;
use crate::{gc_local, gc_protect};

macro_rules! register_builtin_family {
    ($act:expr, $($name:expr => ($arity:expr, $func:expr)),* $(,)?) => {
        $( load_single_builtin($act, $name, $arity, $func); )*
    };
}

fn load_single_builtin(
    mut activation: GcRef,
    name: &'static str,
    arity: usize,
    func: fn(&[GcRef]) -> JetResult<GcRef>,
) {
    let frame = FrameGuard::new("load_single_builtin");
    gc_protect!(frame, activation);
    gc_local!(frame, wrapped);

    wrapped = gc::alloc_native(NativeFunction { name, arity, func });
    let (up, right) = env::define_global(interner::intern(name));
    unsafe {
        (*gc::activation_record(activation))
            .set(up, right, wrapped)
            .expect("builtin registration never stores an activation");
    }
}

/// Installs the full builtin set into the given (global) activation.
pub fn load_builtins(mut activation: GcRef) {
    // registration allocates, so the activation cell can move between entries
    let frame = FrameGuard::new("load_builtins");
    gc_protect!(frame, activation);
    register_builtin_family!(activation,
        "+" => (2, number::add),
        "-" => (2, number::sub),
        "*" => (2, number::mul),
        "/" => (2, number::div),
        "car" => (1, list::car),
        "cdr" => (1, list::cdr),
        "cons" => (2, list::cons),
        "set-car!" => (2, list::set_car),
        "set-cdr!" => (2, list::set_cdr),
        "read" => (0, sys::read),
        "eval" => (1, sys::eval),
        "error" => (1, sys::error),
        "print" => (1, display::print),
        "println" => (1, display::println),
        "eof-object?" => (1, predicate::is_eof_object),
        "empty?" => (1, predicate::is_empty),
        "pair?" => (1, predicate::is_pair),
        "not" => (1, predicate::not),
        "eq?" => (2, predicate::eq),
        "equal?" => (2, predicate::equal),
    );
}
