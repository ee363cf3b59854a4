//! Pair primitives.

use crate::error::{Error, JetResult};
use crate::gc::{self, GcRef, SexpValue};
use crate::gc_value;

pub fn car(args: &[GcRef]) -> JetResult<GcRef> {
    match gc_value!(args[0]) {
        SexpValue::Cons(car, _) => Ok(*car),
        _ => Err(Error::runtime("car: type error: not a pair")),
    }
}

pub fn cdr(args: &[GcRef]) -> JetResult<GcRef> {
    match gc_value!(args[0]) {
        SexpValue::Cons(_, cdr) => Ok(*cdr),
        _ => Err(Error::runtime("cdr: type error: not a pair")),
    }
}

pub fn cons(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_cons(args[0], args[1]))
}

pub fn set_car(args: &[GcRef]) -> JetResult<GcRef> {
    gc::set_car(args[0], args[1])?;
    Ok(gc::empty())
}

pub fn set_cdr(args: &[GcRef]) -> JetResult<GcRef> {
    gc::set_cdr(args[0], args[1])?;
    Ok(gc::empty())
}
