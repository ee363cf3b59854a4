//! Fixnum arithmetic.

use crate::error::{Error, JetResult};
use crate::gc::{self, GcRef, SexpValue};
use crate::gc_value;

fn fixnum(value: GcRef, who: &str) -> JetResult<i64> {
    match gc_value!(value) {
        SexpValue::Fixnum(n) => Ok(*n),
        _ => Err(Error::runtime(format!("{}: type error: not a fixnum", who))),
    }
}

pub fn add(args: &[GcRef]) -> JetResult<GcRef> {
    let (a, b) = (fixnum(args[0], "+")?, fixnum(args[1], "+")?);
    Ok(gc::alloc_fixnum(a.wrapping_add(b)))
}

pub fn sub(args: &[GcRef]) -> JetResult<GcRef> {
    let (a, b) = (fixnum(args[0], "-")?, fixnum(args[1], "-")?);
    Ok(gc::alloc_fixnum(a.wrapping_sub(b)))
}

pub fn mul(args: &[GcRef]) -> JetResult<GcRef> {
    let (a, b) = (fixnum(args[0], "*")?, fixnum(args[1], "*")?);
    Ok(gc::alloc_fixnum(a.wrapping_mul(b)))
}

pub fn div(args: &[GcRef]) -> JetResult<GcRef> {
    let (a, b) = (fixnum(args[0], "/")?, fixnum(args[1], "/")?);
    if b == 0 {
        return Err(Error::runtime("divided by zero"));
    }
    Ok(gc::alloc_fixnum(a.wrapping_div(b)))
}
