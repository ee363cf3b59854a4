//! Type and equality predicates.

use crate::error::JetResult;
use crate::gc::{self, GcRef};

pub fn is_eof_object(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_bool(gc::is_eof(args[0])))
}

pub fn is_empty(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_bool(gc::is_empty(args[0])))
}

pub fn is_pair(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_bool(gc::is_cons(args[0])))
}

pub fn not(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_bool(!gc::is_truthy(args[0])))
}

pub fn eq(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_bool(gc::eq(args[0], args[1])))
}

pub fn equal(args: &[GcRef]) -> JetResult<GcRef> {
    Ok(gc::alloc_bool(gc::equal(args[0], args[1])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::roots::FrameGuard;
    use crate::gc::SexpValue;
    use crate::gc_local;
    use crate::gc_value;
    use crate::runtime;

    fn is_true(value: GcRef) -> bool {
        matches!(gc_value!(value), SexpValue::Bool(true))
    }

    #[test]
    fn type_predicates() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, value);

        value = gc::alloc_eof();
        assert!(is_true(is_eof_object(&[value]).unwrap()));
        assert!(is_true(is_empty(&[gc::empty()]).unwrap()));
        value = gc::alloc_cons(gc::empty(), gc::empty());
        assert!(is_true(is_pair(&[value]).unwrap()));
        value = gc::alloc_fixnum(0);
        assert!(!is_true(is_pair(&[value]).unwrap()));
    }

    #[test]
    fn not_inverts_truthiness() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, value);

        value = gc::alloc_bool(false);
        assert!(is_true(not(&[value]).unwrap()));
        // () is truthy, so (not ()) is #f
        assert!(!is_true(not(&[gc::empty()]).unwrap()));
    }
}
