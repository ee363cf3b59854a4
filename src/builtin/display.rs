//! Output primitives.

use crate::error::JetResult;
use crate::gc::{self, contract, GcRef, SexpValue};
use crate::gc_value;
use crate::printer::print_value;
use std::io::Write;

// Strings print without their quotes through print/println; everything else
// renders as the reader would accept it.
fn write_unquoted(value: GcRef) {
    match gc_value!(value) {
        SexpValue::Str(text) => print!("{}", text),
        _ => print!("{}", print_value(value)),
    }
}

pub fn print(args: &[GcRef]) -> JetResult<GcRef> {
    let contract = contract::enter("print");
    contract.forbid_gc();

    write_unquoted(args[0]);
    std::io::stdout().flush().ok();
    Ok(gc::empty())
}

pub fn println(args: &[GcRef]) -> JetResult<GcRef> {
    let contract = contract::enter("println");
    contract.forbid_gc();

    write_unquoted(args[0]);
    println!();
    std::io::stdout().flush().ok();
    Ok(gc::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::roots::FrameGuard;
    use crate::gc_local;
    use crate::runtime;

    #[test]
    fn print_returns_the_empty_list() {
        runtime::initialize(false, false);
        let frame = FrameGuard::new("test");
        gc_local!(frame, value);

        value = gc::alloc_string("hello".to_string());
        assert!(gc::is_empty(print(&[value]).unwrap()));
        assert!(gc::is_empty(println(&[value]).unwrap()));
    }
}
