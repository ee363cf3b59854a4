//! Value display.
//!
//! Renders a value the way the reader would accept it back where possible:
//! atoms print bare, proper lists with spaces, improper tails after a dot.
//! Opaque values (functions, activations, meanings) print as `#<...>`.

use crate::gc::{GcRef, SexpValue};
use crate::gc_value;
use crate::interner;

pub fn print_value(obj: GcRef) -> String {
    match gc_value!(obj) {
        SexpValue::Cons(_, _) => {
            let mut out = String::from("(");
            let mut first = true;
            let mut current = obj;
            loop {
                match gc_value!(current) {
                    SexpValue::Cons(car, cdr) => {
                        if !first {
                            out.push(' ');
                        }
                        out.push_str(&print_value(*car));
                        current = *cdr;
                        first = false;
                    }
                    SexpValue::Empty => {
                        out.push(')');
                        break;
                    }
                    _ => {
                        out.push_str(" . ");
                        out.push_str(&print_value(current));
                        out.push(')');
                        break;
                    }
                }
            }
            out
        }
        SexpValue::Symbol(id) => interner::name_of(*id),
        SexpValue::Str(text) => format!("\"{}\"", text),
        SexpValue::Fixnum(n) => n.to_string(),
        SexpValue::Bool(true) => "#t".to_string(),
        SexpValue::Bool(false) => "#f".to_string(),
        SexpValue::Eof => "#eof".to_string(),
        SexpValue::Empty => "()".to_string(),
        SexpValue::Activation(_) => "#<activation>".to_string(),
        SexpValue::Function { .. } => "#<function>".to_string(),
        SexpValue::Native(_) => "#<native function>".to_string(),
        SexpValue::Meaning(_) => "#<meaning>".to_string(),
    }
}
