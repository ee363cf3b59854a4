//! Privileged builtins: `read`, `eval` and `error`.

use crate::analysis;
use crate::env;
use crate::error::{Error, JetResult};
use crate::gc::{self, roots, roots::FrameGuard, GcRef, SexpValue};
use crate::gc_local;
use crate::gc_value;
use crate::meaning;
use crate::parser;
use crate::printer::print_value;

/// Reads one s-expression from standard input. Returns the EOF object at
/// end of input.
pub fn read(_args: &[GcRef]) -> JetResult<GcRef> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    parser::parse(&mut input)
}

/// Analyzes and evaluates a value as a program form. The form runs in a
/// fresh activation extending the global one, with a matching scratch scope
/// in the analysis environment so the coordinates line up.
pub fn eval(args: &[GcRef]) -> JetResult<GcRef> {
    let frame = FrameGuard::new("eval");
    gc_local!(frame, form, analyzed, activation);
    form = args[0];

    env::enter_scope();
    let analysis_result = analysis::analyze(form);
    env::exit_scope();
    analyzed = analysis_result?;

    activation = gc::alloc_activation(roots::global_activation());
    meaning::evaluate(analyzed, activation)
}

/// Raises a runtime error carrying the rendered argument.
pub fn error(args: &[GcRef]) -> JetResult<GcRef> {
    let message = match gc_value!(args[0]) {
        SexpValue::Str(text) => text.clone(),
        _ => print_value(args[0]),
    };
    Err(Error::runtime(message))
}
