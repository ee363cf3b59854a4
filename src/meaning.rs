//! Analyzed meanings and their evaluation.
//!
//! A `Meaning` is the analyzed form of an s-expression; semantic analysis
//! produces meanings and the evaluator interprets them directly. Evaluating
//! a meaning yields a `Trampoline`: either a finished value or a thunk
//! naming the next meaning to run and the activation to run it in. The
//! `evaluate` loop bounces on thunks until a value appears, which is what
//! makes conditionals, sequences and user function calls proper tail calls
//! with no native stack growth.
//!
//! Meaning records live off-heap; the cells that carry them move during a
//! collection but the records themselves do not, so a record pointer can be
//! held across allocation points while its `GcRef` fields relocate in place.

use crate::error::{Error, JetResult};
use crate::gc::{self, contract, roots::FrameGuard, GcRef};
use crate::printer;
use crate::{gc_local, gc_local_vec, gc_protect};

pub enum Meaning {
    /// A quoted s-expression; returns itself when evaluated.
    Quoted { value: GcRef },
    /// A variable read at a lexical address.
    Reference { up: usize, right: usize },
    /// `define`: stores into the global scope.
    Definition { up: usize, right: usize, value: GcRef },
    /// `set!`: stores into an already-assigned slot.
    Set { up: usize, right: usize, value: GcRef },
    /// `if`; both branches are in tail position.
    Conditional {
        condition: GcRef,
        true_branch: GcRef,
        false_branch: GcRef,
    },
    /// `begin`: the body runs for effect, the final form in tail position.
    Sequence { body: Vec<GcRef>, final_form: GcRef },
    /// `lambda`; evaluation captures the current activation.
    Lambda {
        arity: usize,
        variadic: bool,
        body: GcRef,
    },
    /// A function call.
    Invocation { base: GcRef, arguments: Vec<GcRef> },
    And { arguments: Vec<GcRef> },
    Or { arguments: Vec<GcRef> },
}

impl Meaning {
    /// Visits the address of every managed pointer in this record.
    pub fn trace(&mut self, f: &mut dyn FnMut(*mut GcRef)) {
        match self {
            Meaning::Quoted { value } => f(value),
            Meaning::Reference { .. } => {}
            Meaning::Definition { value, .. } | Meaning::Set { value, .. } => f(value),
            Meaning::Conditional {
                condition,
                true_branch,
                false_branch,
            } => {
                f(condition);
                f(true_branch);
                f(false_branch);
            }
            Meaning::Sequence { body, final_form } => {
                for form in body.iter_mut() {
                    f(form);
                }
                f(final_form);
            }
            Meaning::Lambda { body, .. } => f(body),
            Meaning::Invocation { base, arguments } => {
                f(base);
                for argument in arguments.iter_mut() {
                    f(argument);
                }
            }
            Meaning::And { arguments } | Meaning::Or { arguments } => {
                for argument in arguments.iter_mut() {
                    f(argument);
                }
            }
        }
    }
}

/// The result of one evaluation step: a concrete value, or the next thing
/// to evaluate.
pub enum Trampoline {
    Value(GcRef),
    Thunk { activation: GcRef, meaning: GcRef },
}

/// Reads one field out of a meaning record. Fields are re-read through the
/// record pointer after every potential collection, because embedded
/// `GcRef`s are relocated in place.
macro_rules! meaning_field {
    ($record:expr, $pat:pat => $out:expr) => {
        unsafe {
            match &*$record {
                $pat => $out,
                _ => unreachable!("meaning variant changed underfoot"),
            }
        }
    };
}

/// The arity and variadic flag of a Lambda meaning cell.
pub fn lambda_info(lambda: GcRef) -> (usize, bool) {
    let record = gc::meaning_record(lambda);
    meaning_field!(record, Meaning::Lambda { arity, variadic, .. } => (*arity, *variadic))
}

/// The body cell of a Lambda meaning cell.
pub fn lambda_body(lambda: GcRef) -> GcRef {
    let record = gc::meaning_record(lambda);
    meaning_field!(record, Meaning::Lambda { body, .. } => *body)
}

/// Completely evaluates a meaning, bouncing on thunks until a value appears.
pub fn evaluate(mut meaning: GcRef, mut act: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("evaluate");
    gc_protect!(frame, meaning, act);

    loop {
        match eval_step(meaning, act)? {
            Trampoline::Value(value) => return Ok(value),
            Trampoline::Thunk {
                activation,
                meaning: next,
            } => {
                act = activation;
                meaning = next;
            }
        }
    }
}

fn eval_step(meaning: GcRef, act: GcRef) -> JetResult<Trampoline> {
    let record = gc::meaning_record(meaning);
    match unsafe { &*record } {
        Meaning::Quoted { value } => {
            let contract = contract::enter("Meaning::Quoted");
            contract.forbid_gc();
            Ok(Trampoline::Value(*value))
        }
        Meaning::Reference { up, right } => {
            let contract = contract::enter("Meaning::Reference");
            contract.forbid_gc();
            contract.precondition(gc::is_activation(act), "act is an activation");
            let value = unsafe { (*gc::activation_record(act)).get(*up, *right)? };
            Ok(Trampoline::Value(value))
        }
        Meaning::Definition { .. } | Meaning::Set { .. } => eval_store(record, act),
        Meaning::Conditional { .. } => eval_conditional(record, act),
        Meaning::Sequence { .. } => eval_sequence(record, act),
        Meaning::Lambda { .. } => {
            let frame = FrameGuard::new("Meaning::Lambda");
            let mut act = act;
            gc_protect!(frame, act);
            Ok(Trampoline::Value(gc::alloc_function(meaning, act)))
        }
        Meaning::Invocation { .. } => eval_invocation(record, act),
        Meaning::And { .. } => eval_short_circuit(record, act, true),
        Meaning::Or { .. } => eval_short_circuit(record, act, false),
    }
}

fn eval_store(record: *const Meaning, mut act: GcRef) -> JetResult<Trampoline> {
    let frame = FrameGuard::new("Meaning::Definition");
    gc_protect!(frame, act);
    gc_local!(frame, bound);

    let (up, right, value) = meaning_field!(
        record,
        Meaning::Definition { up, right, value } | Meaning::Set { up, right, value }
            => (*up, *right, *value)
    );
    bound = evaluate(value, act)?;
    unsafe {
        (*gc::activation_record(act)).set(up, right, bound)?;
    }
    Ok(Trampoline::Value(gc::empty()))
}

fn eval_conditional(record: *const Meaning, mut act: GcRef) -> JetResult<Trampoline> {
    let frame = FrameGuard::new("Meaning::Conditional");
    gc_protect!(frame, act);
    gc_local!(frame, tested);

    let condition = meaning_field!(record, Meaning::Conditional { condition, .. } => *condition);
    tested = evaluate(condition, act)?;
    let branch = if gc::is_truthy(tested) {
        meaning_field!(record, Meaning::Conditional { true_branch, .. } => *true_branch)
    } else {
        meaning_field!(record, Meaning::Conditional { false_branch, .. } => *false_branch)
    };
    // the branch is in tail position: hand back a thunk, not a nested call
    Ok(Trampoline::Thunk {
        activation: act,
        meaning: branch,
    })
}

fn eval_sequence(record: *const Meaning, mut act: GcRef) -> JetResult<Trampoline> {
    let frame = FrameGuard::new("Meaning::Sequence");
    gc_protect!(frame, act);

    let len = meaning_field!(record, Meaning::Sequence { body, .. } => body.len());
    for index in 0..len {
        let entry = meaning_field!(record, Meaning::Sequence { body, .. } => body[index]);
        evaluate(entry, act)?;
    }
    let final_form = meaning_field!(record, Meaning::Sequence { final_form, .. } => *final_form);
    Ok(Trampoline::Thunk {
        activation: act,
        meaning: final_form,
    })
}

fn eval_short_circuit(record: *const Meaning, mut act: GcRef, is_and: bool) -> JetResult<Trampoline> {
    let frame = FrameGuard::new("Meaning::And");
    gc_protect!(frame, act);
    gc_local!(frame, value);

    let len = meaning_field!(
        record,
        Meaning::And { arguments } | Meaning::Or { arguments } => arguments.len()
    );
    if len == 0 {
        return Ok(Trampoline::Value(gc::alloc_bool(is_and)));
    }
    for index in 0..len - 1 {
        let argument = meaning_field!(
            record,
            Meaning::And { arguments } | Meaning::Or { arguments } => arguments[index]
        );
        value = evaluate(argument, act)?;
        if gc::is_truthy(value) != is_and {
            return Ok(Trampoline::Value(value));
        }
    }
    let last = meaning_field!(
        record,
        Meaning::And { arguments } | Meaning::Or { arguments } => arguments[len - 1]
    );
    Ok(Trampoline::Thunk {
        activation: act,
        meaning: last,
    })
}

fn eval_invocation(record: *const Meaning, mut act: GcRef) -> JetResult<Trampoline> {
    let frame = FrameGuard::new("Meaning::Invocation");
    gc_protect!(frame, act);
    gc_local!(frame, callee, child, eval_arg, rest);

    let base = meaning_field!(record, Meaning::Invocation { base, .. } => *base);
    callee = evaluate(base, act)?;
    let argc = meaning_field!(record, Meaning::Invocation { arguments, .. } => arguments.len());

    if gc::is_function(callee) {
        // the lambda's record is stable even though its cell may move
        let lambda_record = gc::meaning_record(gc::function_lambda(callee));
        let (arity, variadic) =
            meaning_field!(lambda_record, Meaning::Lambda { arity, variadic, .. } => (*arity, *variadic));
        if argc != arity && !(variadic && argc > arity) {
            return Err(Error::runtime(format!(
                "arity mismatch: expected {}{} arguments, got {}",
                arity,
                if variadic { " or more" } else { "" },
                argc
            )));
        }

        // the child activation extends the activation captured by the
        // closure, not the caller's: that is lexical scope
        child = gc::alloc_activation(gc::function_activation(callee));
        for index in 0..arity {
            let argument =
                meaning_field!(record, Meaning::Invocation { arguments, .. } => arguments[index]);
            eval_arg = evaluate(argument, act)?;
            unsafe {
                (*gc::activation_record(child)).set(0, index, eval_arg)?;
            }
        }
        if variadic {
            // collect the extras reversed, then reverse in place
            rest = gc::empty();
            for index in arity..argc {
                let argument =
                    meaning_field!(record, Meaning::Invocation { arguments, .. } => arguments[index]);
                eval_arg = evaluate(argument, act)?;
                rest = gc::alloc_cons(eval_arg, rest);
            }
            rest = gc::reverse_in_place(rest);
            unsafe {
                (*gc::activation_record(child)).set(0, arity, rest)?;
            }
        }

        let body = meaning_field!(lambda_record, Meaning::Lambda { body, .. } => *body);
        // the thunk is what makes this a proper tail call
        return Ok(Trampoline::Thunk {
            activation: child,
            meaning: body,
        });
    }

    if gc::is_native(callee) {
        let native = gc::native_record(callee);
        let (name, native_arity, func) =
            unsafe { ((*native).name, (*native).arity, (*native).func) };
        if argc != native_arity {
            return Err(Error::runtime(format!(
                "{}: expected {} arguments, got {}",
                name, native_arity, argc
            )));
        }

        gc_local_vec!(frame, args);
        for index in 0..argc {
            let argument =
                meaning_field!(record, Meaning::Invocation { arguments, .. } => arguments[index]);
            eval_arg = evaluate(argument, act)?;
            args.push(eval_arg);
        }
        // native calls are not tail-called
        let result = func(&args)?;
        return Ok(Trampoline::Value(result));
    }

    Err(Error::runtime(format!(
        "called a non-callable value: {}",
        printer::print_value(callee)
    )))
}
