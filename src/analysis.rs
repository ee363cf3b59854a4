//! Semantic analysis.
//!
//! Turns an s-expression that is about to be executed into a `Meaning`,
//! eliminating variable references by translating them into `(up, right)`
//! coordinates against the analysis environment. Macro calls are expanded
//! here, eagerly, before any argument is evaluated.
//!
//! Collector discipline: a meaning record under construction embeds managed
//! pointers that nothing traces yet. Every handler therefore protects its
//! intermediates in a root frame and lets `alloc_meaning` pin the record's
//! own fields before the carrying cell is allocated.

use crate::env;
use crate::error::{Error, JetResult};
use crate::gc::{self, contract, roots, roots::FrameGuard, GcRef};
use crate::interner;
use crate::meaning::{self, Meaning};
use crate::{gc_local, gc_local_vec, gc_protect};

/// Analyzes one form, producing the cell of its meaning.
pub fn analyze(mut form: GcRef) -> JetResult<GcRef> {
    let contract = contract::enter("analyze");
    contract.precondition(!form.is_null(), "form is non-null");

    let frame = FrameGuard::new("analyze");
    gc_protect!(frame, form);

    if !gc::is_cons(form) {
        return analyze_atom(form);
    }

    let head = gc::car(form);
    if gc::is_symbol(head) {
        match gc::symbol_id(head) {
            interner::QUOTE => return analyze_quote(gc::cdr(form)),
            interner::BEGIN => return analyze_begin(gc::cdr(form)),
            interner::DEFINE => return analyze_define(gc::cdr(form), false),
            interner::DEFMACRO => return analyze_define(gc::cdr(form), true),
            interner::IF => return analyze_if(gc::cdr(form)),
            interner::LAMBDA => return analyze_lambda(gc::cdr(form)),
            interner::SET_BANG => return analyze_set(gc::cdr(form)),
            interner::QUASIQUOTE => return analyze_quasiquote(gc::cdr(form)),
            interner::LET => return analyze_let(gc::cdr(form)),
            interner::AND => return analyze_and_or(gc::cdr(form), true),
            interner::OR => return analyze_and_or(gc::cdr(form), false),
            _ => {}
        }
    }

    // anything else, including ((lambda (x) x) 1), is an invocation
    analyze_invocation(form)
}

fn analyze_atom(mut form: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_atom");
    gc_protect!(frame, form);

    if gc::is_already_quoted(form) {
        return Ok(gc::alloc_meaning(Box::new(Meaning::Quoted { value: form })));
    }
    if gc::is_symbol(form) {
        let (up, right) = env::get(gc::symbol_id(form));
        return Ok(gc::alloc_meaning(Box::new(Meaning::Reference { up, right })));
    }
    Err(Error::runtime("cannot evaluate the empty list"))
}

fn analyze_quote(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_quote");
    gc_protect!(frame, rest);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || len != 1 {
        return Err(Error::runtime("invalid quote form"));
    }
    Ok(gc::alloc_meaning(Box::new(Meaning::Quoted {
        value: gc::car(rest),
    })))
}

fn analyze_begin(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_begin");
    gc_protect!(frame, rest);
    gc_local_vec!(frame, body);

    if gc::is_empty(rest) || !gc::is_proper_list(rest) {
        return Err(Error::runtime("invalid begin form"));
    }
    gc::for_each(rest, |entry| {
        let analyzed = analyze(entry)?;
        body.push(analyzed);
        Ok(())
    })?;
    let final_form = body.pop().expect("begin body is non-empty");
    Ok(gc::alloc_meaning(Box::new(Meaning::Sequence {
        body,
        final_form,
    })))
}

fn analyze_define(mut rest: GcRef, is_macro: bool) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_define");
    gc_protect!(frame, rest);
    gc_local!(frame, binding);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || len < 2 {
        return Err(Error::runtime("invalid define form"));
    }
    let target = gc::car(rest);

    if gc::is_symbol(target) {
        if len != 2 {
            return Err(Error::runtime("invalid define form"));
        }
        let symbol = gc::symbol_id(target);
        // bind before analyzing the value so recursive definitions resolve
        let (up, right) = env::define_global(symbol);
        if is_macro {
            env::set_macro(symbol);
        }
        binding = analyze(gc::cadr(rest))?;
        return Ok(gc::alloc_meaning(Box::new(Meaning::Definition {
            up,
            right,
            value: binding,
        })));
    }

    if gc::is_cons(target) {
        // (define (name p ...) body ...) sugars to a lambda binding
        let name = gc::car(target);
        if !gc::is_symbol(name) {
            return Err(Error::runtime("invalid define form: name is not a symbol"));
        }
        let symbol = gc::symbol_id(name);
        let (up, right) = env::define_global(symbol);
        if is_macro {
            env::set_macro(symbol);
        }
        binding = analyze_lambda_parts(gc::cdr(target), gc::cdr(rest))?;
        return Ok(gc::alloc_meaning(Box::new(Meaning::Definition {
            up,
            right,
            value: binding,
        })));
    }

    Err(Error::runtime("invalid define form"))
}

fn analyze_if(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_if");
    gc_protect!(frame, rest);
    gc_local!(frame, condition, true_branch, false_branch);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || (len != 2 && len != 3) {
        return Err(Error::runtime("invalid if form"));
    }
    condition = analyze(gc::car(rest))?;
    true_branch = analyze(gc::cadr(rest))?;
    false_branch = if len == 3 {
        analyze(gc::caddr(rest))?
    } else {
        // a missing else branch evaluates to ()
        gc::alloc_meaning(Box::new(Meaning::Quoted { value: gc::empty() }))
    };
    Ok(gc::alloc_meaning(Box::new(Meaning::Conditional {
        condition,
        true_branch,
        false_branch,
    })))
}

fn analyze_lambda(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_lambda");
    gc_protect!(frame, rest);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || len < 2 {
        return Err(Error::runtime("invalid lambda form"));
    }
    analyze_lambda_parts(gc::car(rest), gc::cdr(rest))
}

/// Analyzes a parameter description plus body forms into a Lambda meaning.
/// Shared by `lambda`, the `define` sugar and `let`.
fn analyze_lambda_parts(mut params: GcRef, mut body_forms: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_lambda_parts");
    gc_protect!(frame, params, body_forms);

    // the parameter description does not have to be a list: a bare symbol
    // collects every argument, an improper tail collects the extras
    let (arity, variadic) = if gc::is_empty(params) {
        (0, false)
    } else if gc::is_symbol(params) {
        (0, true)
    } else if gc::is_cons(params) {
        let (proper, count) = gc::length(params);
        (count, !proper)
    } else {
        return Err(Error::runtime(
            "invalid lambda form: parameter description must be a list or a symbol",
        ));
    };

    env::enter_scope();
    let result = analyze_lambda_scope(params, body_forms, arity, variadic);
    env::exit_scope();
    result
}

fn analyze_lambda_scope(
    mut params: GcRef,
    mut body_forms: GcRef,
    arity: usize,
    variadic: bool,
) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_lambda_scope");
    gc_protect!(frame, params, body_forms);
    gc_local_vec!(frame, body);

    // parameters take the first slots in definition order; a trailing rest
    // parameter lands in the slot after the fixed ones
    let mut cursor = params;
    while gc::is_cons(cursor) {
        let param = gc::car(cursor);
        if !gc::is_symbol(param) {
            return Err(Error::runtime("invalid lambda form: parameter is not a symbol"));
        }
        env::define(gc::symbol_id(param));
        cursor = gc::cdr(cursor);
    }
    if !gc::is_empty(cursor) {
        if !gc::is_symbol(cursor) {
            return Err(Error::runtime("invalid lambda form: parameter is not a symbol"));
        }
        env::define(gc::symbol_id(cursor));
    }

    if gc::is_empty(body_forms) || !gc::is_proper_list(body_forms) {
        return Err(Error::runtime("invalid lambda form: missing body"));
    }
    gc::for_each(body_forms, |entry| {
        body.push(analyze(entry)?);
        Ok(())
    })?;
    let final_form = body.pop().expect("lambda body is non-empty");

    gc_local!(frame, sequence);
    sequence = gc::alloc_meaning(Box::new(Meaning::Sequence { body, final_form }));
    Ok(gc::alloc_meaning(Box::new(Meaning::Lambda {
        arity,
        variadic,
        body: sequence,
    })))
}

fn analyze_set(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_set");
    gc_protect!(frame, rest);
    gc_local!(frame, binding);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || len != 2 {
        return Err(Error::runtime("invalid set! form"));
    }
    if !gc::is_symbol(gc::car(rest)) {
        return Err(Error::runtime("invalid set! form"));
    }
    let (up, right) = env::get(gc::symbol_id(gc::car(rest)));
    binding = analyze(gc::cadr(rest))?;
    Ok(gc::alloc_meaning(Box::new(Meaning::Set {
        up,
        right,
        value: binding,
    })))
}

fn analyze_and_or(mut rest: GcRef, is_and: bool) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_and_or");
    gc_protect!(frame, rest);
    gc_local_vec!(frame, arguments);

    if !gc::is_proper_list(rest) {
        return Err(Error::runtime("invalid and/or form"));
    }
    gc::for_each(rest, |entry| {
        arguments.push(analyze(entry)?);
        Ok(())
    })?;
    let meaning = if is_and {
        Meaning::And { arguments }
    } else {
        Meaning::Or { arguments }
    };
    Ok(gc::alloc_meaning(Box::new(meaning)))
}

fn analyze_let(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_let");
    gc_protect!(frame, rest);
    gc_local!(frame, bindings, lambda);
    gc_local_vec!(frame, arguments);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || len < 2 {
        return Err(Error::runtime("invalid let form"));
    }
    bindings = gc::car(rest);
    if !gc::is_proper_list(bindings) {
        return Err(Error::runtime("invalid let form"));
    }

    // (let ((v e) ...) body ...) is ((lambda (v ...) body ...) e ...);
    // the init expressions are analyzed in the enclosing scope
    let mut vars: Vec<usize> = Vec::new();
    gc::for_each(bindings, |pair| {
        let (proper, n) = gc::length(pair);
        if !proper || n != 2 {
            return Err(Error::runtime("invalid let binding"));
        }
        let var = gc::car(pair);
        if !gc::is_symbol(var) {
            return Err(Error::runtime("invalid let binding: name is not a symbol"));
        }
        vars.push(gc::symbol_id(var));
        let analyzed = analyze(gc::cadr(pair))?;
        arguments.push(analyzed);
        Ok(())
    })?;

    env::enter_scope();
    let body_result = analyze_let_body(&vars, gc::cdr(rest));
    env::exit_scope();
    lambda = body_result?;

    Ok(gc::alloc_meaning(Box::new(Meaning::Invocation {
        base: lambda,
        arguments,
    })))
}

fn analyze_let_body(vars: &[usize], mut body_forms: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_let_body");
    gc_protect!(frame, body_forms);
    gc_local_vec!(frame, body);

    for &var in vars {
        env::define(var);
    }
    if gc::is_empty(body_forms) || !gc::is_proper_list(body_forms) {
        return Err(Error::runtime("invalid let form: missing body"));
    }
    gc::for_each(body_forms, |entry| {
        body.push(analyze(entry)?);
        Ok(())
    })?;
    let final_form = body.pop().expect("let body is non-empty");

    gc_local!(frame, sequence);
    sequence = gc::alloc_meaning(Box::new(Meaning::Sequence { body, final_form }));
    Ok(gc::alloc_meaning(Box::new(Meaning::Lambda {
        arity: vars.len(),
        variadic: false,
        body: sequence,
    })))
}

fn analyze_quasiquote(mut rest: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_quasiquote");
    gc_protect!(frame, rest);
    gc_local!(frame, expanded);

    let (is_proper, len) = gc::length(rest);
    if !is_proper || len != 1 {
        return Err(Error::runtime("invalid quasiquote form"));
    }
    expanded = quasi_expand(gc::car(rest))?;
    analyze(expanded)
}

/// Rewrites a quasiquoted template into cons/append calls, then hands the
/// result back to the analyzer. `(a ,b ,@c)` becomes
/// `(cons (quote a) (cons b c))` by way of append for the splice.
fn quasi_expand(mut form: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("quasi_expand");
    gc_protect!(frame, form);
    gc_local!(frame, part, rest_part);

    if !gc::is_cons(form) {
        return Ok(quote_form(form));
    }
    if head_symbol_is(form, interner::UNQUOTE) {
        let (is_proper, len) = gc::length(form);
        if !is_proper || len != 2 {
            return Err(Error::runtime("invalid unquote form"));
        }
        return Ok(gc::cadr(form));
    }

    let head = gc::car(form);
    if gc::is_cons(head) && head_symbol_is(head, interner::UNQUOTE_SPLICING) {
        let (is_proper, len) = gc::length(head);
        if !is_proper || len != 2 {
            return Err(Error::runtime("invalid unquote-splicing form"));
        }
        part = gc::cadr(head);
        rest_part = quasi_expand(gc::cdr(form))?;
        return Ok(call_form2(interner::APPEND, part, rest_part));
    }

    part = quasi_expand(head)?;
    rest_part = quasi_expand(gc::cdr(form))?;
    Ok(call_form2(interner::intern("cons"), part, rest_part))
}

fn head_symbol_is(form: GcRef, symbol: usize) -> bool {
    gc::is_cons(form) && gc::is_symbol(gc::car(form)) && gc::symbol_id(gc::car(form)) == symbol
}

/// Builds `(quote form)`.
fn quote_form(mut form: GcRef) -> GcRef {
    let frame = FrameGuard::new("quote_form");
    gc_protect!(frame, form);
    gc_local!(frame, quoted);

    quoted = gc::alloc_cons(form, gc::empty());
    let symbol = gc::alloc_symbol(interner::QUOTE);
    gc::alloc_cons(symbol, quoted)
}

/// Builds `(sym a b)`.
fn call_form2(symbol: usize, mut a: GcRef, mut b: GcRef) -> GcRef {
    let frame = FrameGuard::new("call_form2");
    gc_protect!(frame, a, b);
    gc_local!(frame, tail);

    tail = gc::alloc_cons(b, gc::empty());
    tail = gc::alloc_cons(a, tail);
    let symbol = gc::alloc_symbol(symbol);
    gc::alloc_cons(symbol, tail)
}

fn analyze_invocation(mut form: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("analyze_invocation");
    gc_protect!(frame, form);
    gc_local!(frame, base);
    gc_local_vec!(frame, arguments);

    if !gc::is_proper_list(form) {
        return Err(Error::runtime("invalid invocation"));
    }

    let head = gc::car(form);
    if gc::is_symbol(head) && env::is_macro(gc::symbol_id(head)) {
        return expand_macro(form);
    }

    base = analyze(head)?;
    gc::for_each(gc::cdr(form), |argument| {
        arguments.push(analyze(argument)?);
        Ok(())
    })?;
    Ok(gc::alloc_meaning(Box::new(Meaning::Invocation {
        base,
        arguments,
    })))
}

/// Applies a macro to the unevaluated argument forms and re-analyzes the
/// expansion in place of the call. The macro body runs in a fresh activation
/// extending the macro's captured scope.
fn expand_macro(mut form: GcRef) -> JetResult<GcRef> {
    let frame = FrameGuard::new("expand_macro");
    gc_protect!(frame, form);
    gc_local!(frame, macro_fn, child, cursor, rest, expansion);

    let symbol = gc::symbol_id(gc::car(form));
    let right = env::global_slot(symbol).ok_or_else(|| {
        Error::runtime(format!(
            "macro {} is not bound at global scope",
            interner::name_of(symbol)
        ))
    })?;

    let global = roots::global_activation();
    macro_fn = unsafe {
        (*gc::activation_record(global)).get(0, right).map_err(|_| {
            Error::runtime(format!(
                "macro {} used before its definition",
                interner::name_of(symbol)
            ))
        })?
    };
    if !gc::is_function(macro_fn) {
        return Err(Error::runtime(format!(
            "macro {} is not bound to a function",
            interner::name_of(symbol)
        )));
    }

    let (arity, variadic) = meaning::lambda_info(gc::function_lambda(macro_fn));
    let (_, form_len) = gc::length(form);
    let argc = form_len - 1;
    if argc != arity && !(variadic && argc > arity) {
        return Err(Error::runtime(format!(
            "macro {}: arity mismatch",
            interner::name_of(symbol)
        )));
    }

    // bind the argument forms, unevaluated
    child = gc::alloc_activation(gc::function_activation(macro_fn));
    cursor = gc::cdr(form);
    for index in 0..arity {
        unsafe {
            (*gc::activation_record(child)).set(0, index, gc::car(cursor))?;
        }
        cursor = gc::cdr(cursor);
    }
    if variadic {
        rest = gc::empty();
        while !gc::is_empty(cursor) {
            rest = gc::alloc_cons(gc::car(cursor), rest);
            cursor = gc::cdr(cursor);
        }
        rest = gc::reverse_in_place(rest);
        unsafe {
            (*gc::activation_record(child)).set(0, arity, rest)?;
        }
    }

    expansion = meaning::evaluate(meaning::lambda_body(gc::function_lambda(macro_fn)), child)?;
    analyze(expansion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::runtime;
    use std::io::Cursor;

    fn parse_one(source: &str) -> GcRef {
        parser::parse(&mut Cursor::new(source.as_bytes())).unwrap()
    }

    fn analyzed(source: &str) -> GcRef {
        analyze(parse_one(source)).unwrap()
    }

    fn record(meaning: GcRef) -> &'static Meaning {
        unsafe { &*gc::meaning_record(meaning) }
    }

    #[test]
    fn atoms_analyze_to_quoted_or_reference() {
        runtime::initialize(false, false);
        assert!(matches!(record(analyzed("42")), Meaning::Quoted { .. }));
        assert!(matches!(record(analyzed("#t")), Meaning::Quoted { .. }));
        assert!(matches!(record(analyzed("\"s\"")), Meaning::Quoted { .. }));
        assert!(matches!(record(analyzed("x")), Meaning::Reference { .. }));
        assert!(analyze(parse_one("()")).is_err());
    }

    #[test]
    fn special_forms_produce_their_meanings() {
        runtime::initialize(false, false);
        assert!(matches!(record(analyzed("(quote a)")), Meaning::Quoted { .. }));
        assert!(matches!(
            record(analyzed("(if #t 1 2)")),
            Meaning::Conditional { .. }
        ));
        assert!(matches!(
            record(analyzed("(begin 1 2 3)")),
            Meaning::Sequence { .. }
        ));
        assert!(matches!(
            record(analyzed("(define x 1)")),
            Meaning::Definition { .. }
        ));
        assert!(matches!(record(analyzed("(and 1 2)")), Meaning::And { .. }));
        assert!(matches!(record(analyzed("(or 1 2)")), Meaning::Or { .. }));
        assert!(matches!(record(analyzed("(f 1)")), Meaning::Invocation { .. }));
    }

    #[test]
    fn lambda_parameter_shapes() {
        runtime::initialize(false, false);
        assert_eq!(meaning::lambda_info(analyzed("(lambda () 1)")), (0, false));
        assert_eq!(meaning::lambda_info(analyzed("(lambda (a b) a)")), (2, false));
        assert_eq!(
            meaning::lambda_info(analyzed("(lambda (a b . rest) a)")),
            (2, true)
        );
        assert_eq!(meaning::lambda_info(analyzed("(lambda args args)")), (0, true));
        assert!(analyze(parse_one("(lambda (1) 1)")).is_err());
        assert!(analyze(parse_one("(lambda (a))")).is_err());
    }

    #[test]
    fn lambda_bodies_resolve_parameters_by_position() {
        runtime::initialize(false, false);
        let lambda = analyzed("(lambda (a b) b)");
        let body = meaning::lambda_body(lambda);
        match record(body) {
            Meaning::Sequence { body, final_form } => {
                assert!(body.is_empty());
                assert!(matches!(
                    record(*final_form),
                    Meaning::Reference { up: 0, right: 1 }
                ));
            }
            _ => panic!("lambda body should be a sequence"),
        }
    }

    #[test]
    fn define_sugar_produces_a_lambda_binding() {
        runtime::initialize(false, false);
        let meaning = analyzed("(define (f a) a)");
        match record(meaning) {
            Meaning::Definition { value, .. } => {
                assert!(matches!(record(*value), Meaning::Lambda { arity: 1, .. }));
            }
            _ => panic!("expected a definition"),
        }
    }

    #[test]
    fn free_variables_are_bound_late_in_the_global_frame() {
        runtime::initialize(false, false);
        let meaning = analyzed("(lambda () some-free-variable)");
        let body = meaning::lambda_body(meaning);
        match record(body) {
            Meaning::Sequence { final_form, .. } => match record(*final_form) {
                Meaning::Reference { up, .. } => assert_eq!(*up, 1),
                _ => panic!("expected a reference"),
            },
            _ => panic!("expected a sequence"),
        }
    }

    #[test]
    fn let_desugars_to_an_immediate_invocation() {
        runtime::initialize(false, false);
        let meaning = analyzed("(let ((x 1) (y 2)) x)");
        match record(meaning) {
            Meaning::Invocation { base, arguments } => {
                assert_eq!(arguments.len(), 2);
                assert!(matches!(
                    record(*base),
                    Meaning::Lambda {
                        arity: 2,
                        variadic: false,
                        ..
                    }
                ));
            }
            _ => panic!("expected an invocation"),
        }
    }

    #[test]
    fn if_without_an_else_quotes_the_empty_list() {
        runtime::initialize(false, false);
        let meaning = analyzed("(if #f 1)");
        match record(meaning) {
            Meaning::Conditional { false_branch, .. } => match record(*false_branch) {
                Meaning::Quoted { value } => assert!(gc::is_empty(*value)),
                _ => panic!("expected a quoted empty list"),
            },
            _ => panic!("expected a conditional"),
        }
    }

    #[test]
    fn quasiquote_rewrites_into_cons_and_append_calls() {
        runtime::initialize(false, false);
        // `(1 ,x) and `(,@xs 1) both become invocations after rewriting
        assert!(matches!(
            record(analyzed("`(1 ,x)")),
            Meaning::Invocation { .. }
        ));
        assert!(matches!(
            record(analyzed("`(,@xs 1)")),
            Meaning::Invocation { .. }
        ));
        // a quasiquoted atom is just a quote
        assert!(matches!(record(analyzed("`a")), Meaning::Quoted { .. }));
    }

    #[test]
    fn malformed_forms_are_rejected() {
        runtime::initialize(false, false);
        for source in [
            "(quote)",
            "(quote a b)",
            "(if #t)",
            "(define)",
            "(define 1 2)",
            "(set! 1 2)",
            "(begin)",
            "(let ((x)) x)",
            "(let ((x 1)))",
        ] {
            assert!(analyze(parse_one(source)).is_err(), "{} should fail", source);
        }
    }
}
