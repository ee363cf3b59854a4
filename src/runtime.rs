//! Runtime assembly: initialization, bootstrap and the driver loop.
//!
//! Initialization order is fixed: heap, interner, root-frame sentinel,
//! contract sentinel, analysis environment. All of them are thread-local
//! singletons, so every interpreter thread (and every test thread) gets an
//! isolated runtime.

use crate::analysis;
use crate::builtin;
use crate::env;
use crate::error::{Error, JetResult};
use crate::gc::{self, contract, heap, roots, GcRef};
use crate::gc_local;
use crate::interner;
use crate::meaning;
use crate::parser;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::ptr;

/// Initializes every runtime singleton in the required order. Idempotent
/// within a thread.
pub fn initialize(gc_stress: bool, heap_verify: bool) {
    heap::initialize(gc_stress, heap_verify);
    interner::initialize();
    roots::initialize();
    contract::initialize();
    env::initialize();
}

/// Creates the global activation, publishes it to the root set and installs
/// the builtins into it.
pub fn bootstrap() -> GcRef {
    let activation = gc::alloc_activation(ptr::null_mut());
    roots::set_global_activation(activation);
    builtin::load_builtins(activation);
    // registration may have moved the cell; the published root is current
    roots::global_activation()
}

/// Reads, analyzes and evaluates every form in the input against the global
/// activation, returning the value of the final form.
pub fn run(input: &mut dyn BufRead) -> JetResult<GcRef> {
    let frame = roots::FrameGuard::new("run");
    gc_local!(frame, form, analyzed, result);

    result = gc::empty();
    loop {
        form = parser::parse(input)?;
        if gc::is_eof(form) {
            return Ok(result);
        }
        analyzed = analysis::analyze(form)?;
        result = meaning::evaluate(analyzed, roots::global_activation())?;
    }
}

pub fn run_source(source: &str) -> JetResult<GcRef> {
    let mut input = std::io::Cursor::new(source.as_bytes());
    run(&mut input)
}

pub fn run_file(path: &Path) -> JetResult<GcRef> {
    let file = File::open(path)
        .map_err(|e| Error::read(format!("cannot open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    run(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_value;

    const PRELUDE: &str = include_str!("../stdlib/prelude.jet");

    fn setup() {
        initialize(false, false);
        bootstrap();
        run_source(PRELUDE).expect("prelude loads");
    }

    fn eval_to_string(source: &str) -> String {
        print_value(run_source(source).expect(source))
    }

    fn eval_error(source: &str) -> Error {
        run_source(source).expect_err(source)
    }

    #[test]
    fn arithmetic_evaluates() {
        setup();
        assert_eq!(eval_to_string("(+ 1 2)"), "3");
        assert_eq!(eval_to_string("(* 3 (- 10 4))"), "18");
        assert_eq!(eval_to_string("(/ 9 2)"), "4");
    }

    #[test]
    fn division_by_zero_unwinds_to_the_top() {
        setup();
        assert!(matches!(
            eval_error("(/ 1 0)"),
            Error::Runtime(msg) if msg.contains("divided by zero")
        ));
    }

    #[test]
    fn recursive_definitions_work() {
        setup();
        assert_eq!(
            eval_to_string(
                "(define (fact n) (if (eq? n 0) 1 (* n (fact (- n 1)))))
                 (fact 5)"
            ),
            "120"
        );
    }

    #[test]
    fn tail_calls_do_not_grow_the_native_stack() {
        setup();
        assert_eq!(
            eval_to_string(
                "(define (count n) (if (eq? n 0) (quote done) (count (- n 1))))
                 (count 100000)"
            ),
            "done"
        );
    }

    #[test]
    fn free_variables_bind_late_through_the_global_frame() {
        setup();
        assert_eq!(
            eval_to_string("(define x 1) (define (get) x) (define x 2) (get)"),
            "2"
        );
    }

    #[test]
    fn variadic_parameters_collect_the_extras() {
        setup();
        assert_eq!(eval_to_string("(define (f . xs) xs) (f 1 2 3)"), "(1 2 3)");
        assert_eq!(eval_to_string("(define (g a . xs) xs) (g 1 2 3)"), "(2 3)");
        assert_eq!(eval_to_string("(define (h a . xs) xs) (h 1)"), "()");
    }

    #[test]
    fn closures_capture_their_defining_activation() {
        setup();
        assert_eq!(
            eval_to_string(
                "(define (make-adder n) (lambda (x) (+ x n)))
                 (define add5 (make-adder 5))
                 (add5 10)"
            ),
            "15"
        );
    }

    #[test]
    fn set_bang_mutates_the_local_slot() {
        setup();
        assert_eq!(eval_to_string("((lambda (x) (set! x 10) x) 3)"), "10");
    }

    #[test]
    fn begin_sequences_left_to_right() {
        setup();
        assert_eq!(
            eval_to_string("(define x 0) (begin (set! x (+ x 1)) (set! x (* x 10)) x)"),
            "10"
        );
    }

    #[test]
    fn let_binds_in_the_enclosing_scope() {
        setup();
        assert_eq!(eval_to_string("(let ((x 2) (y 3)) (* x y))"), "6");
        // the init expressions see the outer bindings, not each other
        assert_eq!(
            eval_to_string("(define x 1) (let ((x 10) (y x)) (+ x y))"),
            "11"
        );
    }

    #[test]
    fn and_or_short_circuit() {
        setup();
        assert_eq!(eval_to_string("(and)"), "#t");
        assert_eq!(eval_to_string("(or)"), "#f");
        assert_eq!(eval_to_string("(and 1 2)"), "2");
        assert_eq!(eval_to_string("(and #f 2)"), "#f");
        assert_eq!(eval_to_string("(or #f 3)"), "3");
        assert_eq!(eval_to_string("(or 1 (error \"not reached\"))"), "1");
        assert_eq!(eval_to_string("(and #f (error \"not reached\"))"), "#f");
    }

    #[test]
    fn truthiness_treats_the_empty_list_as_true() {
        setup();
        assert_eq!(eval_to_string("(if (quote ()) 1 2)"), "1");
        assert_eq!(eval_to_string("(if #f 1)"), "()");
    }

    #[test]
    fn symbol_identity_and_string_equality() {
        setup();
        assert_eq!(eval_to_string("(eq? (quote abc) (quote abc))"), "#t");
        assert_eq!(eval_to_string("(eq? 1 1)"), "#t");
        assert_eq!(eval_to_string("(eq? \"a\" \"a\")"), "#f");
        assert_eq!(eval_to_string("(equal? \"a\" \"a\")"), "#t");
        assert_eq!(eval_to_string("(equal? (list 1 2) (list 1 2))"), "#t");
        assert_eq!(eval_to_string("(equal? (list 1 2) (list 1 3))"), "#f");
    }

    #[test]
    fn pairs_print_with_dotted_tails() {
        setup();
        assert_eq!(eval_to_string("(cons 1 2)"), "(1 . 2)");
        assert_eq!(eval_to_string("(cons 1 (cons 2 (quote ())))"), "(1 2)");
    }

    #[test]
    fn prelude_list_utilities() {
        setup();
        assert_eq!(eval_to_string("(length (list 1 2 3))"), "3");
        assert_eq!(eval_to_string("(append (list 1 2) (list 3 4))"), "(1 2 3 4)");
        assert_eq!(eval_to_string("(reverse (list 1 2 3))"), "(3 2 1)");
        assert_eq!(
            eval_to_string("(map (lambda (x) (* x x)) (list 1 2 3))"),
            "(1 4 9)"
        );
        assert_eq!(eval_to_string("(cadr (list 1 2 3))"), "2");
    }

    #[test]
    fn quasiquote_builds_lists_with_unquotes_and_splices() {
        setup();
        assert_eq!(eval_to_string("`(1 2 3)"), "(1 2 3)");
        assert_eq!(eval_to_string("(define x 5) `(1 ,x)"), "(1 5)");
        assert_eq!(eval_to_string("`(1 ,(+ 1 1) ,@(list 3 4))"), "(1 2 3 4)");
        assert_eq!(eval_to_string("`a"), "a");
    }

    #[test]
    fn macros_expand_at_analysis_time() {
        setup();
        assert_eq!(
            eval_to_string(
                "(defmacro (my-if c t e) (list (quote if) c t e))
                 (my-if #f 1 2)"
            ),
            "2"
        );
        // the arguments reach the macro body unevaluated
        assert_eq!(
            eval_to_string(
                "(defmacro (ignore-first a b) b)
                 (ignore-first (error \"not evaluated\") 42)"
            ),
            "42"
        );
    }

    #[test]
    fn eval_reanalyzes_at_runtime() {
        setup();
        assert_eq!(eval_to_string("(eval (quote (+ 1 2)))"), "3");
        assert_eq!(
            eval_to_string("(define form (list (quote *) 6 7)) (eval form)"),
            "42"
        );
    }

    #[test]
    fn user_errors_carry_their_message() {
        setup();
        assert!(matches!(
            eval_error("(error \"boom\")"),
            Error::Runtime(msg) if msg == "boom"
        ));
    }

    #[test]
    fn arity_mismatches_are_runtime_errors() {
        setup();
        assert!(matches!(
            eval_error("((lambda (x) x) 1 2)"),
            Error::Runtime(msg) if msg.contains("arity mismatch")
        ));
        assert!(matches!(
            eval_error("((lambda (x y) x) 1)"),
            Error::Runtime(msg) if msg.contains("arity mismatch")
        ));
        assert!(matches!(
            eval_error("(car 1 2)"),
            Error::Runtime(msg) if msg.contains("expected 1 arguments")
        ));
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        setup();
        assert!(matches!(
            eval_error("(1 2 3)"),
            Error::Runtime(msg) if msg.contains("non-callable")
        ));
    }

    #[test]
    fn reading_an_unassigned_global_is_a_runtime_error() {
        setup();
        assert!(matches!(
            eval_error("completely-unbound-variable"),
            Error::Runtime(msg) if msg.contains("uninitialized")
        ));
    }

    #[test]
    fn malformed_input_is_a_read_error() {
        setup();
        assert!(matches!(eval_error("(1 2"), Error::Read(_)));
        assert!(matches!(eval_error("\"unterminated"), Error::Read(_)));
    }

    #[test]
    fn stress_collections_preserve_program_results() {
        // collect on every allocation and verify the heap around each
        // collection; result parity with the unstressed runs above pins
        // relocation correctness
        initialize(true, true);
        bootstrap();
        assert_eq!(
            print_value(
                run_source(
                    "(define (fact n) (if (eq? n 0) 1 (* n (fact (- n 1)))))
                     (fact 5)"
                )
                .unwrap()
            ),
            "120"
        );
        assert_eq!(
            print_value(run_source("(define (f . xs) xs) (f 1 2 3)").unwrap()),
            "(1 2 3)"
        );
    }

    #[test]
    fn files_load_like_the_cli_does() {
        initialize(false, false);
        bootstrap();
        let dir = tempfile::tempdir().unwrap();
        let prelude_path = dir.path().join("prelude.jet");
        std::fs::write(&prelude_path, PRELUDE).unwrap();
        let program_path = dir.path().join("program.jet");
        std::fs::write(&program_path, "(define (twice x) (* 2 x)) (twice 21)").unwrap();

        run_file(&prelude_path).unwrap();
        let result = run_file(&program_path).unwrap();
        assert_eq!(print_value(result), "42");

        assert!(run_file(&dir.path().join("missing.jet")).is_err());
    }
}
