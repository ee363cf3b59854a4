//! The analysis environment.
//!
//! A stack of scopes used during semantic analysis to turn symbol references
//! into `(up, right)` lexical addresses. Each frame maps a symbol id to the
//! slot it was assigned in that scope; slots are handed out densely, in
//! definition order, and never change for the lifetime of the frame.
//!
//! Lookup misses do not fail: the symbol is auto-defined in the global frame
//! (optionally with a warning). This late-binding policy is what lets a
//! definition refer to prelude procedures that have not been loaded yet.

use crate::interner;
use crate::options;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Clone, Copy)]
struct Binding {
    slot: usize,
    is_macro: bool,
}

struct Environment {
    frames: Vec<HashMap<usize, Binding>>,
}

thread_local! {
    static ENV: RefCell<Option<Environment>> = const { RefCell::new(None) };
}

/// Creates the environment with its global frame. Idempotent.
pub fn initialize() {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        if env.is_none() {
            *env = Some(Environment {
                frames: vec![HashMap::new()],
            });
        }
    });
}

fn with_env<T>(f: impl FnOnce(&mut Environment) -> T) -> T {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        f(env
            .as_mut()
            .expect("analysis environment used before initialization"))
    })
}

/// Pushes a new lexical scope.
pub fn enter_scope() {
    with_env(|env| env.frames.push(HashMap::new()));
}

/// Pops the innermost lexical scope. The global frame is never popped.
pub fn exit_scope() {
    with_env(|env| {
        assert!(env.frames.len() > 1, "cannot exit the global scope");
        env.frames.pop();
    });
}

/// Assigns the symbol a slot in the innermost scope, reusing the existing
/// slot if the symbol is already bound there.
pub fn define(symbol: usize) -> usize {
    with_env(|env| {
        let top = env.frames.last_mut().expect("environment has a frame");
        if let Some(binding) = top.get(&symbol) {
            return binding.slot;
        }
        let slot = top.len();
        top.insert(
            symbol,
            Binding {
                slot,
                is_macro: false,
            },
        );
        slot
    })
}

/// Assigns the symbol a slot in the global frame if it has none yet,
/// returning the address of the (existing or new) binding relative to the
/// current scope depth.
pub fn define_global(symbol: usize) -> (usize, usize) {
    with_env(|env| {
        let depth = env.frames.len();
        let global = &mut env.frames[0];
        if let Some(binding) = global.get(&symbol) {
            return (depth - 1, binding.slot);
        }
        let slot = global.len();
        global.insert(
            symbol,
            Binding {
                slot,
                is_macro: false,
            },
        );
        (depth - 1, slot)
    })
}

/// Resolves a symbol to the innermost binding. On a miss the symbol is
/// auto-defined in the global frame, with a warning when configured; the
/// definition may arrive later, at which point the slot fills in.
pub fn get(symbol: usize) -> (usize, usize) {
    let found = with_env(|env| {
        for (up, frame) in env.frames.iter().rev().enumerate() {
            if let Some(binding) = frame.get(&symbol) {
                return Some((up, binding.slot));
            }
        }
        None
    });
    match found {
        Some(address) => address,
        None => {
            if options::get().warnings {
                tracing::warn!("possibly unbound symbol: {}", interner::name_of(symbol));
            }
            define_global(symbol)
        }
    }
}

/// True if any binding of the symbol, at any depth, is flagged as a macro.
pub fn is_macro(symbol: usize) -> bool {
    with_env(|env| {
        env.frames
            .iter()
            .any(|frame| frame.get(&symbol).is_some_and(|binding| binding.is_macro))
    })
}

/// Flags the innermost binding of the symbol as a macro.
pub fn set_macro(symbol: usize) {
    with_env(|env| {
        for frame in env.frames.iter_mut().rev() {
            if let Some(binding) = frame.get_mut(&symbol) {
                binding.is_macro = true;
                return;
            }
        }
        panic!("set_macro on an unbound symbol");
    });
}

/// The symbol's slot in the global frame, if it has one.
pub fn global_slot(symbol: usize) -> Option<usize> {
    with_env(|env| env.frames[0].get(&symbol).map(|binding| binding.slot))
}

pub fn depth() -> usize {
    with_env(|env| env.frames.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_dense_and_stable() {
        initialize();
        let (up, a) = define_global(100);
        assert_eq!(up, 0);
        let (_, b) = define_global(101);
        assert_eq!(b, a + 1);
        // redefinition reuses the slot
        let (_, again) = define_global(100);
        assert_eq!(again, a);
    }

    #[test]
    fn get_finds_the_innermost_binding() {
        initialize();
        define_global(200);
        enter_scope();
        let slot = define(201);
        assert_eq!(slot, 0);
        assert_eq!(get(201), (0, 0));
        let (up, _) = get(200);
        assert_eq!(up, 1);
        // shadowing
        define(200);
        assert_eq!(get(200), (0, 1));
        exit_scope();
        let (up, _) = get(200);
        assert_eq!(up, 0);
    }

    #[test]
    fn misses_auto_define_in_the_global_frame() {
        initialize();
        enter_scope();
        let (up, right) = get(300);
        assert_eq!(up, 1, "auto-defined bindings land in the global frame");
        assert_eq!(get(300), (1, right), "the slot is stable afterwards");
        exit_scope();
        assert_eq!(get(300), (0, right));
    }

    #[test]
    fn macro_flags_stick_to_bindings() {
        initialize();
        define_global(400);
        assert!(!is_macro(400));
        set_macro(400);
        assert!(is_macro(400));
        assert_eq!(global_slot(400), Some(get(400).1));
        assert_eq!(global_slot(12345), None);
    }
}
