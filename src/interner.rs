//! Symbol interner.
//!
//! Symbols and strings are similar, but symbols are guaranteed to be
//! interned: two symbols can be checked for equality by comparing their
//! intern indexes. The interner is seeded at startup with the special-form
//! names in a fixed order so the analyzer can dispatch on numeric constants.

use std::cell::RefCell;
use std::collections::HashMap;

// Reserved ids, in seed order. Don't mess this order up: the analyzer and
// reader refer to these by numeric constant.
pub const QUOTE: usize = 0;
pub const DEFINE: usize = 1;
pub const SET_BANG: usize = 2;
pub const LAMBDA: usize = 3;
pub const IF: usize = 4;
pub const BEGIN: usize = 5;
pub const UNQUOTE: usize = 6;
pub const UNQUOTE_SPLICING: usize = 7;
pub const QUASIQUOTE: usize = 8;
pub const APPEND: usize = 9;
pub const DEFMACRO: usize = 10;
pub const LET: usize = 11;
// `and` and `or` are special forms too, but sit outside the frozen reserved
// block; they are seeded immediately after it.
pub const AND: usize = 12;
pub const OR: usize = 13;

const SEED_SYMBOLS: [&str; 14] = [
    "quote",
    "define",
    "set!",
    "lambda",
    "if",
    "begin",
    "unquote",
    "unquote-splicing",
    "quasiquote",
    "append",
    "defmacro",
    "let",
    "and",
    "or",
];

struct SymbolInterner {
    map: HashMap<String, usize>,
    names: Vec<String>,
}

thread_local! {
    static INTERNER: RefCell<SymbolInterner> = RefCell::new(SymbolInterner {
        map: HashMap::new(),
        names: Vec::new(),
    });
}

/// Seeds the interner with the reserved symbols. Idempotent.
pub fn initialize() {
    for name in SEED_SYMBOLS {
        intern(name);
    }
}

/// Interns a name, returning its dense id. Interning the same name twice
/// returns the same id.
pub fn intern(name: &str) -> usize {
    INTERNER.with(|interner| {
        let mut interner = interner.borrow_mut();
        if let Some(&id) = interner.map.get(name) {
            return id;
        }
        let id = interner.names.len();
        interner.map.insert(name.to_string(), id);
        interner.names.push(name.to_string());
        id
    })
}

/// Recovers the name for an id. Panics on an id that was never handed out,
/// which should not happen during normal operation.
pub fn name_of(id: usize) -> String {
    INTERNER.with(|interner| {
        let interner = interner.borrow();
        interner
            .names
            .get(id)
            .unwrap_or_else(|| panic!("unknown symbol id: {}", id))
            .clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_line_up_with_the_constants() {
        initialize();
        assert_eq!(intern("quote"), QUOTE);
        assert_eq!(intern("define"), DEFINE);
        assert_eq!(intern("set!"), SET_BANG);
        assert_eq!(intern("lambda"), LAMBDA);
        assert_eq!(intern("if"), IF);
        assert_eq!(intern("begin"), BEGIN);
        assert_eq!(intern("unquote"), UNQUOTE);
        assert_eq!(intern("unquote-splicing"), UNQUOTE_SPLICING);
        assert_eq!(intern("quasiquote"), QUASIQUOTE);
        assert_eq!(intern("append"), APPEND);
        assert_eq!(intern("defmacro"), DEFMACRO);
        assert_eq!(intern("let"), LET);
        assert_eq!(intern("and"), AND);
        assert_eq!(intern("or"), OR);
    }

    #[test]
    fn interning_is_a_bijection() {
        initialize();
        let a = intern("fact");
        let b = intern("fact");
        assert_eq!(a, b);
        assert_eq!(name_of(a), "fact");
        assert_ne!(intern("fact"), intern("fact2"));
    }

    #[test]
    fn initialize_is_idempotent() {
        initialize();
        let count = intern("sentinel-symbol");
        initialize();
        assert_eq!(intern("sentinel-symbol"), count);
        assert_eq!(intern("quote"), QUOTE);
    }
}
