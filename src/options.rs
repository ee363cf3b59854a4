//! The process-wide options record.
//!
//! Populated once from the command line before runtime initialization.
//! Reads before `set` observe the defaults, which is what unit tests rely on.

use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub input_file: String,
    pub stdlib_path: String,
    /// Emit a warning when a symbol is bound late (auto-defined on first use).
    pub warnings: bool,
    /// Collect on every allocation. Debug builds only.
    pub gc_stress: bool,
    /// Verify the heap before and after each collection. Debug builds only.
    pub heap_verify: bool,
}

static OPTIONS: OnceLock<Options> = OnceLock::new();

pub fn set(options: Options) {
    let _ = OPTIONS.set(options);
}

pub fn get() -> &'static Options {
    OPTIONS.get_or_init(Options::default)
}
