#![allow(dead_code)]
mod activation;
mod analysis;
mod builtin;
mod env;
mod error;
mod gc;
mod interner;
mod meaning;
mod options;
mod parser;
mod printer;
mod runtime;
mod tokenizer;

use argh::FromArgs;
use std::path::Path;
use std::process::ExitCode;

#[derive(FromArgs)]
/// The Jet interpreter.
struct Args {
    /// program to run
    #[argh(positional)]
    input: String,
    /// directory containing prelude.jet
    #[argh(option, short = 's')]
    stdlib_path: String,
    /// warn when a symbol is bound late
    #[argh(switch, short = 'w')]
    warnings: bool,
    /// collect on every allocation (debug builds)
    #[argh(switch)]
    gc_stress: bool,
    /// verify the heap before and after each collection (debug builds)
    #[argh(switch)]
    heap_verify: bool,
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    options::set(options::Options {
        input_file: args.input,
        stdlib_path: args.stdlib_path,
        warnings: args.warnings,
        gc_stress: args.gc_stress,
        heap_verify: args.heap_verify,
    });

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = options::get();
    runtime::initialize(opts.gc_stress, opts.heap_verify);
    runtime::bootstrap();

    let prelude = Path::new(&opts.stdlib_path).join("prelude.jet");
    for path in [prelude.as_path(), Path::new(&opts.input_file)] {
        if let Err(e) = runtime::run_file(path) {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    }
    ExitCode::SUCCESS
}
