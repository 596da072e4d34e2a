// File: src/main.rs
//
// Manual-testing harness around the execution core. Not a language
// front end: it never lexes or parses source text. It deserializes a
// pre-built `ast::Program` (the boundary artifact an upstream lexer/
// parser/validator pipeline would hand the compiler) from a JSON file,
// compiles it, and either runs `main` through the VM or prints the
// compiled bytecode. Mirrors the teacher's `clap`-derived `Cli`/
// `Commands` shape, scoped down to what this crate actually does.

mod ast;
mod bytecode;
mod compiler;
mod errors;
mod heap;
mod jit;
mod peephole;
mod vm;

use clap::{Parser as ClapParser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(
    name = "rove",
    about = "Rove: bytecode compiler, VM, GC heap and ARM64 JIT core",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Compile a JSON-encoded ast::Program and run its parameterless `main`.
    Run {
        /// Path to a JSON file deserializing to `ast::Program`.
        program: PathBuf,

        /// Disable the ARM64 JIT and always interpret.
        #[arg(long)]
        no_jit: bool,

        /// Starting GC collection threshold (object count).
        #[arg(long, default_value_t = 8)]
        heap_threshold: u32,

        /// Print every call and dispatched instruction to stderr.
        #[arg(long)]
        trace: bool,
    },

    /// Compile a JSON-encoded ast::Program and print its bytecode.
    Disasm {
        /// Path to a JSON file deserializing to `ast::Program`.
        program: PathBuf,
    },
}

fn load_program(path: &PathBuf) -> Result<ast::Program, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("parsing {}: {}", path.display(), e))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { program, no_jit, heap_threshold, trace } => {
            let program = match load_program(&program) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };

            let mut module = match compiler::compile(&program) {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            peephole::optimize_module(&mut module);

            let options = vm::VmOptions {
                jit_enabled: !no_jit,
                initial_heap_threshold: heap_threshold,
                trace,
            };
            let mut machine = vm::Vm::new(module, options);
            match machine.call("main", vec![]) {
                Ok(value) => {
                    println!("{}", value);
                    ExitCode::SUCCESS
                }
                Err(fault) => {
                    eprintln!("{}", fault);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Disasm { program } => {
            let program = match load_program(&program) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let mut module = match compiler::compile(&program) {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            peephole::optimize_module(&mut module);
            print!("{}", bytecode::disassemble_module(&module));
            ExitCode::SUCCESS
        }
    }
}
