//! Tastier virtual machine driver.
//!
//! Loads an assembled program (textual assembly or a `.tvc` image), feeds it
//! an input word sequence, runs it to completion, and prints the program's
//! output lines to stdout.
//!
//! # Usage
//! ```text
//! tastier <program> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `program`: assembly source, or a `.tvc` image produced by `assembler`
//!
//! # Options
//! - `--input <file>`: whitespace-separated signed words fed to `Read`
//! - `--trace`: log one line per executed instruction to stderr

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use tastier::error;
use tastier::machine::assembler::assemble_file;
use tastier::machine::errors::VmError;
use tastier::machine::program::Program;
use tastier::machine::vm::Machine;
use tastier::machine::word::Word;
use tastier::utils::log::{self, Level};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let program_path = &args[1];
    let mut input_path: Option<String> = None;
    let mut trace = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--input requires an argument");
                    process::exit(1);
                }
                input_path = Some(args[i].clone());
                i += 1;
            }
            "--trace" => {
                trace = true;
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    log::init(if trace { Level::Debug } else { Level::Info });

    let program = match load_program(program_path) {
        Ok(program) => program,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let input = match &input_path {
        Some(path) => match read_input_words(path) {
            Ok(words) => words,
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        },
        None => Vec::new(),
    };

    let mut machine = Machine::new(program);
    machine.feed(input);
    machine.set_trace(trace);

    let result = machine.run();
    for line in machine.output() {
        println!("{line}");
    }
    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}

/// Loads a program: `.tvc` files are decoded as images, anything else is
/// assembled from text.
fn load_program(path: &str) -> Result<Program, VmError> {
    if Path::new(path).extension().is_some_and(|ext| ext == "tvc") {
        let bytes = fs::read(path).map_err(|err| VmError::Io {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Program::from_bytes(&bytes)
    } else {
        assemble_file(path)
    }
}

/// Reads the input file: whitespace-separated signed decimal words.
fn read_input_words(path: &str) -> Result<Vec<Word>, String> {
    let text = fs::read_to_string(path).map_err(|err| format!("{path}: {err}"))?;
    let mut words = Vec::new();
    for token in text.split_whitespace() {
        let word = token
            .parse::<Word>()
            .map_err(|_| format!("{path}: `{token}` is not a signed 16-bit word"))?;
        words.push(word);
    }
    Ok(words)
}

const USAGE: &str = "\
Tastier Virtual Machine

USAGE:
    {program} <program> [OPTIONS]

ARGS:
    <program>    Assembly source file, or a .tvc image from `assembler`

OPTIONS:
    --input <file>    Input words for Read (whitespace-separated decimals)
    --trace           Log one line per executed instruction to stderr
    -h, --help        Print this help message

EXAMPLES:
    # Assemble and run directly
    {program} sum.tas --input sum.in

    # Run a prebuilt image with tracing
    {program} sum.tvc --input sum.in --trace
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
