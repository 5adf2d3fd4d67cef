//! TACIT CLI
//!
//! Runs source files through a fresh VM, evaluates one-liners, or drops
//! into the interactive REPL when given nothing else to do.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tacit_vm::Vm;
use tacit_vm::format::{format_cells, format_stack};

mod host;
mod repl;

use host::FsHost;

#[derive(Parser)]
#[command(name = "tacit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "TACIT — a stack-oriented, point-free language", long_about = None)]
struct Cli {
    /// Source files to run, in order, each in a fresh VM.
    files: Vec<PathBuf>,

    /// Evaluate one unit of source and print the resulting stack.
    #[arg(short = 'e', long = "eval", value_name = "SOURCE")]
    eval: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(source) = &cli.eval {
        run_source(source, std::env::current_dir().unwrap_or_default());
        return;
    }

    if cli.files.is_empty() {
        if let Err(e) = repl::run() {
            eprintln!("error: {e}");
            process::exit(1);
        }
        return;
    }

    for file in &cli.files {
        let source = match std::fs::read_to_string(file) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: {}: {e}", file.display());
                process::exit(1);
            }
        };
        let root = file
            .parent()
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        run_source(&source, root);
    }
}

fn run_source(source: &str, root: PathBuf) {
    let mut vm = match Vm::new() {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let mut host = FsHost::new(root);
    match vm.interpret_with_host(source, &mut host) {
        Ok(()) => {
            if vm.depth() > 0 {
                match format_stack(&vm) {
                    Ok(rendered) => println!("⟨ {rendered} ⟩"),
                    Err(e) => eprintln!("error: unprintable stack: {e}"),
                }
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            if let Ok(rendered) = format_cells(&vm, &err.stack) {
                eprintln!("stack at fault: ⟨ {rendered} ⟩");
            }
            process::exit(1);
        }
    }
}
