//! Interactive loop: read a line, run it as one unit, echo the data stack.
//!
//! Errors print their kind and the stack snapshot taken at the fault, then
//! both stacks are cleared so the session continues; definitions, interned
//! strings, and heap data survive.

use std::path::PathBuf;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::warn;

use tacit_vm::Vm;
use tacit_vm::format::{format_cells, format_stack};

use crate::host::FsHost;

const PROMPT: &str = "tacit> ";

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|dir| dir.join(".tacit_history"))
}

pub fn run() -> Result<(), String> {
    let mut vm = Vm::new().map_err(|e| e.to_string())?;
    let root = std::env::current_dir().map_err(|e| e.to_string())?;
    let mut host = FsHost::new(root);

    let mut editor = DefaultEditor::new().map_err(|e| e.to_string())?;
    let history = history_path();
    if let Some(path) = &history {
        // Missing history is normal on first run.
        let _ = editor.load_history(path);
    }

    println!("tacit {} — blank line or Ctrl-D to leave", env!("CARGO_PKG_VERSION"));
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = editor.add_history_entry(&line) {
                    warn!("history: {e}");
                }
                match vm.interpret_with_host(&line, &mut host) {
                    Ok(()) => match format_stack(&vm) {
                        Ok(rendered) => println!("⟨ {rendered} ⟩"),
                        Err(e) => println!("⟨ unprintable stack: {e} ⟩"),
                    },
                    Err(err) => {
                        eprintln!("error: {err}");
                        if let Ok(rendered) = format_cells(&vm, &err.stack) {
                            eprintln!("stack at fault: ⟨ {rendered} ⟩");
                        }
                        vm.reset_stacks();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.to_string()),
        }
    }

    if let Some(path) = &history {
        if let Err(e) = editor.save_history(path) {
            warn!("history: {e}");
        }
    }
    Ok(())
}
