//! Value Rendering
//!
//! Human-facing formatting for the `print` word, the REPL stack echo, and
//! error reports. Integral numbers print without a trailing fraction, lists
//! print in their source shape, strings come back quoted.

use tacit_core::cell::Tag;
use tacit_core::{Cell, ErrorKind};

use crate::vm::Vm;

/// Render a number the way the tokenizer would accept it back.
pub fn format_number(n: f32) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e9 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Render one simple cell. List bookends render as placeholders; whole
/// lists go through [`format_unit`].
pub fn format_cell(vm: &Vm, cell: Cell) -> Result<String, ErrorKind> {
    if cell.is_number() {
        return Ok(format_number(cell.to_number()?));
    }
    Ok(match cell.decode()? {
        (Tag::Integer, n) => format!("{n}"),
        (Tag::Str, offset) => format!("\"{}\"", vm.digest.get(&vm.memory, offset as u16)?),
        (Tag::Code, addr) => format!("{{code@{addr:#06x}}}"),
        (Tag::Builtin, op) => format!("{{builtin:{op}}}"),
        (Tag::Local, slot) => format!("{{local:{slot}}}"),
        (Tag::Sentinel, v) => format!("{{sentinel:{v}}}"),
        (Tag::Heap, _) => {
            let (kind, addr) = cell.heap_ref()?;
            format!("{{{kind:?}@{addr:#06x}}}").to_lowercase()
        }
        (Tag::List, n) => format!("{{list:{n}}}"),
        (Tag::Link, n) => format!("{{link:{n}}}"),
        (Tag::Nil, _) => "nil".to_string(),
    })
}

/// Render one unit: a simple cell, or a whole list span recursively.
pub fn format_unit(vm: &Vm, unit: &[Cell]) -> Result<String, ErrorKind> {
    if unit.len() == 1 {
        return format_cell(vm, unit[0]);
    }
    // A span: header, payload, optional trailer.
    let body = if unit.last().is_some_and(|c| c.has_tag(Tag::Link)) {
        &unit[1..unit.len() - 1]
    } else {
        &unit[1..]
    };
    let mut parts = vec!["(".to_string()];
    let mut i = 0;
    while i < body.len() {
        if body[i].has_tag(Tag::List) {
            let span = body[i].payload()? as usize + 1;
            if i + span > body.len() {
                return Err(ErrorKind::SyntaxError(
                    "list payload is shorter than its headers claim".into(),
                ));
            }
            parts.push(format_unit(vm, &body[i..i + span])?);
            i += span;
        } else {
            parts.push(format_cell(vm, body[i])?);
            i += 1;
        }
    }
    parts.push(")".to_string());
    Ok(parts.join(" "))
}

/// Render the whole data stack bottom-up, lists grouped.
pub fn format_stack(vm: &Vm) -> Result<String, ErrorKind> {
    let snapshot = vm.stack_snapshot();
    format_cells(vm, &snapshot)
}

/// Render a bottom-up run of cells (e.g. an error snapshot), lists grouped.
pub fn format_cells(vm: &Vm, cells: &[Cell]) -> Result<String, ErrorKind> {
    let mut units = Vec::new();
    let mut top = cells.len();
    while top > 0 {
        let cell = cells[top - 1];
        let span = if cell.has_tag(Tag::Link) {
            (cell.payload()? as usize + 1).min(top)
        } else {
            1
        };
        units.push(format_unit(vm, &cells[top - span..top])?);
        top -= span;
    }
    units.reverse();
    Ok(units.join(" "))
}
