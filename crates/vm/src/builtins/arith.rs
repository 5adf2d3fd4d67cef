//! Arithmetic and comparison words.
//!
//! Operands are plain number cells; NaN-boxed INTEGER cells coerce to their
//! numeric value. Anything else is a tag error. Results go back as number
//! cells, with NaN outputs canonicalized by the cell constructor.

use tacit_core::cell::Tag;
use tacit_core::{Cell, ErrorKind};

use crate::vm::Vm;

/// Numeric value of an operand cell.
pub fn number_operand(cell: Cell) -> Result<f32, ErrorKind> {
    if cell.is_number() {
        return cell.to_number();
    }
    match cell.decode()? {
        (Tag::Integer, n) => Ok(n as f32),
        (tag, _) => Err(ErrorKind::BadTag(tag as u8)),
    }
}

pub fn binary(vm: &mut Vm, f: impl Fn(f32, f32) -> f32) -> Result<(), ErrorKind> {
    let b = number_operand(vm.pop()?)?;
    let a = number_operand(vm.pop()?)?;
    vm.push(Cell::number(f(a, b)))
}

pub fn unary(vm: &mut Vm, f: impl Fn(f32) -> f32) -> Result<(), ErrorKind> {
    let a = number_operand(vm.pop()?)?;
    vm.push(Cell::number(f(a)))
}

pub fn compare(vm: &mut Vm, f: impl Fn(f32, f32) -> bool) -> Result<(), ErrorKind> {
    let b = number_operand(vm.pop()?)?;
    let a = number_operand(vm.pop()?)?;
    vm.push(Cell::number(if f(a, b) { 1.0 } else { 0.0 }))
}
