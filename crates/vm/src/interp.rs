//! Bytecode Interpreter
//!
//! The fetch-decode-execute loop. One byte is read at IP: high bit clear
//! dispatches a built-in through the closed opcode table, high bit set pulls
//! the continuation byte and dispatches the user definition by its 15-bit
//! index, as if by `Call`. All side effects of an opcode are complete before
//! the next fetch; nothing suspends.
//!
//! Call frames live on the return stack as `[return address, saved BP]`,
//! with BP pointing just above the saved cells so local slots sit at
//! `BP + 4·slot`. `Exit` drops the slots, restores BP, and returns; an
//! `Exit` with no frame below it halts the unit like `Abort` does.

use tracing::trace;

use tacit_core::cell::Tag;
use tacit_core::memory::CELL_SIZE;
use tacit_core::{Cell, ErrorKind, Segment};

use crate::builtins::{arith, list, stackops};
use crate::opcode::{Opcode, decode_user_index};
use crate::vm::Vm;

/// Run from the current IP until `Abort` (or a top-level `Exit`) clears the
/// running flag.
pub fn run(vm: &mut Vm) -> Result<(), ErrorKind> {
    vm.running = true;
    while vm.running {
        let first = vm.memory.read_u8(Segment::Code, vm.ip)?;
        if first & 0x80 == 0 {
            vm.ip += 1;
            let op = Opcode::try_from(first).map_err(|_| {
                ErrorKind::SyntaxError(format!(
                    "invalid opcode byte 0x{first:02x} at {:#06x}",
                    vm.ip - 1
                ))
            })?;
            step(vm, op)?;
        } else {
            let second = vm.memory.read_u8(Segment::Code, vm.ip + 1)?;
            vm.ip += 2;
            let index = decode_user_index(first, second)?;
            let addr = vm.registry.address_of(index).ok_or_else(|| {
                ErrorKind::SyntaxError(format!("user opcode {index} is not registered"))
            })?;
            call(vm, addr)?;
        }
    }
    Ok(())
}

/// Push a frame and transfer control to `addr`.
pub(crate) fn call(vm: &mut Vm, addr: u16) -> Result<(), ErrorKind> {
    trace!(addr, from = vm.ip, "call");
    vm.rpush(Cell::tagged(Tag::Code, vm.ip as u32)?)?;
    vm.rpush(Cell::int(vm.bp as i32)?)?;
    vm.bp = vm.rp;
    vm.ip = addr as usize;
    Ok(())
}

fn exit(vm: &mut Vm) -> Result<(), ErrorKind> {
    if vm.bp == 0 && vm.rp == 0 {
        vm.running = false;
        return Ok(());
    }
    vm.rp = vm.bp;
    let saved_bp = vm.rpop()?;
    let ret = vm.rpop()?;
    match (saved_bp.decode(), ret.decode()) {
        (Ok((Tag::Integer, bp)), Ok((Tag::Code, ip))) => {
            vm.bp = bp as usize;
            vm.ip = ip as usize;
            trace!(to = vm.ip, "exit");
            Ok(())
        }
        _ => Err(ErrorKind::ReturnStackUnderflow),
    }
}

fn eval(vm: &mut Vm) -> Result<(), ErrorKind> {
    let target = vm.pop()?;
    match target.decode() {
        Ok((Tag::Code, addr)) => call(vm, addr as u16),
        _ => Err(ErrorKind::BadEval),
    }
}

fn fetch_local(vm: &mut Vm) -> Result<(), ErrorKind> {
    let reference = vm.pop()?;
    match reference.decode() {
        Ok((Tag::Local, slot)) => {
            let cell = vm
                .memory
                .read_cell(Segment::RStack, vm.bp + slot as usize * CELL_SIZE)?;
            vm.push(cell)
        }
        Ok((tag, _)) => Err(ErrorKind::BadTag(tag as u8)),
        Err(e) => Err(e),
    }
}

fn step(vm: &mut Vm, op: Opcode) -> Result<(), ErrorKind> {
    match op {
        Opcode::LiteralNumber => {
            let n = vm.memory.read_f32(Segment::Code, vm.ip)?;
            vm.ip += 4;
            vm.push(Cell::number(n))
        }
        Opcode::LiteralString => {
            let offset = vm.memory.read_u16(Segment::Code, vm.ip)?;
            vm.ip += 2;
            vm.push(Cell::tagged(Tag::Str, offset as u32)?)
        }
        Opcode::LiteralCode => {
            let addr = vm.memory.read_u16(Segment::Code, vm.ip)?;
            vm.ip += 2;
            vm.push(Cell::tagged(Tag::Code, addr as u32)?)
        }
        Opcode::Branch => {
            let offset = vm.memory.read_i16(Segment::Code, vm.ip)?;
            vm.ip = branch_target(vm.ip, offset);
            Ok(())
        }
        Opcode::IfFalseBranch => {
            let offset = vm.memory.read_i16(Segment::Code, vm.ip)?;
            let condition = vm.pop_unit()?;
            let truthy = condition.len() > 1 || condition[0].is_truthy();
            if truthy {
                vm.ip += 2;
            } else {
                vm.ip = branch_target(vm.ip, offset);
            }
            Ok(())
        }
        Opcode::BranchCall => {
            let offset = vm.memory.read_i16(Segment::Code, vm.ip)?;
            let body = vm.ip + 2;
            vm.push(Cell::tagged(Tag::Code, body as u32)?)?;
            vm.ip = branch_target(vm.ip, offset);
            Ok(())
        }
        Opcode::Call => {
            let addr = vm.memory.read_u16(Segment::Code, vm.ip)?;
            vm.ip += 2;
            call(vm, addr)
        }
        Opcode::Exit => exit(vm),
        Opcode::Eval => eval(vm),
        Opcode::Abort => {
            vm.running = false;
            Ok(())
        }
        Opcode::OpenList => list::open_list(vm),
        Opcode::CloseList => list::close_list(vm),
        Opcode::LocalRef => {
            let slot = vm.memory.read_u8(Segment::Code, vm.ip)?;
            vm.ip += 1;
            vm.push(Cell::tagged(Tag::Local, slot as u32)?)
        }
        Opcode::Fetch => fetch_local(vm),

        Opcode::Dup => stackops::dup(vm),
        Opcode::Drop => stackops::drop_top(vm),
        Opcode::Swap => stackops::swap(vm),
        Opcode::Over => stackops::over(vm),
        Opcode::Rot => stackops::rot(vm),
        Opcode::Nip => stackops::nip(vm),
        Opcode::Tuck => stackops::tuck(vm),

        Opcode::Add => arith::binary(vm, |a, b| a + b),
        Opcode::Minus => arith::binary(vm, |a, b| a - b),
        Opcode::Multiply => arith::binary(vm, |a, b| a * b),
        Opcode::Divide => arith::binary(vm, |a, b| a / b),
        Opcode::Mod => arith::binary(vm, |a, b| a % b),
        Opcode::Neg => arith::unary(vm, |a| -a),
        Opcode::Abs => arith::unary(vm, f32::abs),
        Opcode::Min => arith::binary(vm, f32::min),
        Opcode::Max => arith::binary(vm, f32::max),

        Opcode::Eq => arith::compare(vm, |a, b| a == b),
        Opcode::Lt => arith::compare(vm, |a, b| a < b),
        Opcode::Gt => arith::compare(vm, |a, b| a > b),
        Opcode::Le => arith::compare(vm, |a, b| a <= b),
        Opcode::Ge => arith::compare(vm, |a, b| a >= b),

        Opcode::Concat => list::concat(vm),
        Opcode::LengthOf => list::length_of(vm),
        Opcode::GetAt => list::get_at(vm),
        Opcode::Print => list::print(vm),
    }
}

/// Branch offsets are relative to the byte after the 16-bit offset itself.
fn branch_target(ip: usize, offset: i16) -> usize {
    (ip as i64 + 2 + offset as i64) as usize
}
