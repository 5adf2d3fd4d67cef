//! The Stack-Resident List Protocol
//!
//! Lists live on the data stack, not the heap. A list occupies a contiguous
//! span: a LIST header (payload = slot count), the payload cells above it,
//! and — for the outermost list only — a LINK trailer on top whose payload
//! is the distance back down to the header, counting the header:
//!
//! ```text
//! ( 1 ( 2 3 ) 4 )   →   LIST:5  1  LIST:2  2  3  4  LINK:6
//!                       bottom ───────────────────────▲ top
//! ```
//!
//! `OpenList` pushes a zeroed header and records its position on the return
//! stack; `CloseList` patches the slot count in place, which is what lets a
//! variable-sized list close without moving anything. A nested close leaves
//! its LINK off — the inner header is an ordinary payload cell of the outer
//! list, inflating its slot count by the inner header + payload.
//!
//! Nested lists count as single elements everywhere: concatenation splices
//! payloads flat but never splices a nested list open, and indexing walks
//! element by element, skipping nested spans whole.

use tacit_core::cell::Tag;
use tacit_core::memory::CELL_SIZE;
use tacit_core::{Cell, ErrorKind, Segment};

use crate::builtins::arith::number_operand;
use crate::format::format_unit;
use crate::vm::Vm;

pub fn open_list(vm: &mut Vm) -> Result<(), ErrorKind> {
    let header_sp = vm.sp;
    vm.push(Cell::tagged(Tag::List, 0)?)?;
    vm.rpush(Cell::tagged(Tag::Sentinel, header_sp as u32)?)
}

pub fn close_list(vm: &mut Vm) -> Result<(), ErrorKind> {
    let marker = vm.rpop()?;
    let header_sp = match marker.decode() {
        Ok((Tag::Sentinel, sp)) => sp as usize,
        Ok((tag, _)) => return Err(ErrorKind::BadTag(tag as u8)),
        Err(e) => return Err(e),
    };
    if vm.sp <= header_sp {
        return Err(ErrorKind::StackUnderflow);
    }
    let slots = (vm.sp - header_sp) / CELL_SIZE - 1;
    vm.memory
        .write_cell(Segment::Stack, header_sp, Cell::tagged(Tag::List, slots as u32)?)?;
    // Inside an enclosing open list this span is a plain payload region; only
    // the outermost close gets the trailer.
    if !vm.has_open_list() {
        vm.push(Cell::tagged(Tag::Link, slots as u32 + 1)?)?;
    }
    Ok(())
}

/// A complete top-level list unit: header, payload, trailer.
fn is_list(unit: &[Cell]) -> bool {
    unit.len() >= 2 && unit[0].has_tag(Tag::List) && unit[unit.len() - 1].has_tag(Tag::Link)
}

fn payload(unit: &[Cell]) -> &[Cell] {
    &unit[1..unit.len() - 1]
}

/// (start, span) of each element in a payload; nested lists span their
/// header plus their own slots.
fn element_spans(payload: &[Cell]) -> Result<Vec<(usize, usize)>, ErrorKind> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < payload.len() {
        let span = if payload[i].has_tag(Tag::List) {
            payload[i].payload()? as usize + 1
        } else {
            1
        };
        if i + span > payload.len() {
            return Err(ErrorKind::SyntaxError(
                "list payload is shorter than its headers claim".into(),
            ));
        }
        spans.push((i, span));
        i += span;
    }
    Ok(spans)
}

fn build_list(parts: &[&[Cell]]) -> Result<Vec<Cell>, ErrorKind> {
    let slots: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(slots + 2);
    out.push(Cell::tagged(Tag::List, slots as u32)?);
    for part in parts {
        out.extend_from_slice(part);
    }
    out.push(Cell::tagged(Tag::Link, slots as u32 + 1)?);
    Ok(out)
}

/// `concat` joins two values into a list: two simples become a pair, a
/// simple joins a list as one new element, and two lists concatenate their
/// payloads flat (nested elements stay intact). Concatenating the empty
/// list is the identity on the other operand's elements.
pub fn concat(vm: &mut Vm) -> Result<(), ErrorKind> {
    let right = vm.pop_unit()?;
    let left = vm.pop_unit()?;
    let left_part: &[Cell] = if is_list(&left) {
        payload(&left)
    } else {
        &left
    };
    let right_part: &[Cell] = if is_list(&right) {
        payload(&right)
    } else {
        &right
    };
    let result = build_list(&[left_part, right_part])?;
    vm.push_unit(&result)
}

/// `length`: element count of a list, byte length of a string.
pub fn length_of(vm: &mut Vm) -> Result<(), ErrorKind> {
    let unit = vm.pop_unit()?;
    if is_list(&unit) {
        let count = element_spans(payload(&unit))?.len();
        return vm.push(Cell::int(count as i32)?);
    }
    match unit[0].decode() {
        Ok((Tag::Str, offset)) => {
            let len = vm.digest.length(&vm.memory, offset as u16)?;
            vm.push(Cell::int(len as i32)?)
        }
        Ok((tag, _)) => Err(ErrorKind::BadTag(tag as u8)),
        Err(e) => Err(e),
    }
}

/// `get` ( list index -- element ): walk to the element, NIL out of range.
/// A nested list comes back as a complete unit with its own trailer.
pub fn get_at(vm: &mut Vm) -> Result<(), ErrorKind> {
    let index = number_operand(vm.pop()?)? as i64;
    let unit = vm.pop_unit()?;
    if !is_list(&unit) {
        return Err(ErrorKind::BadTag(Tag::Link as u8));
    }
    let body = payload(&unit);
    let spans = element_spans(body)?;
    if index < 0 || index as usize >= spans.len() {
        return vm.push(Cell::nil());
    }
    let (start, span) = spans[index as usize];
    if span == 1 {
        vm.push(body[start])
    } else {
        vm.push_unit(&body[start..start + span])?;
        vm.push(Cell::tagged(Tag::Link, span as u32)?)
    }
}

/// `print` pops one value and writes its rendering to stdout.
pub fn print(vm: &mut Vm) -> Result<(), ErrorKind> {
    let unit = vm.pop_unit()?;
    let rendered = format_unit(vm, &unit)?;
    println!("{rendered}");
    Ok(())
}
