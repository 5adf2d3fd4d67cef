//! Chained-Block Vectors
//!
//! A vector is a logical sequence of cells stored across one or more heap
//! blocks. Every block reserves 4 bytes after the block header; the first
//! block keeps the logical length there, so cells start at byte 8 and each
//! block holds [`CELLS_PER_BLOCK`] of them. An empty vector still occupies
//! one block.
//!
//! Vectors are immutable by contract: `update` never touches the chain the
//! caller passed in. It builds a fresh path down to the target block through
//! `copy_on_write` (the temporary reference taken on the head makes every
//! block on the path shared) and shares the untouched tail, so the old head
//! keeps reading the old value and the returned head reads the new one.

use crate::cell::{Cell, HeapKind};
use crate::error::ErrorKind;
use crate::heap::{BLOCK_HEADER, Heap, NULL_BLOCK, USABLE};
use crate::memory::{CELL_SIZE, Memory, Segment};

/// Cells per block: the 60 usable bytes minus the 4 reserved ones.
pub const CELLS_PER_BLOCK: usize = (USABLE - 4) / CELL_SIZE;

/// Byte offset of the logical length within the first block.
const LENGTH_OFFSET: usize = BLOCK_HEADER;

/// Byte offset of the first cell within any block.
const CELLS_OFFSET: usize = BLOCK_HEADER + 4;

fn cell_slot(addr: u16, index: usize) -> usize {
    addr as usize + CELLS_OFFSET + index * CELL_SIZE
}

fn vector_addr(vec: Cell) -> Result<u16, ErrorKind> {
    match vec.heap_ref()? {
        (HeapKind::Vector, addr) => Ok(addr),
        (kind, _) => Err(ErrorKind::BadTag(kind as u8)),
    }
}

/// Allocate a vector holding `data`. Returns NIL when the heap cannot cover
/// the request.
pub fn create(heap: &mut Heap, memory: &mut Memory, data: &[Cell]) -> Result<Cell, ErrorKind> {
    let blocks = data.len().div_ceil(CELLS_PER_BLOCK).max(1);
    let Some(head) = heap.alloc_blocks(memory, blocks)? else {
        return Ok(Cell::nil());
    };
    memory.write_u16(Segment::Heap, head as usize + LENGTH_OFFSET, data.len() as u16)?;
    let mut block = head;
    for (i, &cell) in data.iter().enumerate() {
        if i > 0 && i % CELLS_PER_BLOCK == 0 {
            block = heap.next_of(memory, block)?;
        }
        memory.write_cell(Segment::Heap, cell_slot(block, i % CELLS_PER_BLOCK), cell)?;
    }
    Cell::heap(HeapKind::Vector, head)
}

/// Logical length of a vector.
pub fn length(memory: &Memory, vec: Cell) -> Result<usize, ErrorKind> {
    let addr = vector_addr(vec)?;
    Ok(memory.read_u16(Segment::Heap, addr as usize + LENGTH_OFFSET)? as usize)
}

/// Read the cell at `index`, or NIL when the index is out of range.
pub fn get(heap: &Heap, memory: &Memory, vec: Cell, index: i64) -> Result<Cell, ErrorKind> {
    let addr = vector_addr(vec)?;
    let len = memory.read_u16(Segment::Heap, addr as usize + LENGTH_OFFSET)? as i64;
    if index < 0 || index >= len {
        return Ok(Cell::nil());
    }
    let index = index as usize;
    let mut block = addr;
    for _ in 0..index / CELLS_PER_BLOCK {
        block = heap.next_of(memory, block)?;
        if block == NULL_BLOCK {
            return Err(ErrorKind::NullDeref);
        }
    }
    memory.read_cell(Segment::Heap, cell_slot(block, index % CELLS_PER_BLOCK))
}

/// Write `value` at `index`, returning the head of a vector that observes
/// the change. The chain behind the caller's head is never mutated; blocks
/// from the head down to the target are copied on write and the tail beyond
/// the target is shared. Returns NIL when the index is out of range or the
/// heap cannot supply the copies.
pub fn update(
    heap: &mut Heap,
    memory: &mut Memory,
    vec: Cell,
    index: i64,
    value: Cell,
) -> Result<Cell, ErrorKind> {
    let addr = vector_addr(vec)?;
    let len = memory.read_u16(Segment::Heap, addr as usize + LENGTH_OFFSET)? as i64;
    if index < 0 || index >= len {
        return Ok(Cell::nil());
    }
    let index = index as usize;

    // The temporary reference makes the whole path read as shared, which is
    // exactly what forces copy_on_write to build the new path.
    heap.incref(memory, addr)?;

    let mut prev: Option<u16> = None;
    let mut block = addr;
    let mut new_head: Option<u16> = None;
    let mut hops = index / CELLS_PER_BLOCK;
    let target = loop {
        let Some(cur) = heap.copy_on_write(memory, block, prev)? else {
            // Out of blocks mid-path: release the partial copy and the
            // temporary reference, and report exhaustion as a sentinel.
            if let Some(h) = new_head {
                heap.decref(memory, h)?;
            }
            heap.decref(memory, addr)?;
            return Ok(Cell::nil());
        };
        if new_head.is_none() {
            new_head = Some(cur);
        }
        if hops == 0 {
            break cur;
        }
        prev = Some(cur);
        block = heap.next_of(memory, cur)?;
        if block == NULL_BLOCK {
            return Err(ErrorKind::NullDeref);
        }
        hops -= 1;
    };

    memory.write_cell(
        Segment::Heap,
        cell_slot(target, index % CELLS_PER_BLOCK),
        value,
    )?;
    heap.decref(memory, addr)?;
    // new_head is always set: the first copy_on_write either returned or
    // recorded it.
    Cell::heap(HeapKind::Vector, new_head.unwrap_or(target))
}
