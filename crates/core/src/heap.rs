//! Reference-Counted Block Heap
//!
//! The HEAP segment is divided into fixed 64-byte blocks. Each block starts
//! with a 4-byte header: a next-block pointer (u16, [`NULL_BLOCK`] when
//! absent) and a reference count (u16). Large objects chain blocks through
//! the next pointer; every block in a chain carries its own refcount.
//!
//! Free blocks have refcount 0 and are threaded into a free list through the
//! same next pointer. Allocation takes blocks off the free list in pop order
//! and chains them — physical contiguity is not required, the chain is the
//! structure. Allocation failure is reported as `None`, never an error;
//! refcount corruption and NULL dereference are fatal.
//!
//! `copy_on_write` clones a shared block before mutation: the clone gets
//! refcount 1 and independent content, the original's next block gains a
//! reference (structural sharing of the tail), and when a predecessor is
//! supplied its next pointer is rewired to the clone while the original
//! loses the predecessor's reference.

use tracing::trace;

use crate::error::ErrorKind;
use crate::memory::{HEAP_SIZE, Memory, Segment};

/// Size of one heap block in bytes.
pub const BLOCK_SIZE: usize = 64;

/// Bytes of block header: next pointer + refcount.
pub const BLOCK_HEADER: usize = 4;

/// Usable payload bytes per block.
pub const USABLE: usize = BLOCK_SIZE - BLOCK_HEADER;

/// Number of blocks in the HEAP segment.
pub const BLOCK_COUNT: usize = HEAP_SIZE / BLOCK_SIZE;

/// The absent block.
pub const NULL_BLOCK: u16 = 0xFFFF;

const NEXT_OFFSET: usize = 0;
const REFCOUNT_OFFSET: usize = 2;

pub struct Heap {
    free_head: u16,
    free_count: usize,
}

impl Heap {
    /// Thread every block of the HEAP segment into the free list.
    pub fn new(memory: &mut Memory) -> Result<Self, ErrorKind> {
        for i in 0..BLOCK_COUNT {
            let addr = (i * BLOCK_SIZE) as u16;
            let next = if i + 1 < BLOCK_COUNT {
                ((i + 1) * BLOCK_SIZE) as u16
            } else {
                NULL_BLOCK
            };
            memory.write_u16(Segment::Heap, addr as usize + NEXT_OFFSET, next)?;
            memory.write_u16(Segment::Heap, addr as usize + REFCOUNT_OFFSET, 0)?;
        }
        Ok(Heap {
            free_head: 0,
            free_count: BLOCK_COUNT,
        })
    }

    fn check_block(addr: u16) -> Result<(), ErrorKind> {
        if addr == NULL_BLOCK {
            return Err(ErrorKind::NullDeref);
        }
        if addr as usize >= HEAP_SIZE || addr as usize % BLOCK_SIZE != 0 {
            return Err(ErrorKind::SegmentViolation {
                segment: Segment::Heap,
                offset: addr as usize,
                width: BLOCK_SIZE,
            });
        }
        Ok(())
    }

    /// Next-block pointer of `addr`.
    pub fn next_of(&self, memory: &Memory, addr: u16) -> Result<u16, ErrorKind> {
        Self::check_block(addr)?;
        memory.read_u16(Segment::Heap, addr as usize + NEXT_OFFSET)
    }

    /// Reference count of `addr`.
    pub fn refcount(&self, memory: &Memory, addr: u16) -> Result<u16, ErrorKind> {
        Self::check_block(addr)?;
        memory.read_u16(Segment::Heap, addr as usize + REFCOUNT_OFFSET)
    }

    /// Rewire `parent.next` to `child`, increffing the new child and
    /// decreffing the old one.
    pub fn set_next(
        &mut self,
        memory: &mut Memory,
        parent: u16,
        child: u16,
    ) -> Result<(), ErrorKind> {
        let old = self.next_of(memory, parent)?;
        if child != NULL_BLOCK {
            self.incref(memory, child)?;
        }
        memory.write_u16(Segment::Heap, parent as usize + NEXT_OFFSET, child)?;
        if old != NULL_BLOCK {
            self.decref(memory, old)?;
        }
        Ok(())
    }

    pub fn incref(&mut self, memory: &mut Memory, addr: u16) -> Result<(), ErrorKind> {
        let rc = self.refcount(memory, addr)?;
        if rc == u16::MAX {
            return Err(ErrorKind::OutOfRange {
                value: rc as i64,
                what: "refcount increment",
            });
        }
        memory.write_u16(Segment::Heap, addr as usize + REFCOUNT_OFFSET, rc + 1)
    }

    /// Drop one reference. A block reaching refcount 0 releases its
    /// reference on the next block (iteratively down the chain) and returns
    /// to the free list.
    pub fn decref(&mut self, memory: &mut Memory, addr: u16) -> Result<(), ErrorKind> {
        let mut cur = addr;
        while cur != NULL_BLOCK {
            let rc = self.refcount(memory, cur)?;
            if rc == 0 {
                // Dropping a reference on a free block means the graph is
                // already inconsistent.
                return Err(ErrorKind::OutOfRange {
                    value: 0,
                    what: "refcount decrement",
                });
            }
            if rc > 1 {
                memory.write_u16(Segment::Heap, cur as usize + REFCOUNT_OFFSET, rc - 1)?;
                break;
            }
            let next = self.next_of(memory, cur)?;
            trace!(block = cur, "heap block freed");
            memory.write_u16(Segment::Heap, cur as usize + REFCOUNT_OFFSET, 0)?;
            memory.write_u16(Segment::Heap, cur as usize + NEXT_OFFSET, self.free_head)?;
            self.free_head = cur;
            self.free_count += 1;
            cur = next;
        }
        Ok(())
    }

    /// Release a chain; alias for [`Heap::decref`].
    pub fn free(&mut self, memory: &mut Memory, addr: u16) -> Result<(), ErrorKind> {
        self.decref(memory, addr)
    }

    fn pop_free(&mut self, memory: &Memory) -> Result<Option<u16>, ErrorKind> {
        if self.free_head == NULL_BLOCK {
            return Ok(None);
        }
        let addr = self.free_head;
        self.free_head = memory.read_u16(Segment::Heap, addr as usize + NEXT_OFFSET)?;
        self.free_count -= 1;
        Ok(Some(addr))
    }

    fn push_free(&mut self, memory: &mut Memory, addr: u16) -> Result<(), ErrorKind> {
        memory.write_u16(Segment::Heap, addr as usize + REFCOUNT_OFFSET, 0)?;
        memory.write_u16(Segment::Heap, addr as usize + NEXT_OFFSET, self.free_head)?;
        self.free_head = addr;
        self.free_count += 1;
        Ok(())
    }

    /// Allocate a chain of `count` blocks, each with refcount 1, linked in
    /// order with the last block's next set to NULL. Returns the first
    /// block's address, or `None` when the free list cannot cover the
    /// request (nothing is consumed in that case).
    pub fn alloc_blocks(
        &mut self,
        memory: &mut Memory,
        count: usize,
    ) -> Result<Option<u16>, ErrorKind> {
        if count == 0 || count > self.free_count {
            return Ok(None);
        }
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.pop_free(memory)? {
                Some(addr) => blocks.push(addr),
                None => {
                    for addr in blocks {
                        self.push_free(memory, addr)?;
                    }
                    return Ok(None);
                }
            }
        }
        for (i, &addr) in blocks.iter().enumerate() {
            let next = blocks.get(i + 1).copied().unwrap_or(NULL_BLOCK);
            memory.write_u16(Segment::Heap, addr as usize + NEXT_OFFSET, next)?;
            memory.write_u16(Segment::Heap, addr as usize + REFCOUNT_OFFSET, 1)?;
        }
        trace!(first = blocks[0], count, "heap chain allocated");
        Ok(Some(blocks[0]))
    }

    /// Allocate enough chained blocks to hold `byte_count` payload bytes.
    pub fn alloc(&mut self, memory: &mut Memory, byte_count: usize) -> Result<Option<u16>, ErrorKind> {
        let count = byte_count.div_ceil(USABLE).max(1);
        self.alloc_blocks(memory, count)
    }

    /// Copy one block: the clone gets independent content, refcount 1, and a
    /// reference on the original's next block (shared tail). `None` when the
    /// heap is exhausted.
    pub fn clone_block(
        &mut self,
        memory: &mut Memory,
        addr: u16,
    ) -> Result<Option<u16>, ErrorKind> {
        Self::check_block(addr)?;
        let Some(clone) = self.pop_free(memory)? else {
            return Ok(None);
        };
        memory.copy_within_segment(Segment::Heap, addr as usize, clone as usize, BLOCK_SIZE)?;
        memory.write_u16(Segment::Heap, clone as usize + REFCOUNT_OFFSET, 1)?;
        let next = self.next_of(memory, addr)?;
        if next != NULL_BLOCK {
            self.incref(memory, next)?;
        }
        Ok(Some(clone))
    }

    /// Clone `addr` if it is shared. When a clone happens and `prev` is
    /// supplied, `prev.next` is rewired to the clone and the original loses
    /// the predecessor's reference. Returns the block the caller should use,
    /// or `None` when a needed clone could not be allocated.
    pub fn copy_on_write(
        &mut self,
        memory: &mut Memory,
        addr: u16,
        prev: Option<u16>,
    ) -> Result<Option<u16>, ErrorKind> {
        if self.refcount(memory, addr)? <= 1 {
            return Ok(Some(addr));
        }
        let Some(clone) = self.clone_block(memory, addr)? else {
            return Ok(None);
        };
        if let Some(parent) = prev {
            memory.write_u16(Segment::Heap, parent as usize + NEXT_OFFSET, clone)?;
            self.decref(memory, addr)?;
        }
        Ok(Some(clone))
    }

    /// Bytes currently on the free list.
    pub fn available(&self) -> usize {
        self.free_count * BLOCK_SIZE
    }
}
