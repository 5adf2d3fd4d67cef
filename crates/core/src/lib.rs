//! TACIT VM substrate
//!
//! The pieces of the virtual machine that know nothing about bytecode:
//! NaN-boxed cells, the segmented byte buffer, the string digest, the symbol
//! table, and the reference-counted block heap with its copy-on-write
//! vectors. The execution engine (opcodes, compiler, interpreter) lives in
//! `tacit-vm` on top of this crate.

pub mod cell;
pub mod digest;
pub mod error;
pub mod heap;
pub mod memory;
pub mod symbols;
pub mod vector;

pub use cell::{Cell, HeapKind, Tag};
pub use digest::Digest;
pub use error::{ErrorKind, VmError};
pub use heap::Heap;
pub use memory::{Memory, Segment};
pub use symbols::{SymbolTable, WordRef};
