//! The VM Value Type
//!
//! One [`Vm`] owns everything: the segmented byte buffer, the heap, the
//! string digest, the symbol table, the user-definition registry, and the
//! registers. There are no globals anywhere in the core; embedders create as
//! many independent machines as they need (one per thread — a VM is
//! single-threaded by design).
//!
//! Registers are byte offsets into their segments: SP/RP grow upward from 0,
//! IP walks the CODE segment, BP marks the active frame's base on RSTACK,
//! CP is where the compiler writes next, and BCP is the start of the most
//! recent top-level compilation unit. `interpret` compiles one unit from
//! BCP, runs it, and reclaims the scratch bytecode unless the unit installed
//! definitions.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use tacit_core::cell::Tag;
use tacit_core::memory::{CELL_SIZE, RSTACK_SIZE, STACK_SIZE};
use tacit_core::{Cell, Digest, ErrorKind, Heap, Memory, Segment, SymbolTable, VmError};

use crate::compiler::compile_unit;
use crate::include::{IncludeHost, NullHost};
use crate::interp::run;
use crate::opcode::{Opcode, Registry};

pub struct Vm {
    pub memory: Memory,
    pub heap: Heap,
    pub digest: Digest,
    pub symbols: SymbolTable,
    pub registry: Registry,

    /// Data stack pointer (byte offset into STACK; next free slot).
    pub sp: usize,
    /// Return stack pointer (byte offset into RSTACK; next free slot).
    pub rp: usize,
    /// Instruction pointer (byte offset into CODE).
    pub ip: usize,
    /// Base pointer of the active frame (byte offset into RSTACK).
    pub bp: usize,
    /// Compile pointer: where the next byte lands in CODE.
    pub cp: usize,
    /// Base compile pointer: start of the current top-level unit.
    pub bcp: usize,
    pub running: bool,

    /// Canonical paths already included (or mid-include) this session.
    pub(crate) included: HashSet<PathBuf>,
    /// Stack of canonical paths currently being compiled, for resolving
    /// relative includes.
    pub(crate) include_stack: Vec<PathBuf>,
}

impl Vm {
    pub fn new() -> Result<Self, ErrorKind> {
        let mut memory = Memory::new();
        let heap = Heap::new(&mut memory)?;
        let mut vm = Vm {
            memory,
            heap,
            digest: Digest::new(),
            symbols: SymbolTable::new(),
            registry: Registry::new(),
            sp: 0,
            rp: 0,
            ip: 0,
            bp: 0,
            cp: 0,
            bcp: 0,
            running: false,
            included: HashSet::new(),
            include_stack: Vec::new(),
        };
        vm.install_builtins();
        Ok(vm)
    }

    fn install_builtins(&mut self) {
        let words: &[(&str, Opcode)] = &[
            ("eval", Opcode::Eval),
            ("abort", Opcode::Abort),
            ("dup", Opcode::Dup),
            ("drop", Opcode::Drop),
            ("swap", Opcode::Swap),
            ("over", Opcode::Over),
            ("rot", Opcode::Rot),
            ("nip", Opcode::Nip),
            ("tuck", Opcode::Tuck),
            ("add", Opcode::Add),
            ("sub", Opcode::Minus),
            ("mul", Opcode::Multiply),
            ("div", Opcode::Divide),
            ("mod", Opcode::Mod),
            ("neg", Opcode::Neg),
            ("abs", Opcode::Abs),
            ("min", Opcode::Min),
            ("max", Opcode::Max),
            ("+", Opcode::Add),
            ("-", Opcode::Minus),
            ("*", Opcode::Multiply),
            ("/", Opcode::Divide),
            ("eq", Opcode::Eq),
            ("lt", Opcode::Lt),
            ("gt", Opcode::Gt),
            ("le", Opcode::Le),
            ("ge", Opcode::Ge),
            ("concat", Opcode::Concat),
            ("length", Opcode::LengthOf),
            ("get", Opcode::GetAt),
            ("print", Opcode::Print),
        ];
        for &(name, op) in words {
            self.symbols.define_builtin(name, op as u8);
        }
        // Parse-time directives: these never compile to a call.
        for name in ["if", "else", "when", "do", "include"] {
            self.symbols.define_immediate(name);
        }
    }

    // =========================================================================
    // Data stack
    // =========================================================================

    pub fn push(&mut self, cell: Cell) -> Result<(), ErrorKind> {
        if self.sp + CELL_SIZE > STACK_SIZE {
            return Err(ErrorKind::StackOverflow);
        }
        self.memory.write_cell(Segment::Stack, self.sp, cell)?;
        self.sp += CELL_SIZE;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Cell, ErrorKind> {
        if self.sp < CELL_SIZE {
            return Err(ErrorKind::StackUnderflow);
        }
        self.sp -= CELL_SIZE;
        self.memory.read_cell(Segment::Stack, self.sp)
    }

    pub fn peek(&self) -> Result<Cell, ErrorKind> {
        if self.sp < CELL_SIZE {
            return Err(ErrorKind::StackUnderflow);
        }
        self.memory.read_cell(Segment::Stack, self.sp - CELL_SIZE)
    }

    /// Number of cells on the data stack.
    pub fn depth(&self) -> usize {
        self.sp / CELL_SIZE
    }

    /// The data stack bottom-up, for error reports and the REPL echo.
    pub fn stack_snapshot(&self) -> Vec<Cell> {
        let mut out = Vec::with_capacity(self.depth());
        let mut offset = 0;
        while offset < self.sp {
            if let Ok(cell) = self.memory.read_cell(Segment::Stack, offset) {
                out.push(cell);
            }
            offset += CELL_SIZE;
        }
        out
    }

    // =========================================================================
    // Return stack
    // =========================================================================

    pub fn rpush(&mut self, cell: Cell) -> Result<(), ErrorKind> {
        if self.rp + CELL_SIZE > RSTACK_SIZE {
            return Err(ErrorKind::ReturnStackOverflow);
        }
        self.memory.write_cell(Segment::RStack, self.rp, cell)?;
        self.rp += CELL_SIZE;
        Ok(())
    }

    pub fn rpop(&mut self) -> Result<Cell, ErrorKind> {
        if self.rp < CELL_SIZE {
            return Err(ErrorKind::ReturnStackUnderflow);
        }
        self.rp -= CELL_SIZE;
        self.memory.read_cell(Segment::RStack, self.rp)
    }

    /// True iff any open-list marker is live on the return stack.
    pub(crate) fn has_open_list(&self) -> bool {
        let mut offset = 0;
        while offset < self.rp {
            if let Ok(cell) = self.memory.read_cell(Segment::RStack, offset) {
                if cell.has_tag(Tag::Sentinel) {
                    return true;
                }
            }
            offset += CELL_SIZE;
        }
        false
    }

    // =========================================================================
    // List-aware units
    // =========================================================================

    /// Cells occupied by the value on top of the stack: one for a simple
    /// cell, the whole span (payload + header + trailer) when a LINK is on
    /// top.
    pub fn unit_span(&self) -> Result<usize, ErrorKind> {
        let top = self.peek()?;
        if top.has_tag(Tag::Link) {
            Ok(top.payload()? as usize + 1)
        } else {
            Ok(1)
        }
    }

    /// Pop one value as a unit, bottom-up.
    pub fn pop_unit(&mut self) -> Result<Vec<Cell>, ErrorKind> {
        let span = self.unit_span()?;
        if self.depth() < span {
            return Err(ErrorKind::StackUnderflow);
        }
        let base = self.sp - span * CELL_SIZE;
        let mut cells = Vec::with_capacity(span);
        for i in 0..span {
            cells.push(self.memory.read_cell(Segment::Stack, base + i * CELL_SIZE)?);
        }
        self.sp = base;
        Ok(cells)
    }

    pub fn push_unit(&mut self, cells: &[Cell]) -> Result<(), ErrorKind> {
        for &cell in cells {
            self.push(cell)?;
        }
        Ok(())
    }

    // =========================================================================
    // Top-level driver
    // =========================================================================

    /// Compile and run one source unit with no include host.
    pub fn interpret(&mut self, source: &str) -> Result<(), VmError> {
        let mut host = NullHost;
        self.interpret_with_host(source, &mut host)
    }

    /// Compile one unit starting at BCP, execute it, and reclaim the
    /// bytecode unless the unit installed definitions. On a compile error CP
    /// stays where the failure left it, per the single-pass contract.
    pub fn interpret_with_host(
        &mut self,
        source: &str,
        host: &mut dyn IncludeHost,
    ) -> Result<(), VmError> {
        self.bcp = self.cp;
        let preserve =
            compile_unit(self, source, host).map_err(|kind| self.error(kind))?;
        self.ip = self.bcp;
        run(self).map_err(|kind| self.error(kind))?;
        if preserve {
            self.bcp = self.cp;
        } else {
            self.cp = self.bcp;
        }
        debug!(cp = self.cp, sp = self.sp, "unit finished");
        Ok(())
    }

    pub(crate) fn error(&self, kind: ErrorKind) -> VmError {
        VmError::new(kind, self.stack_snapshot())
    }

    /// Clear both stacks and the halt flag. Compiled code, definitions, the
    /// digest, and the heap survive.
    pub fn reset_stacks(&mut self) {
        self.sp = 0;
        self.rp = 0;
        self.bp = 0;
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut vm = Vm::new().unwrap();
        vm.push(Cell::number(1.5)).unwrap();
        vm.push(Cell::number(2.5)).unwrap();
        assert_eq!(vm.depth(), 2);
        assert_eq!(vm.pop().unwrap().to_number().unwrap(), 2.5);
        assert_eq!(vm.pop().unwrap().to_number().unwrap(), 1.5);
        assert_eq!(vm.pop().unwrap_err(), ErrorKind::StackUnderflow);
    }

    #[test]
    fn test_stack_overflow() {
        let mut vm = Vm::new().unwrap();
        for _ in 0..STACK_SIZE / CELL_SIZE {
            vm.push(Cell::number(0.0)).unwrap();
        }
        assert_eq!(
            vm.push(Cell::number(0.0)).unwrap_err(),
            ErrorKind::StackOverflow
        );
    }

    #[test]
    fn test_return_stack_is_separate() {
        let mut vm = Vm::new().unwrap();
        vm.push(Cell::number(1.0)).unwrap();
        vm.rpush(Cell::number(9.0)).unwrap();
        assert_eq!(vm.depth(), 1);
        assert_eq!(vm.rpop().unwrap().to_number().unwrap(), 9.0);
        assert_eq!(vm.rpop().unwrap_err(), ErrorKind::ReturnStackUnderflow);
    }

    #[test]
    fn test_snapshot_is_bottom_up() {
        let mut vm = Vm::new().unwrap();
        for n in [1.0, 2.0, 3.0] {
            vm.push(Cell::number(n)).unwrap();
        }
        let snap = vm.stack_snapshot();
        let values: Vec<f32> = snap.iter().map(|c| c.to_number().unwrap()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_unit_span_simple_and_list() {
        let mut vm = Vm::new().unwrap();
        vm.push(Cell::number(7.0)).unwrap();
        assert_eq!(vm.unit_span().unwrap(), 1);

        // Hand-build ( 1 2 ): header, payload, trailer.
        vm.push(Cell::tagged(Tag::List, 2).unwrap()).unwrap();
        vm.push(Cell::number(1.0)).unwrap();
        vm.push(Cell::number(2.0)).unwrap();
        vm.push(Cell::tagged(Tag::Link, 3).unwrap()).unwrap();
        assert_eq!(vm.unit_span().unwrap(), 4);

        let unit = vm.pop_unit().unwrap();
        assert_eq!(unit.len(), 4);
        assert!(unit[0].has_tag(Tag::List));
        assert!(unit[3].has_tag(Tag::Link));
        // The 7 below is untouched.
        assert_eq!(vm.peek().unwrap().to_number().unwrap(), 7.0);
    }

    #[test]
    fn test_builtin_words_are_installed() {
        let vm = Vm::new().unwrap();
        for name in ["dup", "drop", "swap", "add", "sub", "eval", "concat"] {
            assert!(vm.symbols.is_defined(name), "missing builtin `{name}`");
        }
        for name in ["if", "else", "when", "do", "include"] {
            assert!(
                matches!(
                    vm.symbols.lookup(name),
                    Some(tacit_core::WordRef::Immediate)
                ),
                "`{name}` must be immediate"
            );
        }
    }
}
