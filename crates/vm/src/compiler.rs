//! Single-Pass Compiler
//!
//! Consumes the token stream left to right and writes bytecode into the CODE
//! segment through CP. The compiler is the sole writer of CODE and never
//! executes bytecode; immediate words (`:`, `;`, `if`, `else`, `when`, `do`,
//! `include`) act right here as parser-time directives, while every other
//! word compiles to a call or a literal. The two categories never mix.
//!
//! Forward references are resolved by placeholder patching: emit a zeroed
//! 16-bit offset, remember its position, and write the real signed offset
//! (relative to the byte after the offset) once the target address is known.
//!
//! Open constructs are tracked on an explicit stack; `;` is the generic
//! closer and pops whatever is innermost — a colon definition, an `if`/
//! `else` arm, a `when` clause, or the `when` group itself.

use tracing::debug;

use tacit_core::memory::Segment;
use tacit_core::{ErrorKind, WordRef};

use crate::format::format_number;
use crate::include::IncludeHost;
use crate::lexer::{Lexer, Token};
use crate::opcode::{Opcode, encode_user_index};
use crate::vm::Vm;

enum Construct {
    Definition { name: String, placeholder: usize },
    Block { placeholder: usize },
    If { placeholder: usize },
    Else { placeholder: usize },
    When { exits: Vec<usize> },
    WhenClause { placeholder: usize },
}

pub struct Compiler<'a> {
    vm: &'a mut Vm,
    host: &'a mut dyn IncludeHost,
    constructs: Vec<Construct>,
    list_depth: usize,
    preserve: bool,
}

/// Compile one top-level unit at CP. Returns whether the unit installed
/// definitions (in which case the caller must keep its bytecode).
pub fn compile_unit(
    vm: &mut Vm,
    source: &str,
    host: &mut dyn IncludeHost,
) -> Result<bool, ErrorKind> {
    let mut compiler = Compiler {
        vm,
        host,
        constructs: Vec::new(),
        list_depth: 0,
        preserve: false,
    };
    compiler.compile_source(source, true)?;
    Ok(compiler.preserve)
}

impl Compiler<'_> {
    fn compile_source(&mut self, source: &str, top_level: bool) -> Result<(), ErrorKind> {
        let mut lexer = Lexer::new(source);
        self.compile_stream(&mut lexer, top_level)
    }

    fn compile_stream(&mut self, lexer: &mut Lexer, top_level: bool) -> Result<(), ErrorKind> {
        let construct_base = self.constructs.len();
        let list_base = self.list_depth;

        loop {
            match lexer.next_token()? {
                Token::Eof => break,
                Token::Number(n) => {
                    self.emit_op(Opcode::LiteralNumber)?;
                    self.emit_f32(n)?;
                }
                Token::Str(s) => self.emit_string_literal(&s)?,
                Token::WordQuote(s) => self.emit_string_literal(&s)?,
                Token::Symbol(name) => {
                    let addr = self
                        .vm
                        .symbols
                        .find_bytecode_address(&name)
                        .ok_or_else(|| ErrorKind::UnknownWord(name.clone()))?;
                    self.emit_op(Opcode::LiteralCode)?;
                    self.emit_u16(addr)?;
                }
                Token::BlockStart => {
                    self.emit_op(Opcode::BranchCall)?;
                    let placeholder = self.emit_placeholder()?;
                    self.constructs.push(Construct::Block { placeholder });
                }
                Token::BlockEnd => {
                    if self.constructs.len() <= construct_base {
                        return Err(ErrorKind::SyntaxError("`}` without `{`".into()));
                    }
                    match self.constructs.pop() {
                        Some(Construct::Block { placeholder }) => {
                            self.emit_op(Opcode::Exit)?;
                            self.patch_to_here(placeholder)?;
                        }
                        Some(other) => {
                            self.constructs.push(other);
                            return Err(ErrorKind::SyntaxError(
                                "`}` closes a construct it did not open".into(),
                            ));
                        }
                        None => unreachable!("length checked above"),
                    }
                }
                Token::Special(':') => self.begin_definition(lexer)?,
                Token::Special(';') => self.close_innermost(construct_base)?,
                Token::Special('(') => {
                    self.emit_op(Opcode::OpenList)?;
                    self.list_depth += 1;
                }
                Token::Special(')') => {
                    if self.list_depth <= list_base {
                        return Err(ErrorKind::UnexpectedClose);
                    }
                    self.emit_op(Opcode::CloseList)?;
                    self.list_depth -= 1;
                }
                Token::Special(other) => {
                    return Err(ErrorKind::SyntaxError(format!(
                        "unexpected `{other}`"
                    )));
                }
                Token::Word(w) => self.compile_word(&w, lexer)?,
            }
        }

        if self.constructs.len() > construct_base {
            return Err(match self.constructs.pop() {
                Some(Construct::Definition { name, .. }) => ErrorKind::UnclosedDefinition(name),
                Some(Construct::Block { .. }) => {
                    ErrorKind::SyntaxError("unclosed code block".into())
                }
                Some(Construct::If { .. }) | Some(Construct::Else { .. }) => {
                    ErrorKind::SyntaxError("`if` without closing `;`".into())
                }
                _ => ErrorKind::SyntaxError("`when` without closing `;`".into()),
            });
        }
        if self.list_depth > list_base {
            return Err(ErrorKind::SyntaxError("`(` without closing `)`".into()));
        }
        if top_level {
            self.emit_op(Opcode::Abort)?;
        }
        Ok(())
    }

    fn compile_word(&mut self, word: &str, lexer: &mut Lexer) -> Result<(), ErrorKind> {
        let binding = self
            .vm
            .symbols
            .lookup(word)
            .cloned()
            .ok_or_else(|| ErrorKind::UnknownWord(word.to_string()))?;
        match binding {
            WordRef::Immediate => self.directive(word, lexer),
            WordRef::Builtin { opcode } => self.emit_u8(opcode),
            WordRef::Definition { index, .. } => {
                let bytes = encode_user_index(index)?;
                self.emit_u8(bytes[0])?;
                self.emit_u8(bytes[1])
            }
            WordRef::CodeAddr { addr } => {
                self.emit_op(Opcode::Call)?;
                self.emit_u16(addr)
            }
            WordRef::Local { slot } => {
                self.emit_op(Opcode::LocalRef)?;
                self.emit_u8(slot)?;
                self.emit_op(Opcode::Fetch)
            }
        }
    }

    fn directive(&mut self, name: &str, lexer: &mut Lexer) -> Result<(), ErrorKind> {
        match name {
            "if" => {
                self.emit_op(Opcode::IfFalseBranch)?;
                let placeholder = self.emit_placeholder()?;
                self.constructs.push(Construct::If { placeholder });
                Ok(())
            }
            "else" => match self.constructs.pop() {
                Some(Construct::If { placeholder }) => {
                    self.emit_op(Opcode::Branch)?;
                    let exit = self.emit_placeholder()?;
                    self.patch_to_here(placeholder)?;
                    self.constructs.push(Construct::Else { placeholder: exit });
                    Ok(())
                }
                other => {
                    if let Some(c) = other {
                        self.constructs.push(c);
                    }
                    Err(ErrorKind::SyntaxError("`else` without `if`".into()))
                }
            },
            "when" => {
                self.constructs.push(Construct::When { exits: Vec::new() });
                Ok(())
            }
            "do" => {
                if !matches!(self.constructs.last(), Some(Construct::When { .. })) {
                    return Err(ErrorKind::SyntaxError("`do` without `when`".into()));
                }
                self.emit_op(Opcode::IfFalseBranch)?;
                let placeholder = self.emit_placeholder()?;
                self.constructs.push(Construct::WhenClause { placeholder });
                Ok(())
            }
            "include" => self.include(lexer),
            other => Err(ErrorKind::SyntaxError(format!(
                "immediate word `{other}` has no compiler action"
            ))),
        }
    }

    // =========================================================================
    // Colon definitions and the generic closer
    // =========================================================================

    fn begin_definition(&mut self, lexer: &mut Lexer) -> Result<(), ErrorKind> {
        for construct in &self.constructs {
            match construct {
                Construct::Definition { .. } => return Err(ErrorKind::NestedDefinition),
                Construct::Block { .. } => {
                    return Err(ErrorKind::SyntaxError(
                        "definition inside a code block".into(),
                    ));
                }
                _ => {}
            }
        }
        let name = match lexer.next_token()? {
            Token::Word(w) => w,
            // Numeric names are allowed; they are reachable through `@name`.
            Token::Number(n) => format_number(n),
            _ => return Err(ErrorKind::SyntaxError("expected a name after `:`".into())),
        };
        if self.vm.symbols.is_defined(&name) {
            return Err(ErrorKind::SyntaxError(format!(
                "word `{name}` is already defined"
            )));
        }
        self.emit_op(Opcode::Branch)?;
        let placeholder = self.emit_placeholder()?;
        let entry = self.vm.cp as u16;
        let index = self.vm.registry.register(entry)?;
        self.vm.symbols.define_word(&name, index, entry);
        debug!(name = %name, entry, index, "definition opened");
        self.constructs.push(Construct::Definition { name, placeholder });
        self.preserve = true;
        Ok(())
    }

    fn close_innermost(&mut self, construct_base: usize) -> Result<(), ErrorKind> {
        if self.constructs.len() <= construct_base {
            return Err(ErrorKind::UnexpectedSemicolon);
        }
        if matches!(self.constructs.last(), Some(Construct::Block { .. })) {
            // `;` never crosses a block boundary.
            return Err(ErrorKind::UnexpectedSemicolon);
        }
        match self.constructs.pop().expect("length checked above") {
            Construct::Definition { name, placeholder } => {
                self.emit_op(Opcode::Exit)?;
                self.patch_to_here(placeholder)?;
                debug!(name = %name, "definition closed");
                Ok(())
            }
            Construct::If { placeholder } | Construct::Else { placeholder } => {
                self.patch_to_here(placeholder)
            }
            Construct::WhenClause { placeholder } => {
                self.emit_op(Opcode::Branch)?;
                let exit = self.emit_placeholder()?;
                self.patch_to_here(placeholder)?;
                match self.constructs.last_mut() {
                    Some(Construct::When { exits }) => {
                        exits.push(exit);
                        Ok(())
                    }
                    _ => Err(ErrorKind::SyntaxError(
                        "`when` clause closed outside its group".into(),
                    )),
                }
            }
            Construct::When { exits } => {
                for exit in exits {
                    self.patch_to_here(exit)?;
                }
                Ok(())
            }
            Construct::Block { .. } => unreachable!("rejected above"),
        }
    }

    // =========================================================================
    // Includes
    // =========================================================================

    fn include(&mut self, lexer: &mut Lexer) -> Result<(), ErrorKind> {
        let path = match lexer.next_token()? {
            Token::Str(s) => s,
            _ => {
                return Err(ErrorKind::SyntaxError(
                    "expected a quoted path after `include`".into(),
                ));
            }
        };
        let from = self.vm.include_stack.last().cloned();
        let resolved = self.host.resolve(&path, from.as_deref())?;
        // Pragma-once with in-progress marking: a path already seen (even one
        // still compiling further up the stack) is skipped, which is what
        // makes circular includes settle with both files defined.
        if !self.vm.included.insert(resolved.canonical.clone()) {
            debug!(path = %resolved.canonical.display(), "include skipped");
            return Ok(());
        }
        debug!(path = %resolved.canonical.display(), "include compiling");
        self.vm.include_stack.push(resolved.canonical);
        let result = self.compile_source(&resolved.source, false);
        self.vm.include_stack.pop();
        result
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn emit_u8(&mut self, byte: u8) -> Result<(), ErrorKind> {
        self.vm.memory.write_u8(Segment::Code, self.vm.cp, byte)?;
        self.vm.cp += 1;
        Ok(())
    }

    fn emit_op(&mut self, op: Opcode) -> Result<(), ErrorKind> {
        self.emit_u8(op as u8)
    }

    fn emit_u16(&mut self, value: u16) -> Result<(), ErrorKind> {
        self.vm.memory.write_u16(Segment::Code, self.vm.cp, value)?;
        self.vm.cp += 2;
        Ok(())
    }

    fn emit_f32(&mut self, value: f32) -> Result<(), ErrorKind> {
        self.vm.memory.write_f32(Segment::Code, self.vm.cp, value)?;
        self.vm.cp += 4;
        Ok(())
    }

    fn emit_string_literal(&mut self, s: &str) -> Result<(), ErrorKind> {
        let offset = self.vm.digest.intern(&mut self.vm.memory, s)?;
        self.emit_op(Opcode::LiteralString)?;
        self.emit_u16(offset)
    }

    /// Reserve a 16-bit branch offset at CP.
    fn emit_placeholder(&mut self) -> Result<usize, ErrorKind> {
        let position = self.vm.cp;
        self.emit_u16(0)?;
        Ok(position)
    }

    /// Write the offset from just past `position` to the current CP.
    fn patch_to_here(&mut self, position: usize) -> Result<(), ErrorKind> {
        let offset = self.vm.cp as i64 - (position as i64 + 2);
        if offset < i16::MIN as i64 || offset > i16::MAX as i64 {
            return Err(ErrorKind::OutOfRange {
                value: offset,
                what: "branch offset",
            });
        }
        self.vm
            .memory
            .write_u16(Segment::Code, position, offset as i16 as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::NullHost;
    use crate::opcode::USER_BASE;

    fn compile(vm: &mut Vm, source: &str) -> Result<bool, ErrorKind> {
        let mut host = NullHost;
        vm.bcp = vm.cp;
        compile_unit(vm, source, &mut host)
    }

    fn code_bytes(vm: &Vm, from: usize) -> Vec<u8> {
        (from..vm.cp)
            .map(|i| vm.memory.read_u8(Segment::Code, i).unwrap())
            .collect()
    }

    #[test]
    fn test_number_literal_bytes() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, "2.5").unwrap();
        let bytes = code_bytes(&vm, 0);
        let mut expected = vec![Opcode::LiteralNumber as u8];
        expected.extend_from_slice(&2.5f32.to_le_bytes());
        expected.push(Opcode::Abort as u8);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_builtin_word_is_one_byte() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, "dup").unwrap();
        assert_eq!(
            code_bytes(&vm, 0),
            vec![Opcode::Dup as u8, Opcode::Abort as u8]
        );
    }

    #[test]
    fn test_string_literal_interns() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, "\"abc\" 'abc").unwrap();
        let bytes = code_bytes(&vm, 0);
        // Both forms intern the same string and share one digest offset.
        assert_eq!(bytes[0], Opcode::LiteralString as u8);
        assert_eq!(bytes[3], Opcode::LiteralString as u8);
        assert_eq!(bytes[1..3], bytes[4..6]);
    }

    #[test]
    fn test_definition_compiles_prologue_and_call() {
        let mut vm = Vm::new().unwrap();
        let preserve = compile(&mut vm, ": double dup add ; 2 double").unwrap();
        assert!(preserve);

        let bytes = code_bytes(&vm, 0);
        assert_eq!(bytes[0], Opcode::Branch as u8);
        // The prologue branch jumps over the body: dup, add, Exit.
        let skip = i16::from_le_bytes([bytes[1], bytes[2]]);
        assert_eq!(skip, 3);
        assert_eq!(bytes[3], Opcode::Dup as u8);
        assert_eq!(bytes[4], Opcode::Add as u8);
        assert_eq!(bytes[5], Opcode::Exit as u8);
        // The call site uses the two-byte user form for index 128.
        assert_eq!(bytes[11], 0x80);
        assert_eq!(bytes[12], 0x01);

        assert_eq!(vm.registry.address_of(USER_BASE), Some(3));
        assert_eq!(vm.symbols.find_bytecode_address("double"), Some(3));
    }

    #[test]
    fn test_numeric_definition_name() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, ": 7 dup add ;").unwrap();
        assert!(vm.symbols.find_bytecode_address("7").is_some());
    }

    #[test]
    fn test_scratch_units_do_not_preserve() {
        let mut vm = Vm::new().unwrap();
        assert!(!compile(&mut vm, "1 2 add").unwrap());
        assert!(compile(&mut vm, ": f 1 ;").unwrap());
    }

    #[test]
    fn test_nested_definition_is_refused() {
        let mut vm = Vm::new().unwrap();
        assert_eq!(
            compile(&mut vm, ": a : b ; ;").unwrap_err(),
            ErrorKind::NestedDefinition
        );
    }

    #[test]
    fn test_definition_inside_block_is_refused() {
        let mut vm = Vm::new().unwrap();
        assert!(matches!(
            compile(&mut vm, "{ : a ; }").unwrap_err(),
            ErrorKind::SyntaxError(_)
        ));
    }

    #[test]
    fn test_redefinition_is_refused() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, ": f 1 ;").unwrap();
        assert!(matches!(
            compile(&mut vm, ": f 2 ;").unwrap_err(),
            ErrorKind::SyntaxError(_)
        ));
    }

    #[test]
    fn test_unclosed_definition() {
        let mut vm = Vm::new().unwrap();
        assert_eq!(
            compile(&mut vm, ": broken dup").unwrap_err(),
            ErrorKind::UnclosedDefinition("broken".into())
        );
    }

    #[test]
    fn test_unexpected_semicolon() {
        let mut vm = Vm::new().unwrap();
        assert_eq!(
            compile(&mut vm, "1 ;").unwrap_err(),
            ErrorKind::UnexpectedSemicolon
        );
    }

    #[test]
    fn test_unexpected_close_paren() {
        let mut vm = Vm::new().unwrap();
        assert_eq!(
            compile(&mut vm, "1 )").unwrap_err(),
            ErrorKind::UnexpectedClose
        );
    }

    #[test]
    fn test_unknown_word() {
        let mut vm = Vm::new().unwrap();
        assert_eq!(
            compile(&mut vm, "frobnicate").unwrap_err(),
            ErrorKind::UnknownWord("frobnicate".into())
        );
    }

    #[test]
    fn test_unclosed_list() {
        let mut vm = Vm::new().unwrap();
        assert!(matches!(
            compile(&mut vm, "( 1 2").unwrap_err(),
            ErrorKind::SyntaxError(_)
        ));
    }

    #[test]
    fn test_block_compiles_branch_call() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, "{ dup }").unwrap();
        let bytes = code_bytes(&vm, 0);
        assert_eq!(bytes[0], Opcode::BranchCall as u8);
        let skip = i16::from_le_bytes([bytes[1], bytes[2]]);
        // Body is dup + Exit.
        assert_eq!(skip, 2);
        assert_eq!(bytes[3], Opcode::Dup as u8);
        assert_eq!(bytes[4], Opcode::Exit as u8);
    }

    #[test]
    fn test_symbol_reference_compiles_literal_code() {
        let mut vm = Vm::new().unwrap();
        compile(&mut vm, ": double dup add ;").unwrap();
        vm.bcp = vm.cp;
        let start = vm.cp;
        compile(&mut vm, "@double").unwrap();
        let bytes = code_bytes(&vm, start);
        assert_eq!(bytes[0], Opcode::LiteralCode as u8);
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 3);
    }

    #[test]
    fn test_symbol_reference_unknown() {
        let mut vm = Vm::new().unwrap();
        assert_eq!(
            compile(&mut vm, "@nothing").unwrap_err(),
            ErrorKind::UnknownWord("nothing".into())
        );
    }

    #[test]
    fn test_else_without_if() {
        let mut vm = Vm::new().unwrap();
        assert!(matches!(
            compile(&mut vm, "1 else").unwrap_err(),
            ErrorKind::SyntaxError(_)
        ));
    }

    #[test]
    fn test_do_without_when() {
        let mut vm = Vm::new().unwrap();
        assert!(matches!(
            compile(&mut vm, "1 do").unwrap_err(),
            ErrorKind::SyntaxError(_)
        ));
    }

    #[test]
    fn test_host_installed_code_binding_compiles_call() {
        let mut vm = Vm::new().unwrap();
        vm.symbols.define_code("entry", 0x123);
        compile(&mut vm, "entry").unwrap();
        let bytes = code_bytes(&vm, 0);
        assert_eq!(bytes[0], Opcode::Call as u8);
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 0x123);
    }

    #[test]
    fn test_local_binding_compiles_ref_and_fetch() {
        let mut vm = Vm::new().unwrap();
        vm.symbols.define_local("x");
        compile(&mut vm, "x").unwrap();
        let bytes = code_bytes(&vm, 0);
        assert_eq!(
            bytes,
            vec![
                Opcode::LocalRef as u8,
                0,
                Opcode::Fetch as u8,
                Opcode::Abort as u8
            ]
        );
    }
}
