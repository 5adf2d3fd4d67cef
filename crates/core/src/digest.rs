//! String Digest
//!
//! Interning table for string literals. The bytes live in the STRING segment
//! as length-prefixed records (one length byte, then the UTF-8 bytes, hard
//! cap 255); the digest owns the dedup map and the allocation watermark and
//! hands out stable 16-bit offsets. Interning an equal string twice returns
//! the same offset.

use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::memory::{Memory, Segment};

pub struct Digest {
    offsets: HashMap<String, u16>,
    top: u16,
}

impl Digest {
    pub fn new() -> Self {
        Digest {
            offsets: HashMap::new(),
            top: 0,
        }
    }

    /// Intern `s`, returning its stable offset into the STRING segment.
    pub fn intern(&mut self, memory: &mut Memory, s: &str) -> Result<u16, ErrorKind> {
        if let Some(&offset) = self.offsets.get(s) {
            return Ok(offset);
        }
        let bytes = s.as_bytes();
        if bytes.len() > u8::MAX as usize {
            return Err(ErrorKind::StringTooLong);
        }
        let offset = self.top;
        memory.write_u8(Segment::Strings, offset as usize, bytes.len() as u8)?;
        for (i, &b) in bytes.iter().enumerate() {
            memory.write_u8(Segment::Strings, offset as usize + 1 + i, b)?;
        }
        self.top = offset + 1 + bytes.len() as u16;
        self.offsets.insert(s.to_string(), offset);
        Ok(offset)
    }

    /// Recover the string stored at `offset`.
    pub fn get(&self, memory: &Memory, offset: u16) -> Result<String, ErrorKind> {
        let len = memory.read_u8(Segment::Strings, offset as usize)? as usize;
        let mut bytes = Vec::with_capacity(len);
        for i in 0..len {
            bytes.push(memory.read_u8(Segment::Strings, offset as usize + 1 + i)?);
        }
        String::from_utf8(bytes)
            .map_err(|_| ErrorKind::SyntaxError(format!("digest entry at {offset} is not UTF-8")))
    }

    /// Byte length of the string stored at `offset`.
    pub fn length(&self, memory: &Memory, offset: u16) -> Result<usize, ErrorKind> {
        Ok(memory.read_u8(Segment::Strings, offset as usize)? as usize)
    }
}

impl Default for Digest {
    fn default() -> Self {
        Digest::new()
    }
}
