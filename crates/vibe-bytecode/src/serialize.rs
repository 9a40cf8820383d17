//! Persisted bytecode format
//!
//! All integers are little endian:
//!
//! ```text
//! magic         4 bytes  "VJBC"
//! version       u32
//! checksum      u64      FNV-1a 64 of the template source
//! instr_count   u32
//! instructions  instr_count x (opcode u8, operand u32)
//! constants     u32 count, tagged literal expressions
//! strings       u32 count, (u32 len, utf-8 bytes)*
//! names         u32 count, (u32 len, utf-8 bytes)*
//! macros        u32 count, macro records
//! ```

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use vibe_syntax::{Expr, Literal};

use crate::bytecode::Bytecode;
use crate::checksum::fnv1a64;
use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::instruction::{Instruction, Opcode};
use crate::macros::{CompiledMacro, MacroParamEntry};
use crate::pool::InternPool;
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

const TAG_NONE: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_DICT: u8 = 6;

/// Deepest nesting of list/dict constants accepted when reading
const MAX_CONSTANT_DEPTH: usize = 64;

const FLAG_VARARGS: u8 = 1;
const FLAG_KWARGS: u8 = 2;

/// Fixed-size prefix of a persisted container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version
    pub version: u32,
    /// Source checksum
    pub checksum: u64,
}

impl Header {
    /// Encoded header size in bytes
    pub const SIZE: usize = 16;

    /// Read and validate magic and version
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let checksum = reader.read_u64::<LittleEndian>()?;
        Ok(Self { version, checksum })
    }

    /// True if `source` hashes to the stored checksum
    pub fn is_fresh(&self, source: &str) -> bool {
        self.checksum == fnv1a64(source.as_bytes())
    }
}

impl Bytecode<'_> {
    /// Serialize into `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&BYTECODE_MAGIC)?;
        writer.write_u32::<LittleEndian>(BYTECODE_VERSION)?;
        writer.write_u64::<LittleEndian>(self.checksum())?;

        writer.write_u32::<LittleEndian>(self.len() as u32)?;
        for instr in self.instructions() {
            writer.write_u8(instr.opcode.to_byte())?;
            writer.write_u32::<LittleEndian>(instr.operand)?;
        }

        writer.write_u32::<LittleEndian>(self.constants().len() as u32)?;
        for expr in self.constants().iter() {
            write_constant(writer, expr)?;
        }

        write_pool(writer, self.strings())?;
        write_pool(writer, self.names())?;

        writer.write_u32::<LittleEndian>(self.macros().len() as u32)?;
        for def in self.macros() {
            writer.write_u32::<LittleEndian>(def.name)?;
            writer.write_u32::<LittleEndian>(def.params.len() as u32)?;
            for param in &def.params {
                writer.write_u32::<LittleEndian>(param.name)?;
                match param.default {
                    Some(idx) => {
                        writer.write_u8(1)?;
                        writer.write_u32::<LittleEndian>(idx)?;
                    }
                    None => {
                        writer.write_u8(0)?;
                        writer.write_u32::<LittleEndian>(0)?;
                    }
                }
            }
            writer.write_u32::<LittleEndian>(def.body_start)?;
            writer.write_u32::<LittleEndian>(def.body_end)?;
            let mut flags = 0;
            if def.catch_varargs {
                flags |= FLAG_VARARGS;
            }
            if def.catch_kwargs {
                flags |= FLAG_KWARGS;
            }
            writer.write_u8(flags)?;
        }
        Ok(())
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Header::SIZE + self.len() * 5);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// True if `source` hashes to this container's checksum
    pub fn is_fresh(&self, source: &str) -> bool {
        self.checksum() == fnv1a64(source.as_bytes())
    }
}

impl Bytecode<'static> {
    /// Deserialize from `reader`, verifying magic and version first
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let header = Header::read(reader)?;

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut instructions = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let byte = reader.read_u8()?;
            let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode(byte))?;
            let operand = reader.read_u32::<LittleEndian>()?;
            instructions.push(Instruction::new(opcode, operand));
        }

        let mut constants = ConstantPool::new();
        let count = reader.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            constants.add_owned(read_constant(reader, 0)?);
        }

        let strings = read_pool(reader)?;
        let names = read_pool(reader)?;

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut macros = Vec::with_capacity(count.min(1 << 10));
        for _ in 0..count {
            let name = reader.read_u32::<LittleEndian>()?;
            let param_count = reader.read_u32::<LittleEndian>()? as usize;
            let mut params = Vec::with_capacity(param_count.min(256));
            for _ in 0..param_count {
                let name = reader.read_u32::<LittleEndian>()?;
                let has_default = reader.read_u8()? != 0;
                let idx = reader.read_u32::<LittleEndian>()?;
                params.push(MacroParamEntry {
                    name,
                    default: has_default.then_some(idx),
                });
            }
            let body_start = reader.read_u32::<LittleEndian>()?;
            let body_end = reader.read_u32::<LittleEndian>()?;
            let flags = reader.read_u8()?;
            macros.push(CompiledMacro {
                name,
                params,
                body_start,
                body_end,
                catch_varargs: flags & FLAG_VARARGS != 0,
                catch_kwargs: flags & FLAG_KWARGS != 0,
            });
        }

        Bytecode::new(
            instructions,
            constants,
            strings,
            names,
            macros,
            header.checksum,
        )
    }

    /// Deserialize from a byte slice
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        Self::read_from(&mut bytes)
    }
}

fn write_str<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u32::<LittleEndian>(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut bytes = Vec::with_capacity(len.min(1 << 16));
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(BytecodeError::UnexpectedEnd);
    }
    String::from_utf8(bytes).map_err(|_| BytecodeError::InvalidUtf8)
}

fn write_pool<W: Write>(writer: &mut W, pool: &InternPool) -> Result<()> {
    writer.write_u32::<LittleEndian>(pool.len() as u32)?;
    for s in pool.iter() {
        write_str(writer, s)?;
    }
    Ok(())
}

fn read_pool<R: Read>(reader: &mut R) -> Result<InternPool> {
    let count = reader.read_u32::<LittleEndian>()?;
    let mut pool = InternPool::new();
    for _ in 0..count {
        pool.insert(&read_string(reader)?);
    }
    Ok(pool)
}

fn write_constant<W: Write>(writer: &mut W, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Literal(Literal::None) => writer.write_u8(TAG_NONE)?,
        Expr::Literal(Literal::Bool(b)) => {
            writer.write_u8(TAG_BOOL)?;
            writer.write_u8(*b as u8)?;
        }
        Expr::Literal(Literal::Int(n)) => {
            writer.write_u8(TAG_INT)?;
            writer.write_i64::<LittleEndian>(*n)?;
        }
        Expr::Literal(Literal::Float(f)) => {
            writer.write_u8(TAG_FLOAT)?;
            writer.write_f64::<LittleEndian>(*f)?;
        }
        Expr::Literal(Literal::String(s)) => {
            writer.write_u8(TAG_STRING)?;
            write_str(writer, s)?;
        }
        Expr::List(items) => {
            writer.write_u8(TAG_LIST)?;
            writer.write_u32::<LittleEndian>(items.len() as u32)?;
            for item in items {
                write_constant(writer, item)?;
            }
        }
        Expr::Dict(pairs) => {
            writer.write_u8(TAG_DICT)?;
            writer.write_u32::<LittleEndian>(pairs.len() as u32)?;
            for (key, value) in pairs {
                write_constant(writer, key)?;
                write_constant(writer, value)?;
            }
        }
        _ => return Err(BytecodeError::NonLiteralConstant),
    }
    Ok(())
}

fn read_constant<R: Read>(reader: &mut R, depth: usize) -> Result<Expr> {
    if depth > MAX_CONSTANT_DEPTH {
        return Err(BytecodeError::NonLiteralConstant);
    }
    let tag = reader.read_u8()?;
    Ok(match tag {
        TAG_NONE => Expr::Literal(Literal::None),
        TAG_BOOL => Expr::Literal(Literal::Bool(reader.read_u8()? != 0)),
        TAG_INT => Expr::int(reader.read_i64::<LittleEndian>()?),
        TAG_FLOAT => Expr::Literal(Literal::Float(reader.read_f64::<LittleEndian>()?)),
        TAG_STRING => Expr::string(read_string(reader)?),
        TAG_LIST => {
            let count = reader.read_u32::<LittleEndian>()?;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(read_constant(reader, depth + 1)?);
            }
            Expr::List(items)
        }
        TAG_DICT => {
            let count = reader.read_u32::<LittleEndian>()?;
            let mut pairs = Vec::new();
            for _ in 0..count {
                let key = read_constant(reader, depth + 1)?;
                let value = read_constant(reader, depth + 1)?;
                pairs.push((key, value));
            }
            Expr::Dict(pairs)
        }
        other => return Err(BytecodeError::InvalidConstantTag(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_rejects_bad_magic() {
        let bytes = b"NOPE\x01\x00\x00\x00\0\0\0\0\0\0\0\0";
        assert!(matches!(
            Header::read(&mut &bytes[..]),
            Err(BytecodeError::InvalidMagic)
        ));
    }

    #[test]
    fn test_header_rejects_future_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"VJBC");
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        assert!(matches!(
            Header::read(&mut &bytes[..]),
            Err(BytecodeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            Bytecode::from_bytes(b"VJBC\x01\x00"),
            Err(BytecodeError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_constant_encoding() {
        let expr = Expr::Dict(vec![(
            Expr::string("k"),
            Expr::List(vec![
                Expr::int(-3),
                Expr::Literal(Literal::Float(2.5)),
                Expr::Literal(Literal::Bool(true)),
                Expr::Literal(Literal::None),
            ]),
        )]);
        let mut buf = Vec::new();
        write_constant(&mut buf, &expr).unwrap();
        assert_eq!(read_constant(&mut &buf[..], 0).unwrap(), expr);
    }

    #[test]
    fn test_non_literal_constant_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_constant(&mut buf, &Expr::name("x")),
            Err(BytecodeError::NonLiteralConstant)
        ));
    }
}
