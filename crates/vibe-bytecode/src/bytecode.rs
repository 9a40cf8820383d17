//! Bytecode container

use std::fmt;

use rustc_hash::FxHashMap;
use vibe_syntax::Expr;

use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::instruction::{Instruction, Opcode};
use crate::macros::CompiledMacro;
use crate::operand::{CallOperand, LoopAttr};
use crate::pool::InternPool;

/// A compiled template: instruction stream plus pools.
///
/// Built once per template and shared read-only between renders. The
/// lifetime ties borrowed constant expressions to the syntax tree;
/// [`Bytecode::into_owned`] detaches it.
#[derive(Debug, Clone)]
pub struct Bytecode<'a> {
    instructions: Vec<Instruction>,
    constants: ConstantPool<'a>,
    strings: InternPool,
    names: InternPool,
    macros: Vec<CompiledMacro>,
    checksum: u64,
    /// `FOR_LOOP_START` index -> matching `FOR_LOOP_END` index
    loop_ends: FxHashMap<u32, u32>,
}

impl<'a> Bytecode<'a> {
    /// Assemble a container and precompute loop matching.
    ///
    /// Fails if loop start and end instructions are not properly nested.
    pub fn new(
        instructions: Vec<Instruction>,
        constants: ConstantPool<'a>,
        strings: InternPool,
        names: InternPool,
        macros: Vec<CompiledMacro>,
        checksum: u64,
    ) -> Result<Self> {
        let loop_ends = match_loops(&instructions)?;
        Ok(Self {
            instructions,
            constants,
            strings,
            names,
            macros,
            checksum,
            loop_ends,
        })
    }

    /// Instruction stream
    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction at `pc`
    #[inline]
    pub fn instruction(&self, pc: usize) -> Option<Instruction> {
        self.instructions.get(pc).copied()
    }

    /// Constant pool
    #[inline]
    pub fn constants(&self) -> &ConstantPool<'a> {
        &self.constants
    }

    /// Constant by index
    #[inline]
    pub fn constant(&self, idx: u32) -> Option<&Expr> {
        self.constants.get(idx)
    }

    /// String pool
    #[inline]
    pub fn strings(&self) -> &InternPool {
        &self.strings
    }

    /// String by index
    #[inline]
    pub fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx)
    }

    /// Name pool
    #[inline]
    pub fn names(&self) -> &InternPool {
        &self.names
    }

    /// Name by index
    #[inline]
    pub fn name(&self, idx: u32) -> Option<&str> {
        self.names.get(idx)
    }

    /// Macro pool
    #[inline]
    pub fn macros(&self) -> &[CompiledMacro] {
        &self.macros
    }

    /// Macro by index
    #[inline]
    pub fn macro_def(&self, idx: u32) -> Option<&CompiledMacro> {
        self.macros.get(idx as usize)
    }

    /// FNV-1a 64 checksum of the source this was compiled from
    #[inline]
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Index of the `FOR_LOOP_END` matching the `FOR_LOOP_START` at `start`
    #[inline]
    pub fn loop_end(&self, start: usize) -> Option<usize> {
        self.loop_ends.get(&(start as u32)).map(|&end| end as usize)
    }

    /// Number of instructions
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if the stream is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Take ownership of all borrowed constants
    pub fn into_owned(self) -> Bytecode<'static> {
        Bytecode {
            instructions: self.instructions,
            constants: self.constants.into_owned(),
            strings: self.strings,
            names: self.names,
            macros: self.macros,
            checksum: self.checksum,
            loop_ends: self.loop_ends,
        }
    }
}

impl PartialEq for Bytecode<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.instructions == other.instructions
            && self.constants == other.constants
            && self.strings == other.strings
            && self.names == other.names
            && self.macros == other.macros
            && self.checksum == other.checksum
    }
}

/// Pair every loop start with its end by bracket matching.
///
/// Loops nest strictly, so the innermost open start always owns the next
/// end. This finds the same end a forward scan counting depth would.
fn match_loops(instructions: &[Instruction]) -> Result<FxHashMap<u32, u32>> {
    let mut ends = FxHashMap::default();
    let mut open = Vec::new();
    for (pc, instr) in instructions.iter().enumerate() {
        match instr.opcode {
            Opcode::ForLoopStart => open.push(pc as u32),
            Opcode::ForLoopEnd => {
                let start = open.pop().ok_or(BytecodeError::UnbalancedLoop(pc))?;
                ends.insert(start, pc as u32);
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(start) => Err(BytecodeError::UnbalancedLoop(start as usize)),
        None => Ok(ends),
    }
}

impl fmt::Display for Bytecode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let macro_starts: FxHashMap<u32, u32> = self
            .macros
            .iter()
            .enumerate()
            .map(|(i, m)| (m.body_start, i as u32))
            .collect();

        for (pc, instr) in self.instructions.iter().enumerate() {
            if let Some(&idx) = macro_starts.get(&(pc as u32)) {
                let name = self.macros[idx as usize].name;
                writeln!(f, "; macro #{} {}", idx, self.name(name).unwrap_or("?"))?;
            }
            write!(f, "{:5}  {:<24}", pc, instr.opcode.name())?;
            let operand = instr.operand;
            match instr.opcode {
                Opcode::EmitText | Opcode::LoadString => {
                    write!(f, "{:<6} {:?}", operand, self.string(operand).unwrap_or("?"))?
                }
                Opcode::LoadVar
                | Opcode::StoreVar
                | Opcode::GetAttr
                | Opcode::ForLoopStart => {
                    write!(f, "{:<6} {}", operand, self.name(operand).unwrap_or("?"))?
                }
                Opcode::CallFunction
                | Opcode::CallMethod
                | Opcode::CallMacro
                | Opcode::CallMacroWithCaller
                | Opcode::Filter
                | Opcode::Test => {
                    let call = CallOperand::unpack(operand);
                    write!(
                        f,
                        "{} argc={} kwargc={}",
                        self.name(call.name as u32).unwrap_or("?"),
                        call.argc,
                        call.kwargc
                    )?
                }
                Opcode::LoopAttr => match LoopAttr::from_operand(operand) {
                    Some(attr) => write!(f, "{}", attr.name())?,
                    None => write!(f, "{}", operand)?,
                },
                Opcode::LoadInt => write!(f, "{}", operand as i32)?,
                Opcode::LoadConst => write!(f, "{:<6} {:?}", operand, self.constant(operand))?,
                op if op.is_jump() => write!(f, "-> {}", operand)?,
                Opcode::LoadLocal
                | Opcode::StoreLocal
                | Opcode::BuildList
                | Opcode::BuildMap
                | Opcode::BinOp
                | Opcode::UnaryOp
                | Opcode::Slice
                | Opcode::LoopCycle
                | Opcode::SetCaller
                | Opcode::DefineMacro
                | Opcode::FilterDefault
                | Opcode::InvokeCaller => write!(f, "{}", operand)?,
                _ => {}
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(ops: &[(Opcode, u32)]) -> Result<Bytecode<'static>> {
        Bytecode::new(
            ops.iter().map(|&(op, n)| Instruction::new(op, n)).collect(),
            ConstantPool::new(),
            InternPool::new(),
            InternPool::new(),
            Vec::new(),
            0,
        )
    }

    #[test]
    fn test_nested_loop_matching() {
        let code = build(&[
            (Opcode::LoadVar, 0),
            (Opcode::ForLoopStart, 1),
            (Opcode::LoadVar, 0),
            (Opcode::ForLoopStart, 2),
            (Opcode::ForLoopEnd, 3),
            (Opcode::ForLoopEnd, 1),
            (Opcode::End, 0),
        ])
        .unwrap();
        assert_eq!(code.loop_end(1), Some(5));
        assert_eq!(code.loop_end(3), Some(4));
        assert_eq!(code.loop_end(0), None);
    }

    #[test]
    fn test_unbalanced_loop_rejected() {
        assert!(matches!(
            build(&[(Opcode::ForLoopStart, 0), (Opcode::End, 0)]),
            Err(BytecodeError::UnbalancedLoop(0))
        ));
        assert!(matches!(
            build(&[(Opcode::ForLoopEnd, 0)]),
            Err(BytecodeError::UnbalancedLoop(0))
        ));
    }

    #[test]
    fn test_disassembly_mentions_pool_entries() {
        let mut strings = InternPool::new();
        strings.insert("Hello");
        let code = Bytecode::new(
            vec![
                Instruction::new(Opcode::EmitText, 0),
                Instruction::simple(Opcode::End),
            ],
            ConstantPool::new(),
            strings,
            InternPool::new(),
            Vec::new(),
            0,
        )
        .unwrap();
        let text = code.to_string();
        assert!(text.contains("EMIT_TEXT"));
        assert!(text.contains("\"Hello\""));
    }
}
