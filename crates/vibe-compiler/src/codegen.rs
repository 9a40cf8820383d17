//! Instruction emission and pool management

use vibe_bytecode::{
    Bytecode, CompiledMacro, ConstantPool, Instruction, InternPool, Opcode,
};
use vibe_syntax::Expr;

use crate::error::{CompileError, CompileResult};

/// Operand of a jump that has not been patched yet
const UNPATCHED: u32 = u32::MAX;

/// Code generator state
#[derive(Debug, Default)]
pub struct CodeGen<'a> {
    /// Emitted instructions
    instructions: Vec<Instruction>,
    /// Literal expressions
    constants: ConstantPool<'a>,
    /// Output text and string literals
    strings: InternPool,
    /// Identifiers
    names: InternPool,
    /// Macro and caller bodies
    macros: Vec<CompiledMacro>,
}

impl<'a> CodeGen<'a> {
    /// Create a new code generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an instruction, returning its index
    pub fn emit(&mut self, opcode: Opcode, operand: u32) -> usize {
        let idx = self.instructions.len();
        self.instructions.push(Instruction::new(opcode, operand));
        idx
    }

    /// Emit an instruction whose operand is unused
    pub fn emit_simple(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, 0)
    }

    /// Get current instruction index
    #[inline]
    pub fn current_index(&self) -> usize {
        self.instructions.len()
    }

    /// Emit a placeholder jump (returns index for patching)
    pub fn emit_jump(&mut self, opcode: Opcode) -> usize {
        debug_assert!(opcode.is_jump());
        self.emit(opcode, UNPATCHED)
    }

    /// Point the jump at `index` to `target`
    pub fn patch_jump(&mut self, index: usize, target: usize) -> CompileResult<()> {
        match self.instructions.get_mut(index) {
            Some(instr) if instr.opcode.is_jump() => {
                instr.operand = target as u32;
                Ok(())
            }
            _ => Err(CompileError::internal(format!(
                "instruction {} is not a jump",
                index
            ))),
        }
    }

    /// Point the jump at `index` to the next instruction to be emitted
    pub fn patch_to_here(&mut self, index: usize) -> CompileResult<()> {
        self.patch_jump(index, self.current_index())
    }

    /// Emit the cheapest load for an integer
    pub fn emit_int(&mut self, n: i64) -> CompileResult<()> {
        match n {
            0 => self.emit_simple(Opcode::LoadZero),
            1 => self.emit_simple(Opcode::LoadOne),
            -1 => self.emit_simple(Opcode::LoadMinusOne),
            n if i32::try_from(n).is_ok() => self.emit(Opcode::LoadInt, n as i32 as u32),
            n => {
                let idx = self.add_owned_constant(Expr::int(n))?;
                self.emit(Opcode::LoadConst, idx)
            }
        };
        Ok(())
    }

    /// Add a string to the string pool
    pub fn add_string(&mut self, s: &str) -> CompileResult<u32> {
        if self.strings.find(s).is_none() && self.strings.len() >= u32::MAX as usize {
            return Err(CompileError::TooManyStrings);
        }
        Ok(self.strings.insert(s))
    }

    /// Add an identifier to the name pool
    pub fn add_name(&mut self, name: &str) -> CompileResult<u16> {
        let idx = self.names.insert(name);
        u16::try_from(idx).map_err(|_| CompileError::TooManyNames)
    }

    /// Add a literal expression borrowed from the syntax tree
    pub fn add_constant(&mut self, expr: &'a Expr) -> CompileResult<u32> {
        if self.constants.len() >= u32::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        Ok(self.constants.add(expr))
    }

    /// Add a literal expression built by the generator
    pub fn add_owned_constant(&mut self, expr: Expr) -> CompileResult<u32> {
        if self.constants.len() >= u32::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        Ok(self.constants.add_owned(expr))
    }

    /// Register a macro body, returning its pool index
    pub fn add_macro(&mut self, def: CompiledMacro) -> u32 {
        self.macros.push(def);
        (self.macros.len() - 1) as u32
    }

    /// Assemble the container, checking that every jump was patched
    pub fn finish(self, checksum: u64) -> CompileResult<Bytecode<'a>> {
        if let Some(pc) = self
            .instructions
            .iter()
            .position(|i| i.opcode.is_jump() && i.operand == UNPATCHED)
        {
            return Err(CompileError::internal(format!(
                "unpatched jump at {}",
                pc
            )));
        }
        Ok(Bytecode::new(
            self.instructions,
            self.constants,
            self.strings,
            self.names,
            self.macros,
            checksum,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_jump() {
        let mut code = CodeGen::new();
        let jump = code.emit_jump(Opcode::JumpIfFalse);
        code.emit_simple(Opcode::LoadOne);
        code.patch_to_here(jump).unwrap();
        code.emit_simple(Opcode::End);
        let bytecode = code.finish(0).unwrap();
        assert_eq!(bytecode.instructions()[0].operand, 2);
    }

    #[test]
    fn test_unpatched_jump_rejected() {
        let mut code = CodeGen::new();
        code.emit_jump(Opcode::Jump);
        assert!(matches!(code.finish(0), Err(CompileError::Internal(_))));
    }

    #[test]
    fn test_patch_non_jump_rejected() {
        let mut code = CodeGen::new();
        let idx = code.emit_simple(Opcode::LoadOne);
        assert!(code.patch_jump(idx, 0).is_err());
    }

    #[test]
    fn test_emit_int_fast_paths() {
        let mut code = CodeGen::new();
        code.emit_int(0).unwrap();
        code.emit_int(-1).unwrap();
        code.emit_int(-7).unwrap();
        code.emit_int(i64::MAX).unwrap();
        let ops: Vec<_> = code.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadZero,
                Opcode::LoadMinusOne,
                Opcode::LoadInt,
                Opcode::LoadConst
            ]
        );
        assert_eq!(code.instructions[2].operand as i32, -7);
    }

    #[test]
    fn test_names_dedup() {
        let mut code = CodeGen::new();
        let a = code.add_name("user").unwrap();
        let b = code.add_name("user").unwrap();
        assert_eq!(a, b);
        assert_eq!(code.names.len(), 1);
    }
}
