//! Bytecode instructions (opcodes)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bytecode opcodes
///
/// Stack-based instruction set. Every instruction carries one 32-bit operand
/// whose meaning depends on the opcode (pool index, jump target, packed
/// argument counts). Opcodes that need no operand ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Constants ====================
    /// Push none
    LoadNone = 0x00,
    /// Push true
    LoadTrue = 0x01,
    /// Push false
    LoadFalse = 0x02,
    /// Push integer 0
    LoadZero = 0x03,
    /// Push integer 1
    LoadOne = 0x04,
    /// Push integer -1
    LoadMinusOne = 0x05,
    /// Push operand reinterpreted as i32
    LoadInt = 0x06,
    /// Push strings\[operand\]
    LoadString = 0x07,
    /// Push the value of constants\[operand\]
    LoadConst = 0x08,
    /// Pop operand values, push them as a list
    BuildList = 0x09,
    /// Pop operand key/value pairs, push a map
    BuildMap = 0x0A,
    /// Push undefined
    LoadUndefined = 0x0B,

    // ==================== Output ====================
    /// Append strings\[operand\] to the output
    EmitText = 0x10,
    /// Pop a value and append its string form (escaped if autoescaping)
    Emit = 0x11,

    // ==================== Variables ====================
    /// Push the variable named names\[operand\]
    LoadVar = 0x18,
    /// Pop into the variable named names\[operand\] in the innermost scope
    StoreVar = 0x19,
    /// Push local slot operand
    LoadLocal = 0x1A,
    /// Pop into local slot operand
    StoreLocal = 0x1B,
    /// Open a variable scope
    PushScope = 0x1C,
    /// Close the innermost variable scope
    PopScope = 0x1D,

    // ==================== Operators ====================
    /// Generic binary operation, operand is the operator id
    BinOp = 0x20,
    /// lhs + rhs
    Add = 0x21,
    /// lhs - rhs
    Sub = 0x22,
    /// lhs * rhs
    Mul = 0x23,
    /// lhs / rhs (always float)
    Div = 0x24,
    /// lhs == rhs
    Eq = 0x25,
    /// lhs != rhs
    Ne = 0x26,
    /// lhs < rhs
    Lt = 0x27,
    /// lhs <= rhs
    Le = 0x28,
    /// lhs > rhs
    Gt = 0x29,
    /// lhs >= rhs
    Ge = 0x2A,
    /// Generic unary operation, operand is the operator id
    UnaryOp = 0x2B,
    /// Logical not
    Not = 0x2C,
    /// Numeric negation
    Neg = 0x2D,

    // ==================== Access ====================
    /// Pop object, push object.names\[operand\]
    GetAttr = 0x30,
    /// Pop index and object, push object\[index\]
    GetItem = 0x31,
    /// Pop present bounds (see `SliceFlags`) and object, push the slice
    Slice = 0x32,
    /// Push an attribute of the innermost loop (operand is a `LoopAttr`)
    LoopAttr = 0x33,
    /// Pop operand values, push the one selected by the loop index
    LoopCycle = 0x34,

    // ==================== Calls ====================
    /// Call global function or macro variable (packed `CallOperand`)
    CallFunction = 0x40,
    /// Call method on a receiver below the arguments (packed `CallOperand`)
    CallMethod = 0x41,
    /// Call template macro by name (packed `CallOperand`)
    CallMacro = 0x42,
    /// Call template macro with the pending caller body (packed `CallOperand`)
    CallMacroWithCaller = 0x43,
    /// Register macros\[operand\] as the caller body for the next call
    SetCaller = 0x44,
    /// Run the active caller body (packed `CallOperand`, name ignored)
    InvokeCaller = 0x45,
    /// Bind macros\[operand\] in the current scope
    DefineMacro = 0x46,
    /// Return from a macro or caller body
    Return = 0x47,

    // ==================== Filters ====================
    /// Apply a registered filter (packed `CallOperand`)
    Filter = 0x50,
    /// `|upper`
    FilterUpper = 0x51,
    /// `|lower`
    FilterLower = 0x52,
    /// `|escape`
    FilterEscape = 0x53,
    /// `|trim`
    FilterTrim = 0x54,
    /// `|first`
    FilterFirst = 0x55,
    /// `|last`
    FilterLast = 0x56,
    /// `|length`
    FilterLength = 0x57,
    /// `|default(...)`, operand is the positional argument count
    FilterDefault = 0x58,
    /// `|string`
    FilterString = 0x59,
    /// `|int`
    FilterInt = 0x5A,

    // ==================== Tests ====================
    /// Apply a registered test (packed `CallOperand`, no keywords)
    Test = 0x60,
    /// `is defined`
    TestDefined = 0x61,
    /// `is none`
    TestNone = 0x62,

    // ==================== Control Flow ====================
    /// Unconditional jump to operand
    Jump = 0x70,
    /// Pop, jump if falsy
    JumpIfFalse = 0x71,
    /// Pop, jump if truthy
    JumpIfTrue = 0x72,
    /// Jump keeping the top if falsy, else pop (short-circuit `and`)
    JumpIfFalseOrPop = 0x73,
    /// Jump keeping the top if truthy, else pop (short-circuit `or`)
    JumpIfTrueOrPop = 0x74,
    /// Pop iterable and enter a loop binding names\[operand\]
    ForLoopStart = 0x75,
    /// Advance the loop started at operand or leave it
    ForLoopEnd = 0x76,
    /// Leave the loop whose end is at operand
    BreakLoop = 0x77,
    /// Continue the loop whose end is at operand
    ContinueLoop = 0x78,

    // ==================== Misc ====================
    /// Discard the top of stack
    Pop = 0xF0,
    /// End of template
    End = 0xFF,
}

impl Opcode {
    /// Convert from raw byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::LoadNone),
            0x01 => Some(Self::LoadTrue),
            0x02 => Some(Self::LoadFalse),
            0x03 => Some(Self::LoadZero),
            0x04 => Some(Self::LoadOne),
            0x05 => Some(Self::LoadMinusOne),
            0x06 => Some(Self::LoadInt),
            0x07 => Some(Self::LoadString),
            0x08 => Some(Self::LoadConst),
            0x09 => Some(Self::BuildList),
            0x0A => Some(Self::BuildMap),
            0x0B => Some(Self::LoadUndefined),

            0x10 => Some(Self::EmitText),
            0x11 => Some(Self::Emit),

            0x18 => Some(Self::LoadVar),
            0x19 => Some(Self::StoreVar),
            0x1A => Some(Self::LoadLocal),
            0x1B => Some(Self::StoreLocal),
            0x1C => Some(Self::PushScope),
            0x1D => Some(Self::PopScope),

            0x20 => Some(Self::BinOp),
            0x21 => Some(Self::Add),
            0x22 => Some(Self::Sub),
            0x23 => Some(Self::Mul),
            0x24 => Some(Self::Div),
            0x25 => Some(Self::Eq),
            0x26 => Some(Self::Ne),
            0x27 => Some(Self::Lt),
            0x28 => Some(Self::Le),
            0x29 => Some(Self::Gt),
            0x2A => Some(Self::Ge),
            0x2B => Some(Self::UnaryOp),
            0x2C => Some(Self::Not),
            0x2D => Some(Self::Neg),

            0x30 => Some(Self::GetAttr),
            0x31 => Some(Self::GetItem),
            0x32 => Some(Self::Slice),
            0x33 => Some(Self::LoopAttr),
            0x34 => Some(Self::LoopCycle),

            0x40 => Some(Self::CallFunction),
            0x41 => Some(Self::CallMethod),
            0x42 => Some(Self::CallMacro),
            0x43 => Some(Self::CallMacroWithCaller),
            0x44 => Some(Self::SetCaller),
            0x45 => Some(Self::InvokeCaller),
            0x46 => Some(Self::DefineMacro),
            0x47 => Some(Self::Return),

            0x50 => Some(Self::Filter),
            0x51 => Some(Self::FilterUpper),
            0x52 => Some(Self::FilterLower),
            0x53 => Some(Self::FilterEscape),
            0x54 => Some(Self::FilterTrim),
            0x55 => Some(Self::FilterFirst),
            0x56 => Some(Self::FilterLast),
            0x57 => Some(Self::FilterLength),
            0x58 => Some(Self::FilterDefault),
            0x59 => Some(Self::FilterString),
            0x5A => Some(Self::FilterInt),

            0x60 => Some(Self::Test),
            0x61 => Some(Self::TestDefined),
            0x62 => Some(Self::TestNone),

            0x70 => Some(Self::Jump),
            0x71 => Some(Self::JumpIfFalse),
            0x72 => Some(Self::JumpIfTrue),
            0x73 => Some(Self::JumpIfFalseOrPop),
            0x74 => Some(Self::JumpIfTrueOrPop),
            0x75 => Some(Self::ForLoopStart),
            0x76 => Some(Self::ForLoopEnd),
            0x77 => Some(Self::BreakLoop),
            0x78 => Some(Self::ContinueLoop),

            0xF0 => Some(Self::Pop),
            0xFF => Some(Self::End),

            _ => None,
        }
    }

    /// Convert to raw byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Specialized filter opcode for a filter name
    pub fn for_filter(name: &str) -> Option<Self> {
        match name {
            "upper" => Some(Self::FilterUpper),
            "lower" => Some(Self::FilterLower),
            "escape" | "e" => Some(Self::FilterEscape),
            "trim" => Some(Self::FilterTrim),
            "first" => Some(Self::FilterFirst),
            "last" => Some(Self::FilterLast),
            "length" | "count" => Some(Self::FilterLength),
            "default" | "d" => Some(Self::FilterDefault),
            "string" => Some(Self::FilterString),
            "int" => Some(Self::FilterInt),
            _ => None,
        }
    }

    /// True if the operand is an instruction index
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::JumpIfFalse
                | Self::JumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::ForLoopEnd
                | Self::BreakLoop
                | Self::ContinueLoop
        )
    }

    /// Get the name of this opcode
    pub const fn name(self) -> &'static str {
        match self {
            // Constants
            Self::LoadNone => "LOAD_NONE",
            Self::LoadTrue => "LOAD_TRUE",
            Self::LoadFalse => "LOAD_FALSE",
            Self::LoadZero => "LOAD_ZERO",
            Self::LoadOne => "LOAD_ONE",
            Self::LoadMinusOne => "LOAD_MINUS_ONE",
            Self::LoadInt => "LOAD_INT",
            Self::LoadString => "LOAD_STRING",
            Self::LoadConst => "LOAD_CONST",
            Self::BuildList => "BUILD_LIST",
            Self::BuildMap => "BUILD_MAP",
            Self::LoadUndefined => "LOAD_UNDEFINED",
            // Output
            Self::EmitText => "EMIT_TEXT",
            Self::Emit => "EMIT",
            // Variables
            Self::LoadVar => "LOAD_VAR",
            Self::StoreVar => "STORE_VAR",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::PushScope => "PUSH_SCOPE",
            Self::PopScope => "POP_SCOPE",
            // Operators
            Self::BinOp => "BIN_OP",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::UnaryOp => "UNARY_OP",
            Self::Not => "NOT",
            Self::Neg => "NEG",
            // Access
            Self::GetAttr => "GET_ATTR",
            Self::GetItem => "GET_ITEM",
            Self::Slice => "SLICE",
            Self::LoopAttr => "LOOP_ATTR",
            Self::LoopCycle => "LOOP_CYCLE",
            // Calls
            Self::CallFunction => "CALL_FUNCTION",
            Self::CallMethod => "CALL_METHOD",
            Self::CallMacro => "CALL_MACRO",
            Self::CallMacroWithCaller => "CALL_MACRO_WITH_CALLER",
            Self::SetCaller => "SET_CALLER",
            Self::InvokeCaller => "INVOKE_CALLER",
            Self::DefineMacro => "DEFINE_MACRO",
            Self::Return => "RETURN",
            // Filters
            Self::Filter => "FILTER",
            Self::FilterUpper => "FILTER_UPPER",
            Self::FilterLower => "FILTER_LOWER",
            Self::FilterEscape => "FILTER_ESCAPE",
            Self::FilterTrim => "FILTER_TRIM",
            Self::FilterFirst => "FILTER_FIRST",
            Self::FilterLast => "FILTER_LAST",
            Self::FilterLength => "FILTER_LENGTH",
            Self::FilterDefault => "FILTER_DEFAULT",
            Self::FilterString => "FILTER_STRING",
            Self::FilterInt => "FILTER_INT",
            // Tests
            Self::Test => "TEST",
            Self::TestDefined => "TEST_DEFINED",
            Self::TestNone => "TEST_NONE",
            // Control flow
            Self::Jump => "JUMP",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
            Self::JumpIfTrue => "JUMP_IF_TRUE",
            Self::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Self::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Self::ForLoopStart => "FOR_LOOP_START",
            Self::ForLoopEnd => "FOR_LOOP_END",
            Self::BreakLoop => "BREAK_LOOP",
            Self::ContinueLoop => "CONTINUE_LOOP",
            // Misc
            Self::Pop => "POP",
            Self::End => "END",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single instruction: opcode plus 32-bit operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation
    pub opcode: Opcode,
    /// Opcode-specific operand
    pub operand: u32,
}

impl Instruction {
    /// Create an instruction
    #[inline]
    pub const fn new(opcode: Opcode, operand: u32) -> Self {
        Self { opcode, operand }
    }

    /// Create an instruction whose operand is unused
    #[inline]
    pub const fn simple(opcode: Opcode) -> Self {
        Self { opcode, operand: 0 }
    }
}
