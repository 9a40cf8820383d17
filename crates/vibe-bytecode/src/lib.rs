//! # vibe-jinja bytecode
//!
//! Instruction set and container shared by the generator and the VM.
//!
//! ## Design Principles
//!
//! - **Stack-based**: operands live on the VM evaluation stack
//! - **Fixed width**: every instruction is an opcode byte plus a 32-bit operand
//! - **Pooled**: strings, names and constant expressions are stored once
//! - **Serializable**: containers can be persisted and reloaded with a
//!   source checksum for staleness detection

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bytecode;
pub mod checksum;
pub mod constant;
pub mod error;
pub mod instruction;
pub mod macros;
pub mod operand;
pub mod pool;
pub mod serialize;

pub use bytecode::Bytecode;
pub use checksum::fnv1a64;
pub use constant::ConstantPool;
pub use error::{BytecodeError, Result};
pub use instruction::{Instruction, Opcode};
pub use macros::{CompiledMacro, MacroParamEntry};
pub use operand::{CallOperand, LoopAttr, SliceFlags};
pub use pool::InternPool;
pub use serialize::Header;

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for bytecode files
pub const BYTECODE_MAGIC: [u8; 4] = *b"VJBC";

/// Number of local variable slots addressable by `LOAD_LOCAL`/`STORE_LOCAL`
pub const MAX_LOCAL_SLOTS: usize = 64;
