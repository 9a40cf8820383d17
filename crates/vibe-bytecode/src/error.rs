//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while reading or writing bytecode
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in bytecode file
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported bytecode version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Invalid opcode
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Unknown tag in the constant pool encoding
    #[error("Invalid constant tag: {0}")]
    InvalidConstantTag(u8),

    /// Constant pool entry is not a literal expression, or nests too deeply
    #[error("Constant is not a literal expression")]
    NonLiteralConstant,

    /// Pool entry is not valid UTF-8
    #[error("Invalid UTF-8 in string pool")]
    InvalidUtf8,

    /// Loop start and end instructions do not pair up
    #[error("Unbalanced loop instructions at {0}")]
    UnbalancedLoop(usize),

    /// Unexpected end of bytecode
    #[error("Unexpected end of bytecode")]
    UnexpectedEnd,

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for BytecodeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEnd
        } else {
            Self::Io(err)
        }
    }
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
