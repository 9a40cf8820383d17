//! Compilation errors

use thiserror::Error;
use vibe_bytecode::BytecodeError;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Construct the generator cannot lower
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Name pool exceeded the 16-bit operand field
    #[error("Too many names (max 65535)")]
    TooManyNames,

    /// String pool overflow
    #[error("Too many strings (max 4294967295)")]
    TooManyStrings,

    /// Constant pool overflow
    #[error("Too many constants (max 4294967295)")]
    TooManyConstants,

    /// Call, filter or test with more than 255 positional or keyword arguments
    #[error("Too many arguments (max 255)")]
    TooManyArguments,

    /// Container assembly failed
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl CompileError {
    /// Create an unsupported-construct error
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
