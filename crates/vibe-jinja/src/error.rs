//! Error types for the engine facade

use std::path::PathBuf;

use thiserror::Error;
use vibe_bytecode::BytecodeError;
use vibe_compiler::CompileError;
use vibe_syntax::SyntaxError;
use vibe_vm::VmError;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Template source could not be parsed
    #[error("Syntax error in '{name}': {source}")]
    Syntax {
        /// Template name
        name: String,
        /// Underlying parse error
        #[source]
        source: SyntaxError,
    },

    /// Bytecode generation failed
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Persisted bytecode could not be read or written
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    /// Rendering aborted
    #[error("Render error: {0}")]
    Render(#[from] VmError),

    /// No loader knows the template
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Template needs the tree-walking backend and none is installed
    #[error("Template '{name}' uses {reason}, which requires a fallback renderer")]
    NoFallback {
        /// Template name
        name: String,
        /// Construct that ruled out bytecode
        reason: &'static str,
    },

    /// Error reported by the fallback renderer
    #[error("Fallback error: {0}")]
    Fallback(String),

    /// Config file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Config {
        /// Offending file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Context could not be converted to template values
    #[error("Invalid context: {0}")]
    Context(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a syntax error for template `name`
    pub fn syntax(name: impl Into<String>, source: SyntaxError) -> Self {
        Self::Syntax {
            name: name.into(),
            source,
        }
    }

    /// Create a fallback error
    pub fn fallback(msg: impl Into<String>) -> Self {
        Self::Fallback(msg.into())
    }
}

/// Result type using EngineError
pub type EngineResult<T> = Result<T, EngineError>;
