//! Syntax errors

use thiserror::Error;

/// Errors produced while lexing or parsing a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// A tag or comment was opened but never closed
    #[error("line {line}: unterminated {what}")]
    Unterminated {
        /// What was left open (`comment`, `string`, ...)
        what: &'static str,
        /// Line the construct started on
        line: u32,
    },

    /// A character that cannot start any token
    #[error("line {line}: unexpected character {ch:?}")]
    UnexpectedChar {
        /// Offending character
        ch: char,
        /// Line number
        line: u32,
    },

    /// Parser found a token it did not expect
    #[error("line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        /// What the parser wanted
        expected: String,
        /// What it got
        found: String,
        /// Line number
        line: u32,
    },

    /// Template ended while a block was still open
    #[error("unexpected end of template, expected {expected}")]
    UnexpectedEof {
        /// Tag names that would have closed the block
        expected: String,
    },

    /// Unknown statement keyword
    #[error("line {line}: unknown tag '{name}'")]
    UnknownTag {
        /// Tag keyword
        name: String,
        /// Line number
        line: u32,
    },

    /// Structurally invalid construct (break outside loop, bad call block, ...)
    #[error("line {line}: {message}")]
    Invalid {
        /// Description
        message: String,
        /// Line number
        line: u32,
    },

    /// Blocks, brackets or operator chains nest deeper than the parser allows
    #[error("line {line}: template nested more than {limit} levels deep")]
    TooDeep {
        /// Nesting limit
        limit: usize,
        /// Line number
        line: u32,
    },

    /// Integer literal does not fit in 64 bits
    #[error("line {line}: integer literal out of range")]
    IntegerOverflow {
        /// Line number
        line: u32,
    },
}

impl SyntaxError {
    /// Create an unexpected-token error
    pub fn unexpected(expected: impl Into<String>, found: impl Into<String>, line: u32) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            line,
        }
    }

    /// Create an invalid-construct error
    pub fn invalid(message: impl Into<String>, line: u32) -> Self {
        Self::Invalid {
            message: message.into(),
            line,
        }
    }
}

/// Result type for lexing and parsing
pub type SyntaxResult<T> = Result<T, SyntaxError>;
