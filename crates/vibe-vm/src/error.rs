//! VM error types

use thiserror::Error;
use vibe_bytecode::Opcode;

/// VM execution errors
///
/// Any error aborts the render; partial output is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// An instruction needed more operands than the stack held
    #[error("stack underflow at instruction {pc}")]
    StackUnderflow {
        /// Faulting instruction
        pc: usize,
    },

    /// Operation applied to values of the wrong type
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Integer division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Checked integer arithmetic overflowed
    #[error("integer overflow in {0}")]
    IntegerOverflow(&'static str),

    /// Slice with a step of zero
    #[error("slice step cannot be zero")]
    ZeroSliceStep,

    /// Filter name not registered
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    /// Test name not registered
    #[error("unknown test '{0}'")]
    UnknownTest(String),

    /// Function name not registered and not a macro variable
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Macro name not bound
    #[error("unknown macro '{0}'")]
    UnknownMacro(String),

    /// Method not supported on the receiver
    #[error("unknown method '{method}' on {type_name}")]
    UnknownMethod {
        /// Method name
        method: String,
        /// Receiver type
        type_name: &'static str,
    },

    /// `caller()` used where no call block is active
    #[error("caller() called outside of a call block")]
    NoCaller,

    /// Macro nesting exceeded the configured limit
    #[error("maximum recursion depth of {0} exceeded")]
    RecursionLimit(usize),

    /// Operand refers outside a pool or is otherwise malformed
    #[error("invalid operand {operand} for {opcode} at instruction {pc}")]
    InvalidOperand {
        /// Faulting opcode
        opcode: Opcode,
        /// Raw operand
        operand: u32,
        /// Faulting instruction
        pc: usize,
    },

    /// Loop instruction with no matching active loop
    #[error("loop instruction outside a loop at {0}")]
    NoActiveLoop(usize),

    /// Execution ran past the end of the instruction stream
    #[error("program counter {0} out of range")]
    PcOutOfRange(usize),

    /// An async filter or test did not complete in a synchronous render
    #[error("async callable '{0}' did not complete during synchronous render")]
    PendingInSyncRender(String),

    /// A repeated or padded value would grow past the size limit
    #[error("{what} would produce more than {limit} items")]
    TooLarge {
        /// Operation that was refused
        what: &'static str,
        /// Maximum allowed length
        limit: usize,
    },

    /// Error raised by a filter, test or function
    #[error("{0}")]
    Callback(String),
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a callback error
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }

    /// Create an invalid operand error
    pub fn invalid_operand(opcode: Opcode, operand: u32, pc: usize) -> Self {
        Self::InvalidOperand {
            opcode,
            operand,
            pc,
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
