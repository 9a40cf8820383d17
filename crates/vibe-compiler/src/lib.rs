//! # vibe-jinja compiler
//!
//! Lowers a parsed template to bytecode.
//!
//! ## Pipeline
//!
//! 1. [`policy::select_backend`] decides whether the template is expressible
//!    in bytecode at all
//! 2. [`Compiler`] walks the syntax tree once, emitting instructions and
//!    back-patching forward jumps
//! 3. The resulting [`vibe_bytecode::Bytecode`] borrows literal constants
//!    from the tree until it is made owned

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codegen;
pub mod compiler;
pub mod error;
pub mod policy;
pub mod scope;
pub mod visit;

pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};
pub use policy::{Backend, select_backend};
