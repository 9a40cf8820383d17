//! CLI command implementations.

pub mod compile;
pub mod disasm;
pub mod render;
