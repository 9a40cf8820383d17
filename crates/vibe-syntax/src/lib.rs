//! # vibe-jinja syntax
//!
//! Turns template source into the syntax tree consumed by the bytecode
//! generator and by tree-walking renderers.
//!
//! ## Pipeline
//!
//! 1. [`lexer::tokenize`] splits source into text runs and tag tokens
//! 2. [`parser::Parser`] builds a [`TemplateAst`] by recursive descent

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;

pub use ast::{
    BinaryOp, CallExpr, Expr, ForLoop, ForTarget, IfBranch, ImportName, Kwarg, Literal,
    MacroDef, MacroParam, Stmt, TemplateAst, UnaryOp,
};
pub use error::{SyntaxError, SyntaxResult};
pub use lexer::{LexerOptions, SpannedToken, Token};
pub use parser::{MAX_CHAIN, MAX_NESTING, Parser};

/// Parse template source with default lexer options.
pub fn parse(source: &str) -> SyntaxResult<TemplateAst> {
    Parser::new(source, &LexerOptions::default())?.parse()
}

/// Parse template source with explicit whitespace handling options.
pub fn parse_with_options(source: &str, options: &LexerOptions) -> SyntaxResult<TemplateAst> {
    Parser::new(source, options)?.parse()
}
