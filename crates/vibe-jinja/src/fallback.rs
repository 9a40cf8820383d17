//! Tree-walking fallback hook
//!
//! Templates that use constructs the bytecode backend does not cover
//! (inheritance, includes, imports, macros, filter and set blocks) are handed
//! to a [`FallbackRenderer`] together with their syntax tree. The engine ships
//! none; without one such templates fail to render with
//! [`EngineError::NoFallback`](crate::EngineError::NoFallback).

use vibe_syntax::TemplateAst;
use vibe_vm::{Environment, ValueMap};

use crate::error::EngineResult;

/// Renders a syntax tree directly
pub trait FallbackRenderer: Send + Sync {
    /// Render `ast` for template `name`
    fn render(
        &self,
        name: &str,
        ast: &TemplateAst,
        env: &Environment,
        context: &ValueMap,
    ) -> EngineResult<String>;
}

impl<F> FallbackRenderer for F
where
    F: Fn(&str, &TemplateAst, &Environment, &ValueMap) -> EngineResult<String> + Send + Sync,
{
    fn render(
        &self,
        name: &str,
        ast: &TemplateAst,
        env: &Environment,
        context: &ValueMap,
    ) -> EngineResult<String> {
        self(name, ast, env, context)
    }
}
