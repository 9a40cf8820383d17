//! Compiled templates

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use vibe_bytecode::Bytecode;
use vibe_syntax::TemplateAst;
use vibe_vm::{Environment, Value, ValueMap, Vm};

use crate::error::{EngineError, EngineResult};
use crate::fallback::FallbackRenderer;

/// How a template is executed
#[derive(Debug, Clone)]
pub enum Compiled {
    /// Shared bytecode run on a fresh VM per render
    Bytecode(Arc<Bytecode<'static>>),
    /// Syntax tree handed to the fallback renderer
    TreeWalk {
        /// Parsed template
        ast: Arc<TemplateAst>,
        /// Construct that ruled out bytecode
        reason: &'static str,
    },
}

/// A template ready to render.
///
/// Cheap to share: the compiled form and environment are reference counted,
/// and every render builds its own VM.
#[derive(Clone)]
pub struct Template {
    name: String,
    compiled: Compiled,
    env: Arc<Environment>,
    fallback: Option<Arc<dyn FallbackRenderer>>,
}

impl Template {
    pub(crate) fn new(
        name: impl Into<String>,
        compiled: Compiled,
        env: Arc<Environment>,
        fallback: Option<Arc<dyn FallbackRenderer>>,
    ) -> Self {
        Self {
            name: name.into(),
            compiled,
            env,
            fallback,
        }
    }

    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compiled form
    pub fn compiled(&self) -> &Compiled {
        &self.compiled
    }

    /// Bytecode, if the template runs on the VM
    pub fn bytecode(&self) -> Option<&Arc<Bytecode<'static>>> {
        match &self.compiled {
            Compiled::Bytecode(code) => Some(code),
            Compiled::TreeWalk { .. } => None,
        }
    }

    /// Render with any serializable context (a map, a struct, or `()`)
    pub fn render<S: Serialize + ?Sized>(&self, context: &S) -> EngineResult<String> {
        self.render_map(&to_context(context)?)
    }

    /// Render with an existing value map
    pub fn render_map(&self, context: &ValueMap) -> EngineResult<String> {
        tracing::trace!(template = %self.name, "render start");
        let output = match &self.compiled {
            Compiled::Bytecode(code) => Vm::new(code, &self.env, context).render()?,
            Compiled::TreeWalk { ast, reason } => self.render_fallback(ast, reason, context)?,
        };
        tracing::trace!(template = %self.name, bytes = output.len(), "render finish");
        Ok(output)
    }

    /// Render, awaiting async filters and tests that were not ready inline
    pub async fn render_async<S: Serialize + ?Sized>(&self, context: &S) -> EngineResult<String> {
        let context = to_context(context)?;
        tracing::trace!(template = %self.name, "async render start");
        let output = match &self.compiled {
            Compiled::Bytecode(code) => vibe_vm::render_resolving(code, &self.env, &context).await?,
            Compiled::TreeWalk { ast, reason } => self.render_fallback(ast, reason, &context)?,
        };
        tracing::trace!(template = %self.name, bytes = output.len(), "async render finish");
        Ok(output)
    }

    fn render_fallback(
        &self,
        ast: &TemplateAst,
        reason: &'static str,
        context: &ValueMap,
    ) -> EngineResult<String> {
        match &self.fallback {
            Some(fallback) => fallback.render(&self.name, ast, &self.env, context),
            None => Err(EngineError::NoFallback {
                name: self.name.clone(),
                reason,
            }),
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("compiled", &self.compiled)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Convert a serializable context to the top-level variable map.
///
/// `()` and `None` give an empty map; anything else must serialize to a map.
pub fn to_context<S: Serialize + ?Sized>(context: &S) -> EngineResult<ValueMap> {
    let json = serde_json::to_value(context).map_err(|e| EngineError::Context(e.to_string()))?;
    match Value::from(json) {
        Value::None => Ok(ValueMap::new()),
        Value::Map(map) => Ok(map),
        other => Err(EngineError::Context(format!(
            "expected a map, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Page<'a> {
        title: &'a str,
        count: i64,
    }

    #[test]
    fn test_to_context() {
        let map = to_context(&Page {
            title: "Home",
            count: 2,
        })
        .unwrap();
        assert_eq!(map.get("title"), Some(&Value::from("Home")));
        assert_eq!(map.get("count"), Some(&Value::Int(2)));
        assert!(to_context(&()).unwrap().is_empty());
        assert!(matches!(to_context(&[1, 2]), Err(EngineError::Context(_))));
    }
}
