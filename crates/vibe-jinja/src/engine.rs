//! Template engine: loading, compiling and caching templates

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use vibe_bytecode::Bytecode;
use vibe_compiler::{Backend, Compiler, policy};
use vibe_syntax::TemplateAst;
use vibe_vm::Environment;

use crate::cache::{BytecodeCache, DirectoryCache};
use crate::config::{BackendMode, EngineConfig, load_config};
use crate::error::{EngineError, EngineResult};
use crate::fallback::FallbackRenderer;
use crate::loader::{Loader, MemoryLoader};
use crate::template::{Compiled, Template};

/// Name given to templates rendered from a string
pub const STRING_TEMPLATE_NAME: &str = "<string>";

/// Template engine.
///
/// Owns the environment, the loader and every compiled template. Compiled
/// templates are shared: [`Engine::get_template`] hands out `Arc`s and each
/// render runs on its own VM.
pub struct Engine {
    config: EngineConfig,
    env: Arc<Environment>,
    loader: Box<dyn Loader>,
    templates: RwLock<FxHashMap<String, Arc<Template>>>,
    cache: Option<Arc<dyn BytecodeCache>>,
    fallback: Option<Arc<dyn FallbackRenderer>>,
}

impl Engine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine from explicit configuration.
    ///
    /// A configured `cache_dir` installs a [`DirectoryCache`].
    pub fn with_config(config: EngineConfig) -> Self {
        let mut env = Environment::new();
        env.set_autoescape(config.autoescape);
        env.set_max_recursion(config.max_recursion);
        let cache = config
            .cache_dir
            .as_ref()
            .map(|dir| Arc::new(DirectoryCache::new(dir)) as Arc<dyn BytecodeCache>);
        Self {
            config,
            env: Arc::new(env),
            loader: Box::new(MemoryLoader::new()),
            templates: RwLock::new(FxHashMap::default()),
            cache,
            fallback: None,
        }
    }

    /// Create an engine from `path`, or from a `vibe.toml` found by walking
    /// up from the current directory
    pub fn from_config_file(path: Option<&Path>) -> EngineResult<Self> {
        Ok(Self::with_config(load_config(path)?))
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Filters, tests and globals
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Mutable environment.
    ///
    /// Compiled templates capture the environment, so they are dropped and
    /// recompiled on next use.
    pub fn env_mut(&mut self) -> &mut Environment {
        self.templates.get_mut().clear();
        Arc::make_mut(&mut self.env)
    }

    /// Replace the loader consulted by [`Engine::get_template`]
    pub fn set_loader(&mut self, loader: impl Loader + 'static) {
        self.loader = Box::new(loader);
        self.templates.get_mut().clear();
    }

    /// Install a bytecode cache
    pub fn set_cache(&mut self, cache: impl BytecodeCache + 'static) {
        self.cache = Some(Arc::new(cache));
    }

    /// Bytecode cache, if any
    pub fn cache(&self) -> Option<&Arc<dyn BytecodeCache>> {
        self.cache.as_ref()
    }

    /// Install the renderer for templates the bytecode backend cannot run
    pub fn set_fallback(&mut self, fallback: impl FallbackRenderer + 'static) {
        self.fallback = Some(Arc::new(fallback));
        self.templates.get_mut().clear();
    }

    /// Compile `source` and register it as `name`, replacing any previous
    /// template of that name
    pub fn add_template(&self, name: &str, source: &str) -> EngineResult<Arc<Template>> {
        let template = Arc::new(self.compile(name, source, true)?);
        self.templates
            .write()
            .insert(name.to_string(), template.clone());
        Ok(template)
    }

    /// Fetch a compiled template, loading and compiling it on first use
    pub fn get_template(&self, name: &str) -> EngineResult<Arc<Template>> {
        if let Some(template) = self.templates.read().get(name) {
            return Ok(template.clone());
        }
        let source = self
            .loader
            .load(name)?
            .ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))?;
        let template = Arc::new(self.compile(name, &source, true)?);
        let mut templates = self.templates.write();
        Ok(templates
            .entry(name.to_string())
            .or_insert(template)
            .clone())
    }

    /// Remove every compiled template
    pub fn clear_templates(&self) {
        self.templates.write().clear();
    }

    /// Render the template registered or loadable as `name`
    pub fn render<S: Serialize + ?Sized>(&self, name: &str, context: &S) -> EngineResult<String> {
        self.get_template(name)?.render(context)
    }

    /// Compile and render a one-off template
    pub fn render_str<S: Serialize + ?Sized>(
        &self,
        source: &str,
        context: &S,
    ) -> EngineResult<String> {
        self.compile(STRING_TEMPLATE_NAME, source, false)?
            .render(context)
    }

    /// Compile `source` to the persisted bytecode format.
    ///
    /// The bytecode backend is used regardless of the selection policy.
    pub fn compile_to_bytes(&self, source: &str) -> EngineResult<Vec<u8>> {
        let ast = self.parse(STRING_TEMPLATE_NAME, source)?;
        let code = Compiler::compile(&ast, source)?;
        Ok(code.to_bytes()?)
    }

    /// Wrap persisted bytecode as a template.
    ///
    /// No staleness check is possible without the source; callers holding
    /// it should use [`Bytecode::is_fresh`].
    pub fn template_from_bytes(&self, name: &str, bytes: &[u8]) -> EngineResult<Template> {
        let code = Bytecode::from_bytes(bytes)?;
        Ok(self.make_template(name, Compiled::Bytecode(Arc::new(code))))
    }

    fn parse(&self, name: &str, source: &str) -> EngineResult<TemplateAst> {
        vibe_syntax::parse_with_options(source, &self.config.lexer_options())
            .map_err(|e| EngineError::syntax(name, e))
    }

    fn compile(&self, name: &str, source: &str, use_cache: bool) -> EngineResult<Template> {
        let cache = self.cache.as_ref().filter(|_| use_cache);
        let key = self.cache_key(name);
        if let Some(cache) = cache
            && let Some(code) = cache.load(&key, source)?
        {
            return Ok(self.make_template(name, Compiled::Bytecode(code)));
        }

        let ast = self.parse(name, source)?;
        let backend = match self.config.backend {
            BackendMode::Bytecode => Backend::Bytecode,
            BackendMode::Auto => policy::select_backend(&ast),
        };
        tracing::debug!(template = name, ?backend, "selected backend");

        let compiled = match backend {
            Backend::Bytecode => {
                let code = Arc::new(Compiler::compile(&ast, source)?.into_owned());
                tracing::trace!(template = name, instructions = code.len(), "compiled bytecode");
                if let Some(cache) = cache
                    && let Err(e) = cache.store(&key, &code)
                {
                    tracing::warn!(template = name, error = %e, "failed to cache bytecode");
                }
                Compiled::Bytecode(code)
            }
            Backend::TreeWalk => Compiled::TreeWalk {
                reason: policy::fallback_reason(&ast).unwrap_or("an unsupported construct"),
                ast: Arc::new(ast),
            },
        };
        Ok(self.make_template(name, compiled))
    }

    fn make_template(&self, name: &str, compiled: Compiled) -> Template {
        Template::new(name, compiled, self.env.clone(), self.fallback.clone())
    }

    /// Key under which the bytecode of `name` is cached: the name plus every
    /// setting that changes generated code
    pub fn cache_key(&self, name: &str) -> String {
        let options = self.config.lexer_options();
        format!(
            "{}?trim_blocks={}&lstrip_blocks={}&keep_trailing_newline={}&backend={:?}",
            name,
            options.trim_blocks,
            options.lstrip_blocks,
            options.keep_trailing_newline,
            self.config.backend
        )
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("templates", &self.templates.read().len())
            .field("cache", &self.cache.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
