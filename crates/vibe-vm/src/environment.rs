//! Filter, test and global registries shared by every render

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::VmResult;
use crate::value::Value;
use crate::{builtin_tests, filters, functions};

/// Default macro nesting limit
pub const DEFAULT_MAX_RECURSION: usize = 64;

/// Synchronous filter: input value and call arguments to output value
pub type FilterFn = Arc<dyn Fn(Value, &Args) -> VmResult<Value> + Send + Sync>;

/// Asynchronous filter
pub type AsyncFilterFn =
    Arc<dyn Fn(Value, Args) -> BoxFuture<'static, VmResult<Value>> + Send + Sync>;

/// Synchronous test
pub type TestFn = Arc<dyn Fn(&Value, &Args) -> VmResult<bool> + Send + Sync>;

/// Asynchronous test
pub type AsyncTestFn = Arc<dyn Fn(Value, Args) -> BoxFuture<'static, VmResult<bool>> + Send + Sync>;

/// Global function callable from templates
pub type FunctionFn = Arc<dyn Fn(&Args) -> VmResult<Value> + Send + Sync>;

/// Arguments passed to a filter, test or function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// Positional arguments in call order
    pub args: Vec<Value>,
    /// Keyword arguments in call order
    pub kwargs: IndexMap<String, Value>,
}

impl Args {
    /// Positional-only arguments
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: IndexMap::new(),
        }
    }

    /// Positional argument at `idx`
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.args.get(idx)
    }

    /// Keyword argument `name`
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Keyword `name`, falling back to positional `idx`
    pub fn lookup(&self, idx: usize, name: &str) -> Option<&Value> {
        self.kwarg(name).or_else(|| self.get(idx))
    }

    /// Number of positional arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when no arguments were passed at all
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// A registered filter
#[derive(Clone)]
pub struct Filter {
    /// Synchronous implementation
    pub sync_fn: Option<FilterFn>,
    /// Asynchronous implementation
    pub async_fn: Option<AsyncFilterFn>,
    /// Whether async renders should prefer `async_fn`
    pub is_async: bool,
}

/// A registered test
#[derive(Clone)]
pub struct Test {
    /// Synchronous implementation
    pub sync_fn: Option<TestFn>,
    /// Asynchronous implementation
    pub async_fn: Option<AsyncTestFn>,
    /// Whether async renders should prefer `async_fn`
    pub is_async: bool,
}

/// Registries consulted by the VM
#[derive(Clone)]
pub struct Environment {
    filters: FxHashMap<String, Filter>,
    tests: FxHashMap<String, Test>,
    functions: FxHashMap<String, FunctionFn>,
    globals: FxHashMap<String, Value>,
    autoescape: bool,
    max_recursion: usize,
}

impl Environment {
    /// Environment with the built-in filters, tests and functions
    pub fn new() -> Self {
        let mut env = Self::empty();
        filters::register(&mut env);
        builtin_tests::register(&mut env);
        functions::register(&mut env);
        env
    }

    /// Environment with no registrations
    pub fn empty() -> Self {
        Self {
            filters: FxHashMap::default(),
            tests: FxHashMap::default(),
            functions: FxHashMap::default(),
            globals: FxHashMap::default(),
            autoescape: false,
            max_recursion: DEFAULT_MAX_RECURSION,
        }
    }

    /// Register a synchronous filter
    pub fn add_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &Args) -> VmResult<Value> + Send + Sync + 'static,
    {
        self.filters.insert(
            name.into(),
            Filter {
                sync_fn: Some(Arc::new(f)),
                async_fn: None,
                is_async: false,
            },
        );
    }

    /// Register an async filter
    pub fn add_async_filter<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VmResult<Value>> + Send + 'static,
    {
        self.filters.insert(
            name.into(),
            Filter {
                sync_fn: None,
                async_fn: Some(Arc::new(move |value, args| f(value, args).boxed())),
                is_async: true,
            },
        );
    }

    /// Register a prebuilt filter entry
    pub fn insert_filter(&mut self, name: impl Into<String>, filter: Filter) {
        self.filters.insert(name.into(), filter);
    }

    /// Register a synchronous test
    pub fn add_test<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &Args) -> VmResult<bool> + Send + Sync + 'static,
    {
        self.tests.insert(
            name.into(),
            Test {
                sync_fn: Some(Arc::new(f)),
                async_fn: None,
                is_async: false,
            },
        );
    }

    /// Register an async test
    pub fn add_async_test<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VmResult<bool>> + Send + 'static,
    {
        self.tests.insert(
            name.into(),
            Test {
                sync_fn: None,
                async_fn: Some(Arc::new(move |value, args| f(value, args).boxed())),
                is_async: true,
            },
        );
    }

    /// Register a global function
    pub fn add_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Args) -> VmResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    /// Register a global variable
    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    /// Look up a filter
    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    /// Look up a test
    pub fn test(&self, name: &str) -> Option<&Test> {
        self.tests.get(name)
    }

    /// Look up a function
    pub fn function(&self, name: &str) -> Option<&FunctionFn> {
        self.functions.get(name)
    }

    /// Look up a global variable
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// True if any filter or test is async
    pub fn has_async(&self) -> bool {
        self.filters.values().any(|f| f.is_async) || self.tests.values().any(|t| t.is_async)
    }

    /// Whether output of non-safe values is HTML escaped
    pub fn autoescape(&self) -> bool {
        self.autoescape
    }

    /// Enable or disable autoescaping
    pub fn set_autoescape(&mut self, enabled: bool) {
        self.autoescape = enabled;
    }

    /// Macro nesting limit
    pub fn max_recursion(&self) -> usize {
        self.max_recursion
    }

    /// Set the macro nesting limit
    pub fn set_max_recursion(&mut self, limit: usize) {
        self.max_recursion = limit;
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("filters", &self.filters.len())
            .field("tests", &self.tests.len())
            .field("functions", &self.functions.len())
            .field("globals", &self.globals.len())
            .field("autoescape", &self.autoescape)
            .field("max_recursion", &self.max_recursion)
            .finish()
    }
}
