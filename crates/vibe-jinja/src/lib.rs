//! vibe-jinja template engine.
//!
//! Jinja-style templates compiled to bytecode and executed on a stack VM.
//!
//! # Features
//!
//! - **Bytecode backend**: expressions, output, conditionals, loops, `with`
//!   blocks, macros and call blocks lower to a compact instruction stream
//! - **Fallback hook**: templates using inheritance, includes or imports are
//!   handed to a pluggable tree-walking renderer
//! - **Caching**: compiled templates are shared; bytecode can be persisted in
//!   memory or on disk and is checked against the source checksum
//! - **Async filters**: futures that are not ready suspend the render and
//!   are awaited by [`Template::render_async`]
//!
//! # Example
//!
//! ```no_run
//! use vibe_jinja::Engine;
//!
//! fn main() -> Result<(), vibe_jinja::EngineError> {
//!     let engine = Engine::new();
//!     engine.add_template("hello", "Hello {{ name|upper }}!")?;
//!     let out = engine.render("hello", &serde_json::json!({"name": "world"}))?;
//!     assert_eq!(out, "Hello WORLD!");
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod loader;
pub mod template;

pub use cache::{BytecodeCache, DirectoryCache, MemoryCache};
pub use config::{BackendMode, EngineConfig, load_config};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use fallback::FallbackRenderer;
pub use loader::{ChainLoader, FileSystemLoader, Loader, MemoryLoader};
pub use template::{Compiled, Template, to_context};

// Re-export the layers below for hosts that register callables or inspect
// bytecode
pub use vibe_bytecode as bytecode;
pub use vibe_compiler as compiler;
pub use vibe_syntax as syntax;
pub use vibe_vm::{Args, Environment, PendingValue, Value, ValueMap, VmError};
