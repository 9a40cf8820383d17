//! # vibe-jinja VM
//!
//! Stack virtual machine executing compiled template bytecode.
//!
//! ## Design Principles
//!
//! - **Owned values**: every read clones; renders share nothing but the
//!   read-only container and environment
//! - **One VM per render**: all transient state is dropped with the VM
//! - **Hard failures**: type errors, missing callables and stack underflow
//!   abort the render with a single [`VmError`]
//! - **Async by re-rendering**: an async filter that is not ready yields a
//!   [`PendingValue`]; the host awaits it and renders again with the result

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builtin_tests;
mod context;
pub mod environment;
pub mod error;
pub mod filters;
pub mod functions;
pub mod interpreter;
pub mod methods;
pub mod ops;
pub mod pending;
pub mod value;

pub use environment::{Args, Environment, Filter, FilterFn, FunctionFn, Test, TestFn};
pub use error::{VmError, VmResult};
pub use interpreter::{AsyncRender, Resolved, Vm, render_resolving};
pub use pending::PendingValue;
pub use value::{Value, ValueMap};
