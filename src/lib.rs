//! # Trellis
//!
//! A declarative markup compiler and the reactive runtime that renders it.
//!
//! ## Pipeline
//!
//! 1. **Parse**: markup is parsed as an HTML5 fragment. Attribute casing and
//!    source offsets are recovered from the raw markup.
//!
//! 2. **Classify**: every attribute is a binding (`[x]` / `bind-x`), a
//!    command (`*x` / `cmd-x`), an event hookup (`(x)` / `on-x`) or static.
//!
//! 3. **Emit**: elements lower to an immutable instruction tree. Commands wrap
//!    their element in priority order, so `*if` ends up outside `*for` on the
//!    same element.
//!
//! 4. **Instantiate**: a [`Program`] is interpreted against a [`Runtime`].
//!    Free symbols are resolved first, asynchronously, through a
//!    [`SymbolResolver`].
//!
//! ## Runtime Invariants
//!
//! 1. **Lifecycle**: nodes move `Detached -> Attached -> Detached` and end
//!    `Destroyed`. Illegal transitions are errors, never silent no-ops.
//!
//! 2. **Notification order**: connect is delivered parent-first, disconnect
//!    and destroy child-first.
//!
//! 3. **Subscriptions**: a projector is active exactly while its node is
//!    connected, and never again once the node is destroyed.
//!
//! 4. **Reconciliation**: list items are matched by value, then only entries
//!    outside the longest order-preserving run are moved.

pub mod cache;
pub mod codegen;
pub mod commands;
pub mod component;
pub mod discovery;
pub mod generators;
pub mod grammar;
pub mod parse;
pub mod render;
pub mod runtime;
pub mod scope;
pub mod validate;
pub mod visitor;

#[cfg(test)]
mod component_tests;
#[cfg(test)]
mod lifecycle_tests;
#[cfg(test)]
mod parse_tests;
#[cfg(test)]
mod render_tests;

pub use cache::ProgramCache;
pub use codegen::{Instruction, Operation, Program};
pub use commands::{CommandParser, ParserRegistry};
pub use component::{mount_component, Component, ComponentHooks};
pub use discovery::{LibraryError, TemplateLibrary};
pub use parse::CompileOptions;
pub use render::{ExpressionHost, Instance, MapResolver, SymbolResolver};
pub use runtime::{
    container::Container, lifecycle::DomState, NodeRef, Runtime, RuntimeConfig, RuntimeError,
    Signal,
};
pub use scope::Scope;
pub use validate::CompilerError;
