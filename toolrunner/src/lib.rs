//! Policy-driven command dispatcher for an agent-driven
//! penetration-testing runner.
//!
//! Classifies shell commands and named tool calls against a registry of
//! tool definitions, gates dangerous ones behind a denylist and an
//! approval protocol, streams per-line subprocess output with
//! cancellation and timeout, and multiplexes external tool-servers
//! speaking a JSON-RPC line protocol over pipes.
//!
//! No component here installs the global `tracing` subscriber — that is
//! left to the embedding binary.

pub mod config;
pub mod denylist;
pub mod dispatcher;
pub mod entities;
pub mod error;
pub mod fallback;
pub mod mcp;
pub mod model;
pub mod registry;
pub mod result_log;
pub mod runner;
pub mod template;
pub mod truncate;

pub use dispatcher::{Dispatcher, ToolCallOutcome};
pub use error::{ErrorKind, Result, RuntimeError};
pub use runner::{RunContext, RunHandle, RunOutcome, Runner};
