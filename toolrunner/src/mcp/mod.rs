//! External tool-server integration: a hand-rolled JSON-RPC-over-pipes
//! client (Component H) and the manager that owns one per configured
//! server (Component I).

pub mod client;
pub mod manager;

pub use client::McpClient;
pub use manager::ExternalToolManager;
