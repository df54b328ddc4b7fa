//! Bridge MCP Server - ERP tools over the Model Context Protocol
//!
//! This crate provides the MCP (Model Context Protocol) server that:
//! - Speaks JSON-RPC 2.0 over stdio to Claude Desktop and other clients
//! - Forwards tool calls to an ERP adapter (Omie or Nibo)
//! - Resolves per-company credentials through the vault on every call
//! - Surfaces credential failures as tool errors with stable codes

pub mod adapter;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod state;

pub use adapter::*;
pub use handlers::*;
pub use registry::*;
pub use server::*;
pub use state::*;
