//! Tool-execution sessions
//!
//! Tools live in external MCP servers spoken to over stdio. A
//! [`ToolRegistry`] fans one orchestrator out to several servers.

mod mcp;
mod registry;

pub use registry::ToolRegistry;
