//! Lifecycle management for a fleet of MCP peer servers.
//!
//! [`manager::McpManager`] connects to stdio and HTTP/SSE peers described by
//! an `mcpServers` JSON file, keeps their connections and tool catalogues,
//! and hands out [`toolkit::ToolkitView`]s for calling peer functions.
//! [`handler::FleetServerHandler`] exposes the same operations as an MCP
//! server.

pub mod config;
pub mod error;
pub mod handler;
pub mod manager;
pub mod mcp;
pub mod toolkit;

#[cfg(test)]
pub(crate) mod test_support;
