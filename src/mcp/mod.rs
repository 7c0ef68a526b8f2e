//! MCP boundary: exposes the engine as tools over stdio.
pub mod server;
pub mod tools;
