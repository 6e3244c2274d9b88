//! # noesis-mcp
//!
//! MCP (Model Context Protocol) client for Noesis.
//!
//! This crate provides:
//! - JSON-RPC protocol types and stream framing
//! - stdio, WebSocket and HTTP+SSE transports with id-correlated requests
//! - A connection registry that owns server lifecycles
//! - A façade for tool calls, resource reads and cross-server search

pub mod error;
pub mod facade;
pub mod framing;
pub mod methods;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use error::{McpError, TransportError};
pub use facade::{search_tool, RemoteHit, ToolFacade, ToolOutput};
pub use protocol::{ClientInfo, McpToolDefinition, Resource};
pub use registry::{ConnectionRegistry, ConnectionState, ServerStatus};
pub use transport::Transport;
