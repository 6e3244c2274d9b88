//! Typed tool and resource calls over the registry.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::McpError;
use crate::methods;
use crate::protocol::{
    CallToolParams, ListResourcesResult, McpToolDefinition, ReadResourceParams, ReadResourceResult,
    Resource, ToolContent,
};
use crate::registry::{fetch_tools, ConnectionRegistry};

/// Normalized `tools/call` result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// The server returned a bare string.
    Text(String),
    /// Content blocks, either bare or wrapped in `{content, isError}`.
    Blocks { blocks: Vec<ToolContent>, is_error: bool },
    /// Any other JSON value.
    Object(Value),
}

impl ToolOutput {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::Blocks {
                blocks: parse_blocks(items),
                is_error: false,
            },
            Value::Object(mut map) if map.get("content").is_some_and(Value::is_array) => {
                let is_error = map.get("isError").and_then(Value::as_bool).unwrap_or(false);
                let items = match map.remove("content") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                Self::Blocks {
                    blocks: parse_blocks(items),
                    is_error,
                }
            }
            other => Self::Object(other),
        }
    }

    /// Whether the server flagged the result as a tool error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Blocks { is_error: true, .. })
    }

    /// Text pieces: one per text block, or the whole value otherwise.
    pub fn texts(&self) -> Vec<String> {
        match self {
            Self::Text(text) => vec![text.clone()],
            Self::Blocks { blocks, .. } => blocks
                .iter()
                .filter_map(ToolContent::as_text)
                .map(str::to_string)
                .collect(),
            Self::Object(value) => vec![value.to_string()],
        }
    }

    /// Render as a single string; text blocks are joined with newlines.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Object(value) => value.to_string(),
            Self::Blocks { .. } => self.texts().join("\n"),
        }
    }
}

// Parsed one at a time so a single odd block does not discard the rest.
fn parse_blocks(items: Vec<Value>) -> Vec<ToolContent> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or(ToolContent::Unknown))
        .collect()
}

/// One text result from a remote search.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHit {
    pub server: String,
    pub tool: String,
    pub content: String,
}

/// Façade for calling tools and reading resources on connected servers.
#[derive(Clone)]
pub struct ToolFacade {
    registry: Arc<ConnectionRegistry>,
}

impl ToolFacade {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Call a tool and return its normalized output.
    pub async fn call_tool_output(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutput, McpError> {
        let transport = self.registry.connected_transport(server_id)?;
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments,
        })?;

        debug!(server = %server_id, tool, "Calling tool");
        let raw = transport.send_request(methods::TOOLS_CALL, Some(params)).await?;
        let output = ToolOutput::from_value(raw);
        if output.is_error() {
            warn!(server = %server_id, tool, "Tool returned error");
        }
        Ok(output)
    }

    /// Call a tool and return its output as text.
    pub async fn call_tool(&self, server_id: &str, tool: &str, arguments: Value) -> Result<String, McpError> {
        Ok(self.call_tool_output(server_id, tool, arguments).await?.render())
    }

    /// Ask a server for its current tool list.
    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<McpToolDefinition>, McpError> {
        let transport = self.registry.connected_transport(server_id)?;
        fetch_tools(&transport).await
    }

    pub async fn list_resources(&self, server_id: &str) -> Result<Vec<Resource>, McpError> {
        let transport = self.registry.connected_transport(server_id)?;
        let raw = transport.send_request(methods::RESOURCES_LIST, None).await?;
        let result: ListResourcesResult = serde_json::from_value(raw)?;
        Ok(result.resources)
    }

    pub async fn read_resource(&self, server_id: &str, uri: &str) -> Result<ReadResourceResult, McpError> {
        let transport = self.registry.connected_transport(server_id)?;
        let params = serde_json::to_value(ReadResourceParams { uri: uri.to_string() })?;
        let raw = transport.send_request(methods::RESOURCES_READ, Some(params)).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Run `query` against every connected server that has a search tool.
    ///
    /// All servers are queried concurrently. Failing servers and servers
    /// without a search tool contribute nothing.
    pub async fn search_across_servers(&self, query: &str) -> Vec<RemoteHit> {
        let searches = self.registry.live_servers().into_iter().filter_map(|server| {
            let Some(tool) = search_tool(&server.tools) else {
                debug!(server = %server.id, "No search tool, skipping");
                return None;
            };
            let tool = tool.to_string();
            Some(async move {
                let params = CallToolParams {
                    name: tool.clone(),
                    arguments: json!({ "query": query }),
                };
                let outcome = match serde_json::to_value(params) {
                    Ok(params) => server
                        .transport
                        .send_request(methods::TOOLS_CALL, Some(params))
                        .await
                        .map(ToolOutput::from_value),
                    Err(e) => Err(e.into()),
                };
                (server.id, tool, outcome)
            })
        });

        let results = join_all(searches).await;

        let mut hits = Vec::new();
        for (server, tool, outcome) in results {
            match outcome {
                Ok(output) if output.is_error() => {
                    warn!(server = %server, tool = %tool, "Search tool returned error");
                }
                Ok(output) => {
                    hits.extend(output.texts().into_iter().filter(|t| !t.trim().is_empty()).map(
                        |content| RemoteHit {
                            server: server.clone(),
                            tool: tool.clone(),
                            content,
                        },
                    ));
                }
                Err(e) => warn!(server = %server, tool = %tool, error = %e, "Remote search failed"),
            }
        }
        debug!(query, hits = hits.len(), "Remote search complete");
        hits
    }
}

/// First cached tool whose name mentions search.
pub fn search_tool(tools: &[McpToolDefinition]) -> Option<&str> {
    tools
        .iter()
        .map(|t| t.name.as_str())
        .find(|name| name.to_lowercase().contains("search"))
}
