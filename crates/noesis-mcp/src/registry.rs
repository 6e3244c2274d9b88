//! Connection registry.
//!
//! Owns one [`Connection`] per configured server and every live
//! [`Transport`]. Lifecycle operations (initialize, reconnect, disconnect)
//! are serialized; lookups only take a short synchronous read lock, so a
//! tool call made while servers are still connecting fails fast with
//! [`McpError::UnknownServer`] instead of waiting.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use noesis_core::{ServerConfig, TransportKind};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::McpError;
use crate::methods;
use crate::protocol::{ClientInfo, ListToolsResult, McpToolDefinition, ServerInfo};
use crate::transport::Transport;

/// Delay before the first retry; doubles with each further attempt.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Lifecycle state of a configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Configured with `enabled = false`; never connected.
    Disabled,
    /// Was connected and has been shut down.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Handshake completed.
    Connected,
    /// Every connection attempt failed.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Registry entry for one server.
pub struct Connection {
    id: String,
    config: Arc<ServerConfig>,
    state: ConnectionState,
    transport: Option<Arc<Transport>>,
    tools: Vec<McpToolDefinition>,
    server_info: Option<ServerInfo>,
    last_error: Option<String>,
}

impl Connection {
    fn new(id: String, config: Arc<ServerConfig>) -> Self {
        let state = if config.enabled {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disabled
        };
        Self {
            id,
            config,
            state,
            transport: None,
            tools: Vec::new(),
            server_info: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Tools cached when the connection was made.
    pub fn tools(&self) -> &[McpToolDefinition] {
        &self.tools
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connected and the transport is still live.
    fn is_usable(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    fn status(&self) -> ServerStatus {
        // A transport that died underneath a Connected entry reports as an error.
        let state = if self.state == ConnectionState::Connected && !self.is_usable() {
            ConnectionState::Error
        } else {
            self.state
        };
        ServerStatus {
            id: self.id.clone(),
            name: self.config.display_name(&self.id).to_string(),
            transport: self.config.transport,
            state,
            tool_count: self.tools.len(),
            server_name: self.server_info.as_ref().map(|info| info.name.clone()),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time view of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub tool_count: usize,
    /// Name the server reported during the handshake.
    pub server_name: Option<String>,
    pub last_error: Option<String>,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.transport, self.state)?;
        if self.state == ConnectionState::Connected {
            write!(f, " ({} tools)", self.tool_count)?;
        }
        if let Some(err) = &self.last_error {
            write!(f, ": {}", err)?;
        }
        Ok(())
    }
}

/// Handle used by the façade for fan-out calls.
pub(crate) struct LiveServer {
    pub id: String,
    pub transport: Arc<Transport>,
    pub tools: Vec<McpToolDefinition>,
}

/// Registry of configured MCP servers and their connections.
pub struct ConnectionRegistry {
    client_info: ClientInfo,
    lifecycle: Mutex<()>,
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry announcing `client_info` to servers.
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            client_info,
            lifecycle: Mutex::new(()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Replace every entry with the given configurations and connect the
    /// enabled ones concurrently.
    ///
    /// Individual failures are logged and leave that server in the
    /// [`ConnectionState::Error`] state; they never abort the other servers.
    pub async fn initialize(&self, configs: &BTreeMap<String, ServerConfig>) {
        let _lifecycle = self.lifecycle.lock().await;
        self.disconnect_locked().await;
        self.initialize_locked(configs).await;
    }

    async fn initialize_locked(&self, configs: &BTreeMap<String, ServerConfig>) {
        let mut targets = Vec::new();
        {
            let mut connections = self.connections.write();
            connections.clear();
            for (id, config) in configs {
                let config = Arc::new(config.clone());
                let connection = Connection::new(id.clone(), Arc::clone(&config));
                if connection.state == ConnectionState::Disabled {
                    debug!(server = %id, "Skipping disabled server");
                } else {
                    targets.push((id.clone(), config));
                }
                connections.insert(id.clone(), connection);
            }
        }

        if targets.is_empty() {
            debug!("No enabled MCP servers configured");
            return;
        }

        info!(count = targets.len(), "Connecting MCP servers");
        let outcomes = join_all(
            targets
                .into_iter()
                .map(|(id, config)| async move { self.connect_one(&id, config).await.is_ok() }),
        )
        .await;

        let connected = outcomes.iter().filter(|ok| **ok).count();
        info!(
            connected,
            failed = outcomes.len() - connected,
            "MCP servers initialized"
        );
    }

    /// Connect one server, retrying with backoff, and record the outcome.
    async fn connect_one(&self, id: &str, config: Arc<ServerConfig>) -> Result<(), McpError> {
        let transport = Arc::new(Transport::from_config(
            id,
            Arc::clone(&config),
            self.client_info.clone(),
        ));
        let attempts = config.retries.saturating_add(1);

        info!(server = %id, transport = %config.transport, "Connecting to MCP server");

        let mut attempt = 1;
        let outcome = loop {
            match transport.connect().await {
                Ok(result) => break Ok(result),
                Err(e) if attempt < attempts => {
                    let delay = RETRY_BACKOFF * 2u32.saturating_pow(attempt - 1);
                    warn!(server = %id, attempt, attempts, error = %e, "Connection attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(result) => {
                let tools = match fetch_tools(&transport).await {
                    Ok(tools) => tools,
                    Err(e) => {
                        warn!(server = %id, error = %e, "Failed to list tools after connection");
                        Vec::new()
                    }
                };
                info!(server = %id, tool_count = tools.len(), "Connected to MCP server");

                let stale = self.update(id, |c| {
                    c.state = ConnectionState::Connected;
                    c.tools = tools;
                    c.server_info = Some(result.server_info);
                    c.last_error = None;
                    c.transport.replace(Arc::clone(&transport))
                });
                if let Some(Some(old)) = stale {
                    let _ = old.disconnect().await;
                }
                Ok(())
            }
            Err(e) => {
                error!(server = %id, attempts, error = %e, "Failed to connect to MCP server");
                let message = e.to_string();
                self.update(id, |c| {
                    c.state = ConnectionState::Error;
                    c.tools.clear();
                    c.last_error = Some(message);
                });
                Err(e)
            }
        }
    }

    fn update<R>(&self, id: &str, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.connections.write().get_mut(id).map(f)
    }

    /// Disconnect everything, then initialize from `configs`.
    pub async fn update_configurations(&self, configs: &BTreeMap<String, ServerConfig>) {
        let _lifecycle = self.lifecycle.lock().await;
        info!(count = configs.len(), "Reloading MCP server configurations");
        self.disconnect_locked().await;
        self.initialize_locked(configs).await;
    }

    /// Disconnect every live server. Safe to call repeatedly.
    pub async fn disconnect_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.disconnect_locked().await;
    }

    async fn disconnect_locked(&self) {
        let live: Vec<(String, Arc<Transport>)> = {
            let mut connections = self.connections.write();
            connections
                .values_mut()
                .filter_map(|c| {
                    let transport = c.transport.take()?;
                    if c.state == ConnectionState::Connected {
                        c.state = ConnectionState::Disconnected;
                    }
                    c.tools.clear();
                    Some((c.id.clone(), transport))
                })
                .collect()
        };

        if live.is_empty() {
            return;
        }

        info!(count = live.len(), "Disconnecting MCP servers");
        join_all(live.iter().map(|(id, transport)| async move {
            if let Err(e) = transport.disconnect().await {
                warn!(server = %id, error = %e, "Error while disconnecting");
            }
        }))
        .await;
    }

    /// Disconnect one server and connect it again from its stored config.
    pub async fn reconnect(&self, server_id: &str) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;

        let (config, old) = {
            let mut connections = self.connections.write();
            let connection = connections
                .get_mut(server_id)
                .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
            if !connection.config.enabled {
                return Err(McpError::Disabled(server_id.to_string()));
            }
            connection.state = ConnectionState::Connecting;
            connection.tools.clear();
            (Arc::clone(&connection.config), connection.transport.take())
        };

        if let Some(old) = old {
            if let Err(e) = old.disconnect().await {
                warn!(server = %server_id, error = %e, "Error while disconnecting");
            }
        }
        self.connect_one(server_id, config).await
    }

    /// Disconnect one server, keeping its entry.
    pub async fn disconnect(&self, server_id: &str) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;

        let transport = self
            .update(server_id, |c| {
                if c.state == ConnectionState::Connected {
                    c.state = ConnectionState::Disconnected;
                }
                c.tools.clear();
                c.transport.take()
            })
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;

        match transport {
            Some(transport) => transport.disconnect().await,
            None => Ok(()),
        }
    }

    /// Identifiers of usable connections, sorted.
    pub fn get_connected_servers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .read()
            .values()
            .filter(|c| c.is_usable())
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether the server is connected and usable.
    pub fn is_connected(&self, server_id: &str) -> bool {
        self.connections
            .read()
            .get(server_id)
            .is_some_and(Connection::is_usable)
    }

    /// Status of every known server, sorted by id.
    pub fn statuses(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<ServerStatus> = self
            .connections
            .read()
            .values()
            .map(Connection::status)
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Status of one server.
    pub fn status(&self, server_id: &str) -> Option<ServerStatus> {
        self.connections.read().get(server_id).map(Connection::status)
    }

    /// Number of registered servers, connected or not.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Transport of a usable connection.
    pub(crate) fn connected_transport(&self, server_id: &str) -> Result<Arc<Transport>, McpError> {
        self.connections
            .read()
            .get(server_id)
            .filter(|c| c.is_usable())
            .and_then(|c| c.transport.clone())
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))
    }

    /// Every usable connection with its cached tools, sorted by id.
    pub(crate) fn live_servers(&self) -> Vec<LiveServer> {
        let mut live: Vec<LiveServer> = self
            .connections
            .read()
            .values()
            .filter(|c| c.is_usable())
            .filter_map(|c| {
                Some(LiveServer {
                    id: c.id.clone(),
                    transport: c.transport.clone()?,
                    tools: c.tools.clone(),
                })
            })
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(ClientInfo::default())
    }
}

/// Fetch every page of `tools/list`.
pub(crate) async fn fetch_tools(transport: &Transport) -> Result<Vec<McpToolDefinition>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor.take().map(|c| json!({ "cursor": c }));
        let raw = transport.send_request(methods::TOOLS_LIST, params).await?;
        let page: ListToolsResult = serde_json::from_value(raw)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    debug!(server = %transport.server(), tool_count = tools.len(), "Listed tools");
    Ok(tools)
}
