//! MCP transport implementations.
//!
//! A [`Transport`] owns one connection to one server and multiplexes
//! JSON-RPC traffic over it. Outbound requests get a connection-local id and
//! a pending entry; a background reader task routes every inbound message
//! back to its pending entry by id. Completion order is therefore independent
//! of send order.
//!
//! Three wire variants share that machinery:
//! - [`StdioTransport`]: child process, newline-delimited JSON on stdin/stdout
//! - [`SocketTransport`]: WebSocket, one JSON message per text frame
//! - [`SseTransport`]: HTTP event stream for inbound, POST for outbound

#[cfg(test)]
mod peer;
mod sse;
mod socket;
mod stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use noesis_core::{ServerConfig, TransportKind};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{McpError, TransportError};
use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcError, JsonRpcMessage, RequestId,
};

pub use sse::SseTransport;
pub use socket::SocketTransport;
pub use stdio::{augmented_path, shell_command_line, StdioTransport};

/// How long a child gets to exit after SIGTERM before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Outcome delivered to a waiting caller.
pub type Outcome = Result<Value, McpError>;

/// Requests awaiting a response, keyed by id.
///
/// Every entry is removed before it is resolved, so a second response with
/// the same id finds nothing and cannot resolve the caller twice.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<RequestId, oneshot::Sender<Outcome>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id and get the receiving half of its continuation.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Resolve a pending request. Returns false if the id was not pending.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let sender = self.inner.lock().remove(id);
        match sender {
            Some(sender) => {
                // The caller may have given up already; that is not an error.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop a pending entry without resolving it.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    /// Fail every pending request, returning how many there were.
    pub fn fail_all(&self, reason: impl Fn() -> McpError) -> usize {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(reason()));
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// State shared by every transport variant.
#[derive(Debug)]
pub struct RpcCore {
    server: String,
    next_id: AtomicU64,
    pending: Arc<PendingRequests>,
    timeout: Duration,
    initialized: AtomicBool,
    server_details: RwLock<Option<InitializeResult>>,
}

impl RpcCore {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicU64::new(1),
            pending: Arc::new(PendingRequests::new()),
            timeout,
            initialized: AtomicBool::new(false),
            server_details: RwLock::new(None),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate an id, register it, and serialize the request frame.
    pub fn prepare(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(RequestId, String, oneshot::Receiver<Outcome>), McpError> {
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let frame = serde_json::to_string(&JsonRpcMessage::request(id.clone(), method, params))?;
        let rx = self.pending.register(id.clone());
        Ok((id, frame, rx))
    }

    /// Wait for the response to a prepared request.
    ///
    /// On timeout the pending entry is removed before the error is returned,
    /// so a late answer is discarded by the reader.
    pub async fn await_response(
        &self,
        id: RequestId,
        method: &str,
        rx: oneshot::Receiver<Outcome>,
    ) -> Outcome {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an answer: the transport went away.
            Ok(Err(_)) => Err(TransportError::ConnectionClosed.into()),
            Err(_) => {
                self.pending.remove(&id);
                warn!(server = %self.server, id = %id, method, "Request timed out");
                Err(McpError::timeout(method, self.timeout))
            }
        }
    }

    /// Forget the previous session; ids restart at 1.
    fn reset(&self) {
        self.next_id.store(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        *self.server_details.write() = None;
    }

    fn close(&self) -> usize {
        self.initialized.store(false, Ordering::SeqCst);
        self.pending.fail_all(|| TransportError::ConnectionClosed.into())
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A pending request was completed.
    Completed(RequestId),
    /// A response with no pending entry (late, duplicate or foreign).
    Unmatched(RequestId),
    /// The peer sent a request that needs an answer.
    ServerRequest { id: RequestId, method: String },
    /// The peer sent a notification.
    Notification(String),
    /// Undecodable, or neither request nor response.
    Dropped,
}

/// Route one inbound message to its pending request.
pub fn route_inbound(server: &str, text: &str, pending: &PendingRequests) -> Inbound {
    let message: JsonRpcMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let err = McpError::Parse(e.to_string());
            warn!(server, error = %err, line = %preview(text), "Dropping malformed message");
            return Inbound::Dropped;
        }
    };

    let JsonRpcMessage {
        id,
        method,
        result,
        error,
        ..
    } = message;

    match (id, method) {
        (Some(id), Some(method)) => {
            debug!(server, id = %id, method = %method, "Server sent a request");
            Inbound::ServerRequest { id, method }
        }
        (None, Some(method)) => {
            debug!(server, method = %method, "Server notification");
            Inbound::Notification(method)
        }
        (Some(id), None) => {
            let outcome = match error {
                Some(err) => Err(McpError::protocol(err.code, err.message)),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            if pending.resolve(&id, outcome) {
                Inbound::Completed(id)
            } else {
                debug!(server, id = %id, "Ignoring response with no pending request");
                Inbound::Unmatched(id)
            }
        }
        (None, None) => {
            debug!(server, line = %preview(text), "Ignoring message without id or method");
            Inbound::Dropped
        }
    }
}

/// Frame answering a server-initiated request this client does not serve.
pub fn method_not_found_frame(id: RequestId, method: &str) -> Result<String, McpError> {
    let reply = JsonRpcMessage::error_response(
        id,
        JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("client does not handle '{}'", method),
        ),
    );
    Ok(serde_json::to_string(&reply)?)
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// A connection to one MCP server.
///
/// The variant is chosen from [`ServerConfig::transport`] when the
/// connection is built and never changes afterwards.
pub enum Transport {
    Stdio(StdioTransport),
    Socket(SocketTransport),
    Sse(SseTransport),
}

impl Transport {
    /// Build an unconnected transport for a server.
    pub fn from_config(server_id: &str, config: Arc<ServerConfig>, client_info: ClientInfo) -> Self {
        let core = RpcCore::new(server_id, config.timeout());
        match config.transport {
            TransportKind::Stdio => Self::Stdio(StdioTransport::new(core, config, client_info)),
            TransportKind::Socket => Self::Socket(SocketTransport::new(core, config, client_info)),
            TransportKind::Sse => Self::Sse(SseTransport::new(core, config, client_info)),
        }
    }

    fn core(&self) -> &RpcCore {
        match self {
            Self::Stdio(t) => &t.core,
            Self::Socket(t) => &t.core,
            Self::Sse(t) => &t.core,
        }
    }

    fn client_info(&self) -> &ClientInfo {
        match self {
            Self::Stdio(t) => &t.client_info,
            Self::Socket(t) => &t.client_info,
            Self::Sse(t) => &t.client_info,
        }
    }

    /// Server identifier this transport was built for.
    pub fn server(&self) -> &str {
        self.core().server()
    }

    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Socket(_) => TransportKind::Socket,
            Self::Sse(_) => TransportKind::Sse,
        }
    }

    /// Open the connection and perform the MCP handshake.
    pub async fn connect(&self) -> Result<InitializeResult, McpError> {
        if self.is_live() {
            self.disconnect().await?;
        }
        self.core().reset();

        let opened = match self {
            Self::Stdio(t) => t.open().await,
            Self::Socket(t) => t.open().await,
            Self::Sse(t) => t.open().await,
        };
        if let Err(e) = opened {
            return Err(match e {
                McpError::Spawn { .. } | McpError::Handshake(_) => e,
                other => McpError::handshake(other.to_string()),
            });
        }

        match self.handshake().await {
            Ok(result) => {
                info!(
                    server = %self.server(),
                    server_name = %result.server_info.name,
                    protocol_version = %result.protocol_version,
                    "MCP connection initialized"
                );
                Ok(result)
            }
            Err(e) => {
                if let Err(close_err) = self.disconnect().await {
                    debug!(server = %self.server(), error = %close_err, "Cleanup after failed handshake");
                }
                Err(match e {
                    McpError::Handshake(_) => e,
                    other => McpError::handshake(other.to_string()),
                })
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::new(self.client_info().clone()))?;
        let raw = self.request(crate::methods::INITIALIZE, Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| McpError::handshake(format!("invalid initialize result: {}", e)))?;

        self.write_frame(&serde_json::to_string(&JsonRpcMessage::notification(
            crate::methods::INITIALIZED,
            None,
        ))?)
        .await?;

        let core = self.core();
        *core.server_details.write() = Some(result.clone());
        core.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Send a request and wait for its result payload.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        self.request(method, params).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let core = self.core();
        let (id, frame, rx) = core.prepare(method, params)?;
        debug!(server = %core.server(), id = %id, method, "Sending request");

        if let Err(e) = self.write_frame(&frame).await {
            core.pending.remove(&id);
            return Err(e.into());
        }
        core.await_response(id, method, rx).await
    }

    /// Send a notification; completes once the frame is written.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let frame = serde_json::to_string(&JsonRpcMessage::notification(method, params))?;
        debug!(server = %self.server(), method, "Sending notification");
        self.write_frame(&frame).await?;
        Ok(())
    }

    async fn write_frame(&self, frame: &str) -> Result<(), TransportError> {
        match self {
            Self::Stdio(t) => t.write(frame).await,
            Self::Socket(t) => t.write(frame).await,
            Self::Sse(t) => t.write(frame).await,
        }
    }

    /// Close the connection.
    ///
    /// Every pending request is failed and the transport is marked not
    /// connected, whatever happened to the underlying process or stream.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        let result = match self {
            Self::Stdio(t) => t.close().await,
            Self::Socket(t) => t.close().await,
            Self::Sse(t) => t.close().await,
        };
        let failed = self.core().close();
        if failed > 0 {
            debug!(server = %self.server(), failed, "Failed pending requests on disconnect");
        }
        result.map_err(Into::into)
    }

    /// True once the handshake has completed and the connection is live.
    pub fn is_connected(&self) -> bool {
        self.core().initialized.load(Ordering::SeqCst) && self.is_live()
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Stdio(t) => t.is_live(),
            Self::Socket(t) => t.is_live(),
            Self::Sse(t) => t.is_live(),
        }
    }

    /// Details reported by the server during the handshake.
    pub fn server_details(&self) -> Option<InitializeResult> {
        self.core().server_details.read().clone()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.core().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(id: i64, result: Value) -> String {
        serde_json::to_string(&JsonRpcMessage::response(RequestId::Number(id), result)).unwrap()
    }

    #[tokio::test]
    async fn test_response_resolves_at_most_once() {
        let core = RpcCore::new("test", Duration::from_secs(5));
        let (id, _frame, rx) = core.prepare("tools/list", None).unwrap();
        assert_eq!(id, RequestId::Number(1));

        let line = response(1, json!({"tools": []}));
        assert_eq!(route_inbound("test", &line, core.pending()), Inbound::Completed(id.clone()));
        // The duplicate finds no entry and is a no-op.
        assert_eq!(route_inbound("test", &line, core.pending()), Inbound::Unmatched(id.clone()));

        let result = core.await_response(id, "tools/list", rx).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert!(core.pending().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_and_ignores_late_answer() {
        let core = RpcCore::new("test", Duration::from_millis(20));
        let (id, _frame, rx) = core.prepare("tools/call", None).unwrap();

        let err = core.await_response(id.clone(), "tools/call", rx).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { ref method, after_ms: 20 } if method == "tools/call"));
        assert!(!core.pending().contains(&id));

        let late = response(1, json!("too late"));
        assert_eq!(route_inbound("test", &late, core.pending()), Inbound::Unmatched(id));
    }

    #[tokio::test]
    async fn test_error_envelope_becomes_protocol_error() {
        let core = RpcCore::new("test", Duration::from_secs(5));
        let (id, _frame, rx) = core.prepare("tools/call", None).unwrap();

        let line = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad args"}}"#;
        assert_eq!(route_inbound("test", line, core.pending()), Inbound::Completed(id.clone()));

        let err = core.await_response(id, "tools/call", rx).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let core = RpcCore::new("test", Duration::from_secs(5));
        let (first, _, rx1) = core.prepare("a", None).unwrap();
        let (second, _, rx2) = core.prepare("b", None).unwrap();

        route_inbound("test", &response(2, json!("second")), core.pending());
        route_inbound("test", &response(1, json!("first")), core.pending());

        assert_eq!(core.await_response(second, "b", rx2).await.unwrap(), json!("second"));
        assert_eq!(core.await_response(first, "a", rx1).await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_close_fails_everything_pending() {
        let core = RpcCore::new("test", Duration::from_secs(5));
        let (id, _, rx) = core.prepare("slow", None).unwrap();
        assert_eq!(core.close(), 1);

        let err = core.await_response(id, "slow", rx).await.unwrap_err();
        assert!(err.is_connection_loss());
        assert_eq!(core.close(), 0);
    }

    #[test]
    fn test_ids_are_monotonic_and_reset() {
        let core = RpcCore::new("test", Duration::from_secs(1));
        let ids: Vec<_> = (0..3).map(|_| core.prepare("m", None).unwrap().0).collect();
        assert_eq!(ids, vec![1i64.into(), 2i64.into(), 3i64.into()]);

        core.reset();
        assert_eq!(core.prepare("m", None).unwrap().0, RequestId::Number(1));
    }

    #[test]
    fn test_route_other_messages() {
        let pending = PendingRequests::new();
        assert_eq!(route_inbound("t", "not json", &pending), Inbound::Dropped);
        assert_eq!(route_inbound("t", r#"{"jsonrpc":"2.0"}"#, &pending), Inbound::Dropped);
        assert_eq!(
            route_inbound("t", r#"{"jsonrpc":"2.0","method":"notifications/message"}"#, &pending),
            Inbound::Notification("notifications/message".to_string())
        );
        assert_eq!(
            route_inbound("t", r#"{"jsonrpc":"2.0","id":"x","method":"roots/list"}"#, &pending),
            Inbound::ServerRequest {
                id: RequestId::String("x".to_string()),
                method: "roots/list".to_string()
            }
        );
    }

    #[test]
    fn test_method_not_found_frame() {
        let frame = method_not_found_frame(RequestId::Number(9), "sampling/createMessage").unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "é".repeat(150);
        let short = preview(&text);
        assert!(short.ends_with("..."));
        assert!(short.len() <= 203);
    }
}
