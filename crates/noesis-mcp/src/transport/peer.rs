//! Scripted MCP server behaviour for the network transport tests.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Id the peer uses for its own request to the client.
pub const SERVER_REQUEST_ID: &str = "srv-1";

/// The reply a minimal server gives to a client message, if any.
pub fn reply_to(message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message.get("method")?.as_str()?;
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "net-peer", "version": "0.0.1"}
        }),
        "tools/call" => {
            let text = message["params"]["arguments"]["text"].as_str().unwrap_or_default();
            json!({"content": [{"type": "text", "text": text}]})
        }
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown method {other}")}
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// Request the peer sends once the client reports it is initialized.
pub fn followup(message: &Value) -> Option<Value> {
    (message["method"] == "notifications/initialized")
        .then(|| json!({"jsonrpc": "2.0", "id": SERVER_REQUEST_ID, "method": "roots/list"}))
}

pub fn answers_server_request(message: &Value) -> bool {
    message["id"] == SERVER_REQUEST_ID && message.get("method").is_none()
}

/// Wait for the first message the peer received that matches `accept`.
pub async fn received(seen: &mut mpsc::UnboundedReceiver<Value>, accept: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = seen.recv().await {
            if accept(&message) {
                return message;
            }
        }
        panic!("peer stopped before the expected message arrived");
    })
    .await
    .expect("peer never received the expected message")
}
