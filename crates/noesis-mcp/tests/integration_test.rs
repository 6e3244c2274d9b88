//! Integration tests against the bundled mock MCP server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use noesis_core::ServerConfig;
use noesis_mcp::{
    ClientInfo, ConnectionRegistry, ConnectionState, McpError, ToolFacade, Transport,
};
use serde_json::json;

const MOCK: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

fn mock(args: &[&str]) -> ServerConfig {
    ServerConfig::new(MOCK)
        .with_args(args.iter().copied())
        .with_timeout_ms(5_000)
}

fn configs(entries: Vec<(&str, ServerConfig)>) -> BTreeMap<String, ServerConfig> {
    entries
        .into_iter()
        .map(|(id, config)| (id.to_string(), config))
        .collect()
}

async fn registry_with(entries: Vec<(&str, ServerConfig)>) -> Arc<ConnectionRegistry> {
    let registry = Arc::new(ConnectionRegistry::new(ClientInfo::new("noesis-test")));
    registry.initialize(&configs(entries)).await;
    registry
}

#[tokio::test]
async fn test_connect_list_and_call() {
    let registry = registry_with(vec![("alpha", mock(&["--name", "alpha-mock"]))]).await;
    assert_eq!(registry.get_connected_servers(), vec!["alpha".to_string()]);

    let status = registry.status("alpha").unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.server_name.as_deref(), Some("alpha-mock"));
    assert_eq!(status.tool_count, 3);

    let facade = ToolFacade::new(Arc::clone(&registry));
    let echoed = facade
        .call_tool("alpha", "echo", json!({"text": "hello vault"}))
        .await
        .unwrap();
    assert_eq!(echoed, "hello vault");

    let tools = facade.list_tools("alpha").await.unwrap();
    assert!(tools.iter().any(|t| t.name == "search"));

    let resources = facade.list_resources("alpha").await.unwrap();
    assert_eq!(resources[0].uri, "note://welcome");
    let contents = facade.read_resource("alpha", "note://welcome").await.unwrap();
    assert!(contents.text().starts_with("# Welcome"));

    let err = facade.read_resource("alpha", "note://missing").await.unwrap_err();
    assert!(matches!(err, McpError::Protocol { code: -32002, .. }));

    registry.disconnect_all().await;
}

#[tokio::test]
async fn test_search_omits_failing_servers() {
    let registry = registry_with(vec![
        ("alpha", mock(&["--result", "first hit", "--result", "second hit"])),
        ("beta", mock(&["--fail-search"])),
        ("gamma", mock(&["--no-search"])),
        ("delta", ServerConfig::new("/nonexistent/mcp-server").with_timeout_ms(2_000)),
    ])
    .await;

    assert_eq!(
        registry.get_connected_servers(),
        vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
    );
    assert_eq!(registry.status("delta").unwrap().state, ConnectionState::Error);

    let facade = ToolFacade::new(Arc::clone(&registry));
    let hits = facade.search_across_servers("machine learning").await;

    let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
    assert_eq!(contents, vec!["first hit", "second hit"]);
    assert!(hits.iter().all(|h| h.server == "alpha" && h.tool == "search"));

    registry.disconnect_all().await;
}

#[tokio::test]
async fn test_disabled_config_is_never_connected() {
    let registry = registry_with(vec![
        ("on", mock(&[])),
        ("off", mock(&[]).with_enabled(false)),
    ])
    .await;

    assert_eq!(registry.get_connected_servers(), vec!["on".to_string()]);
    assert_eq!(registry.status("off").unwrap().state, ConnectionState::Disabled);

    let facade = ToolFacade::new(Arc::clone(&registry));
    let err = facade.call_tool("off", "echo", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::UnknownServer(_)));

    registry.disconnect_all().await;
}

#[tokio::test]
async fn test_disconnect_all_is_idempotent() {
    let registry = registry_with(vec![("a", mock(&[])), ("b", mock(&[]))]).await;
    assert_eq!(registry.get_connected_servers().len(), 2);

    registry.disconnect_all().await;
    registry.disconnect_all().await;

    assert!(registry.get_connected_servers().is_empty());
    assert!(registry
        .statuses()
        .iter()
        .all(|s| s.state == ConnectionState::Disconnected));

    let facade = ToolFacade::new(Arc::clone(&registry));
    assert!(matches!(
        facade.call_tool("a", "echo", json!({})).await,
        Err(McpError::UnknownServer(_))
    ));
}

#[tokio::test]
async fn test_call_during_initialization_fails_fast() {
    let registry = Arc::new(ConnectionRegistry::default());
    let init = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let slow = mock(&["--silent"]).with_timeout_ms(1_500);
            registry.initialize(&configs(vec![("slow", slow)])).await;
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let facade = ToolFacade::new(Arc::clone(&registry));
    let started = Instant::now();
    let err = facade.call_tool("slow", "echo", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::UnknownServer(_)));
    assert!(started.elapsed() < Duration::from_millis(500));

    init.await.unwrap();
    let status = registry.status("slow").unwrap();
    assert_eq!(status.state, ConnectionState::Error);
    assert!(status.last_error.unwrap().contains("handshake"));
}

#[tokio::test]
async fn test_silent_server_fails_handshake() {
    let config = Arc::new(mock(&["--silent"]).with_timeout_ms(300));
    let transport = Transport::from_config("silent", config, ClientInfo::default());

    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Handshake(_)), "unexpected error: {err}");
    assert!(!transport.is_connected());
    assert_eq!(transport.pending_count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_with_shell_operators_connects() {
    let line = format!("cd / && NOESIS_MOCK=1 '{MOCK}' --name compound");
    let config = Arc::new(ServerConfig::new(line).with_timeout_ms(5_000));
    let transport = Transport::from_config("compound", config, ClientInfo::default());

    let info = transport.connect().await.unwrap();
    assert_eq!(info.server_info.name, "compound");

    let echoed = transport
        .send_request("tools/call", Some(json!({"name": "echo", "arguments": {"text": "through sh"}})))
        .await
        .unwrap();
    assert_eq!(echoed["content"][0]["text"], "through sh");

    // The server runs under the shell, so stopping it takes the group signal.
    let started = Instant::now();
    transport.disconnect().await.unwrap();
    assert!(!transport.is_connected());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_timeout_then_late_answer_is_ignored() {
    let config = Arc::new(mock(&["--name", "sleepy"]).with_timeout_ms(200));
    let transport = Transport::from_config("sleepy", config, ClientInfo::default());
    let info = transport.connect().await.unwrap();
    assert_eq!(info.server_info.name, "sleepy");

    let params = json!({"name": "sleep", "arguments": {"ms": 500}});
    let err = transport
        .send_request("tools/call", Some(params))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout { after_ms: 200, .. }));
    assert_eq!(transport.pending_count(), 0);

    // Let the late answer arrive; it must not disturb the next request.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let echoed = transport
        .send_request("tools/call", Some(json!({"name": "echo", "arguments": {"text": "still here"}})))
        .await
        .unwrap();
    assert_eq!(echoed["content"][0]["text"], "still here");
    assert!(transport.is_connected());

    transport.disconnect().await.unwrap();
    assert!(!transport.is_connected());
    // A second disconnect is a no-op.
    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_responses_complete_out_of_order() {
    let config = Arc::new(mock(&[]));
    let transport = Transport::from_config("mock", config, ClientInfo::default());
    transport.connect().await.unwrap();

    let slow = transport.send_request(
        "tools/call",
        Some(json!({"name": "sleep", "arguments": {"ms": 300}})),
    );
    let fast = async {
        let value = transport
            .send_request("tools/call", Some(json!({"name": "echo", "arguments": {"text": "fast"}})))
            .await;
        (value, Instant::now())
    };
    let slow = async { (slow.await, Instant::now()) };

    let ((slow_value, slow_done), (fast_value, fast_done)) = tokio::join!(slow, fast);
    assert_eq!(slow_value.unwrap()["content"][0]["text"], "slept 300ms");
    assert_eq!(fast_value.unwrap()["content"][0]["text"], "fast");
    assert!(fast_done < slow_done);

    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_fails_in_flight_requests() {
    let config = Arc::new(mock(&[]));
    let transport = Arc::new(Transport::from_config("mock", config, ClientInfo::default()));
    transport.connect().await.unwrap();

    let waiter = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .send_request("tools/call", Some(json!({"name": "sleep", "arguments": {"ms": 3000}})))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.pending_count(), 1);

    transport.disconnect().await.unwrap();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.is_connection_loss(), "unexpected error: {err}");
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_server_initiated_request_does_not_break_session() {
    let registry = registry_with(vec![("curious", mock(&["--ask-roots"]))]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let facade = ToolFacade::new(Arc::clone(&registry));
    let echoed = facade
        .call_tool("curious", "echo", json!({"text": "ok"}))
        .await
        .unwrap();
    assert_eq!(echoed, "ok");

    registry.disconnect_all().await;
}

#[tokio::test]
async fn test_reconnect_and_update_configurations() {
    let registry = registry_with(vec![("alpha", mock(&[]))]).await;

    registry.reconnect("alpha").await.unwrap();
    assert_eq!(registry.get_connected_servers(), vec!["alpha".to_string()]);

    registry.disconnect("alpha").await.unwrap();
    assert_eq!(registry.status("alpha").unwrap().state, ConnectionState::Disconnected);

    registry
        .update_configurations(&configs(vec![("beta", mock(&["--name", "beta"]))]))
        .await;
    assert_eq!(registry.get_connected_servers(), vec!["beta".to_string()]);
    assert!(registry.status("alpha").is_none());

    registry.disconnect_all().await;
}
