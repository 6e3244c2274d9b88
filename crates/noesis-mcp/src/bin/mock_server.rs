//! Minimal stdio MCP server used by the integration tests.
//!
//! Tools: `echo` (returns its `text` argument), `search` (returns one text
//! block per configured result) and `sleep` (answers after `ms`
//! milliseconds, so responses can overtake each other).

use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "mock-mcp-server", about = "Scripted MCP server for tests")]
struct Args {
    /// Server name reported in the handshake
    #[arg(long, default_value = "mock")]
    name: String,

    /// Answer every search call with an error
    #[arg(long)]
    fail_search: bool,

    /// Do not advertise a search tool
    #[arg(long)]
    no_search: bool,

    /// Read requests but never answer
    #[arg(long)]
    silent: bool,

    /// Send the client a roots/list request after the handshake
    #[arg(long)]
    ask_roots: bool,

    /// Text block returned by search (repeatable)
    #[arg(long = "result")]
    results: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let line = format!("{}\n", message);
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if args.silent {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock: unparsable line: {}", line);
            continue;
        };
        handle(&args, message, &tx);
    }

    drop(tx);
    let _ = writer.await;
}

fn handle(args: &Args, message: Value, tx: &mpsc::UnboundedSender<Value>) {
    let method = message["method"].as_str().unwrap_or_default().to_string();
    let id = message.get("id").cloned().filter(|id| !id.is_null());
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let Some(id) = id else {
        // Notification, or a reply to one of our own requests.
        if method == "notifications/initialized" {
            eprintln!("mock: client initialized");
            let _ = tx.send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": {"level": "info", "data": "ready"}
            }));
            if args.ask_roots {
                let _ = tx.send(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}));
            }
        }
        return;
    };
    if method.is_empty() {
        eprintln!("mock: client answered {}", id);
        return;
    }

    let reply = |outcome: Result<Value, (i64, String)>| match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, msg)) => json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": msg}}),
    };

    let outcome = match method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}, "resources": {}},
            "serverInfo": {"name": args.name, "version": "0.0.1"}
        })),
        "tools/list" => Ok(json!({ "tools": tool_list(args) })),
        "tools/call" => {
            let name = params["name"].as_str().unwrap_or_default();
            let arguments = &params["arguments"];
            match name {
                "echo" => Ok(text_result(arguments["text"].as_str().unwrap_or_default())),
                "search" if args.no_search => Err((-32602, "unknown tool: search".to_string())),
                "search" if args.fail_search => Err((-32603, "search index unavailable".to_string())),
                "search" => {
                    let query = arguments["query"].as_str().unwrap_or_default();
                    let blocks: Vec<Value> = if args.results.is_empty() {
                        vec![json!({"type": "text", "text": format!("{} result for {}", args.name, query)})]
                    } else {
                        args.results
                            .iter()
                            .map(|r| json!({"type": "text", "text": r}))
                            .collect()
                    };
                    Ok(json!({ "content": blocks }))
                }
                "sleep" => {
                    let ms = arguments["ms"].as_u64().unwrap_or(0);
                    let tx = tx.clone();
                    let response = reply(Ok(text_result(&format!("slept {}ms", ms))));
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                        let _ = tx.send(response);
                    });
                    return;
                }
                other => Err((-32602, format!("unknown tool: {}", other))),
            }
        }
        "resources/list" => Ok(json!({
            "resources": [{"uri": "note://welcome", "name": "Welcome", "mimeType": "text/markdown"}]
        })),
        "resources/read" => match params["uri"].as_str() {
            Some("note://welcome") => Ok(json!({
                "contents": [{"uri": "note://welcome", "mimeType": "text/markdown", "text": "# Welcome\nHello from the mock server."}]
            })),
            Some(uri) => Err((-32002, format!("resource not found: {}", uri))),
            None => Err((-32602, "missing uri".to_string())),
        },
        other => Err((-32601, format!("method not found: {}", other))),
    };

    let _ = tx.send(reply(outcome));
}

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}

fn tool_list(args: &Args) -> Vec<Value> {
    let mut tools = vec![
        json!({
            "name": "echo",
            "description": "Echo the text argument",
            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
        }),
        json!({
            "name": "sleep",
            "description": "Answer after a delay",
            "inputSchema": {"type": "object", "properties": {"ms": {"type": "integer"}}}
        }),
    ];
    if !args.no_search {
        tools.push(json!({
            "name": "search",
            "description": "Search the mock index",
            "inputSchema": {"type": "object", "properties": {"query": {"type": "string"}}}
        }));
    }
    tools
}
