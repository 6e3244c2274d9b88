//! MCP server management commands.

use anyhow::Context;
use serde_json::Value;

use noesis_mcp::ToolFacade;

use crate::context::AppContext;
use crate::McpAction;

pub async fn handle(action: McpAction, ctx: &AppContext) -> anyhow::Result<()> {
    let registry = ctx.connect().await;
    let facade = ToolFacade::new(registry.clone());

    let result = run(action, &facade).await;
    registry.disconnect_all().await;
    result
}

async fn run(action: McpAction, facade: &ToolFacade) -> anyhow::Result<()> {
    match action {
        McpAction::List => {
            let statuses = facade.registry().statuses();
            if statuses.is_empty() {
                println!("No MCP servers configured.");
                println!("\n  Add servers under [servers] in your config file.");
                println!("  Run 'noesis config path' to see where it is read from.");
                return Ok(());
            }

            println!("MCP servers:\n");
            for status in &statuses {
                println!("  {}", status);
                if let Some(server_name) = &status.server_name {
                    if server_name != &status.id {
                        println!("    reports as '{}'", server_name);
                    }
                }
            }
        }
        McpAction::Tools { server } => {
            let tools = facade.list_tools(&server).await?;
            println!("Tools on {}:\n", server);
            if tools.is_empty() {
                println!("  (none)");
            }
            for tool in &tools {
                match &tool.description {
                    Some(description) => println!("  {} - {}", tool.name, description),
                    None => println!("  {}", tool.name),
                }
            }
        }
        McpAction::Call { server, tool, args } => {
            let arguments = match args {
                Some(raw) => serde_json::from_str::<Value>(&raw).context("--args must be valid JSON")?,
                None => Value::Null,
            };
            if !(arguments.is_object() || arguments.is_null()) {
                anyhow::bail!("--args must be a JSON object");
            }

            let output = facade.call_tool_output(&server, &tool, arguments).await?;
            if output.is_error() {
                anyhow::bail!("Tool '{}' reported an error:\n{}", tool, output.render());
            }
            println!("{}", output.render());
        }
        McpAction::Resources { server } => {
            let resources = facade.list_resources(&server).await?;
            println!("Resources on {}:\n", server);
            if resources.is_empty() {
                println!("  (none)");
            }
            for resource in &resources {
                let mime = resource.mime_type.as_deref().unwrap_or("unknown type");
                println!("  {} - {} ({})", resource.uri, resource.name, mime);
            }
        }
        McpAction::Read { server, uri } => {
            let result = facade.read_resource(&server, &uri).await?;
            if result.contents.is_empty() {
                println!("(empty resource)");
            }
            for contents in &result.contents {
                match (&contents.text, &contents.blob) {
                    (Some(text), _) => println!("{}", text),
                    (None, Some(blob)) => println!(
                        "[binary {} ({} base64 bytes)]",
                        contents.mime_type.as_deref().unwrap_or("data"),
                        blob.len()
                    ),
                    (None, None) => println!("[no content for {}]", contents.uri),
                }
            }
        }
    }
    Ok(())
}
