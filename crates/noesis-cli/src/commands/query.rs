//! Query and search commands.

use std::sync::Arc;

use noesis_discovery::formatter::format_items;

use crate::context::AppContext;
use crate::host::CliHost;

fn host(ctx: &AppContext) -> anyhow::Result<Arc<CliHost>> {
    let root = match ctx.vault_root() {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    Ok(Arc::new(CliHost::new(root, None)))
}

/// Route a query and print the answer, optionally saving it.
pub async fn run(ctx: &AppContext, text: &str, save: Option<&str>) -> anyhow::Result<()> {
    let host = host(ctx)?;
    let registry = ctx.connect().await;
    let engine = ctx.engine(registry.clone(), host);

    let result = match save {
        Some(path) => engine.save_results(text, path).await.map(|answer| {
            println!("{}", answer);
            println!("Saved to {}", path);
        }),
        None => {
            println!("{}", engine.process_query(text).await);
            Ok(())
        }
    };

    registry.disconnect_all().await;
    Ok(result?)
}

/// Search the vault and all connected servers.
pub async fn search(ctx: &AppContext, text: &str) -> anyhow::Result<()> {
    let host = host(ctx)?;
    let registry = ctx.connect().await;
    let engine = ctx.engine(registry.clone(), host);

    let result = engine.search(text).await;
    registry.disconnect_all().await;

    let items = result?;
    println!("{}", format_items(&format!("Results for \"{}\"", text), &items));
    Ok(())
}
