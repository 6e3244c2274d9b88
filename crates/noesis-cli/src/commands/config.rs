//! Configuration management commands.

use noesis_core::config::RouterMode;
use noesis_core::Config;
use noesis_providers::LocalProvider;

use crate::context::AppContext;
use crate::ConfigAction;

pub async fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml()?);
        }
        ConfigAction::Validate => validate(&ctx.config).await?,
        ConfigAction::Path => {
            println!("Configuration sources (later entries win):\n");
            let files = [
                Config::config_dir().join("config.toml"),
                ".noesis/config.toml".into(),
                ".noesis/config.local.toml".into(),
            ];
            for file in &files {
                let marker = if file.exists() { "✓" } else { "✗" };
                println!("  {} {}", marker, file.display());
            }
            println!("  - NOESIS_* environment variables (e.g. NOESIS_GENERAL__VAULT_PATH)");
        }
    }
    Ok(())
}

async fn validate(config: &Config) -> anyhow::Result<()> {
    let result = config.validate();

    for issue in result.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in result.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }

    if config.router.mode == RouterMode::Assisted && matches!(config.llm.provider.as_str(), "local" | "ollama") {
        let ollama = config
            .llm
            .base_url
            .clone()
            .map(LocalProvider::with_url)
            .unwrap_or_default();
        if ollama.is_running().await {
            println!("  ✓ Ollama is running at {}", ollama.base_url());
        } else {
            println!("  ! Ollama is not reachable at {}, heuristics will be used", ollama.base_url());
        }
    }

    if !result.is_ok() {
        anyhow::bail!("Configuration has {} error(s)", result.errors().len());
    }
    println!("✓ Configuration is valid ({} servers)", config.servers.len());
    Ok(())
}
