//! # noesis-cli
//!
//! Command-line interface for Noesis.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use noesis_core::Config;

mod commands;
mod context;
mod host;

use context::AppContext;

/// Noesis - knowledge discovery across your notes and MCP servers
#[derive(Parser)]
#[command(name = "noesis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Vault directory (overrides general.vault_path)
    #[arg(long, global = true, value_name = "PATH", env = "NOESIS_VAULT")]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a query and print the answer
    Query {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Also write the answer to a new document
        #[arg(long, value_name = "PATH")]
        save: Option<String>,
    },
    /// Search the vault and every connected server
    Search {
        /// Search terms
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Find notes related to a note
    Discover {
        /// Note to start from, relative to the vault
        #[arg(long, value_name = "PATH")]
        note: Option<PathBuf>,
    },
    /// MCP server management
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum McpAction {
    /// Connect to every configured server and show its status
    List,
    /// List a server's tools
    Tools {
        /// Server identifier
        server: String,
    },
    /// Call a tool
    Call {
        /// Server identifier
        server: String,
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
    },
    /// List a server's resources
    Resources {
        /// Server identifier
        server: String,
    },
    /// Read a resource
    Read {
        /// Server identifier
        server: String,
        /// Resource URI
        uri: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration
    Validate,
    /// Show where configuration is read from
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Results go to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(vault) = cli.vault {
        config.general.vault_path = Some(vault);
    }

    let ctx = AppContext::new(config);

    match cli.command {
        Commands::Query { text, save } => {
            commands::query::run(&ctx, &text.join(" "), save.as_deref()).await?;
        }
        Commands::Search { text } => {
            commands::query::search(&ctx, &text.join(" ")).await?;
        }
        Commands::Discover { note } => {
            commands::discover::run(&ctx, note).await?;
        }
        Commands::Mcp { action } => {
            commands::mcp::handle(action, &ctx).await?;
        }
        Commands::Config { action } => {
            commands::config::handle(action, &ctx).await?;
        }
        Commands::Version => {
            println!("noesis {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
