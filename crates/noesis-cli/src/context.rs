//! Shared state for command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use noesis_core::config::RouterMode;
use noesis_core::Config;
use noesis_discovery::{FsVault, KnowledgeEngine, QueryRouter, RelevanceEngine};
use noesis_mcp::{ClientInfo, ConnectionRegistry, ToolFacade};
use noesis_providers::provider_from_config;
use tracing::{info, warn};

use crate::host::CliHost;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connect to every configured server.
    pub async fn connect(&self) -> Arc<ConnectionRegistry> {
        let registry = Arc::new(ConnectionRegistry::new(ClientInfo::new(
            &self.config.general.client_name,
        )));
        registry.initialize(&self.config.servers).await;
        info!(
            connected = registry.get_connected_servers().len(),
            configured = registry.len(),
            "Servers initialized"
        );
        registry
    }

    pub fn vault_root(&self) -> Option<&PathBuf> {
        self.config.general.vault_path.as_ref()
    }

    /// Router for the configured mode. Assisted mode without a usable
    /// backend degrades to heuristics.
    pub fn router(&self) -> QueryRouter {
        let router_config = self.config.router.clone();
        let backend = match router_config.mode {
            RouterMode::Heuristic => None,
            RouterMode::Assisted => match provider_from_config(&self.config.llm) {
                Ok(provider) => Some(provider),
                Err(e) => {
                    warn!("Routing backend unavailable, using heuristics: {}", e);
                    None
                }
            },
        };
        QueryRouter::new(router_config, backend)
    }

    pub fn engine(&self, registry: Arc<ConnectionRegistry>, host: Arc<CliHost>) -> KnowledgeEngine {
        let engine = KnowledgeEngine::new(
            ToolFacade::new(registry),
            self.router(),
            RelevanceEngine::new(self.config.relevance.clone()),
        )
        .with_host(host);

        match self.vault_root() {
            Some(root) => engine.with_vault(Arc::new(FsVault::new(root))),
            None => {
                warn!("No vault configured; set general.vault_path or pass --vault");
                engine
            }
        }
    }
}
