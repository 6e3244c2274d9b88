//! Construction of the configured reasoning backend.

use std::sync::Arc;

use noesis_core::config::LlmConfig;

use super::local::LocalProvider;
use super::openai::OpenAIProvider;
use super::traits::Provider;

/// Build the provider named by `config.provider`.
///
/// The API key comes from the config first, then `OPENAI_API_KEY`. The
/// local provider honours `OLLAMA_HOST` when no base URL is configured.
pub fn provider_from_config(config: &LlmConfig) -> anyhow::Result<Arc<dyn Provider>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .resolve_api_key()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| anyhow::anyhow!("no API key configured for the openai provider"))?;

            let mut provider = OpenAIProvider::new(api_key);
            if let Some(base_url) = config
                .base_url
                .clone()
                .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = &config.model {
                provider = provider.with_default_model(model);
            }
            Ok(Arc::new(provider))
        }
        "local" | "ollama" => {
            let mut provider = config
                .base_url
                .clone()
                .or_else(|| std::env::var("OLLAMA_HOST").ok())
                .map(LocalProvider::with_url)
                .unwrap_or_default();
            if let Some(model) = &config.model {
                provider = provider.with_default_model(model);
            }
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!("unknown provider '{}'", other),
    }
}
