//! Local model provider (Ollama).
//!
//! Ollama exposes an OpenAI-compatible API, so this provider wraps the
//! OpenAI provider with Ollama defaults.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::openai::OpenAIProvider;
use crate::traits::{CompletionRequest, CompletionResponse, Provider};

/// Default Ollama API URL.
const OLLAMA_API_URL: &str = "http://localhost:11434/v1";

const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

/// Local provider for Ollama models.
pub struct LocalProvider {
    inner: OpenAIProvider,
    /// Client for the native Ollama endpoints
    client: Client,
    base_url: String,
}

impl LocalProvider {
    /// Create a new local provider connecting to Ollama.
    pub fn new() -> Self {
        Self::with_url(OLLAMA_API_URL)
    }

    /// Create with a custom Ollama URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        let base_url = url.into().trim_end_matches('/').to_string();
        // Ollama ignores the key, but the OpenAI client always sends one.
        let inner = OpenAIProvider::new("ollama")
            .with_base_url(&base_url)
            .with_default_model(DEFAULT_LOCAL_MODEL);

        Self {
            inner,
            client: Client::new(),
            base_url,
        }
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.inner = self.inner.with_default_model(model);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn native_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches("/v1"), path)
    }

    /// Check if Ollama is running.
    pub async fn is_running(&self) -> bool {
        match self.client.get(self.native_url("/api/tags")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn id(&self) -> &str {
        "local"
    }

    fn name(&self) -> &str {
        "Local (Ollama)"
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn is_configured(&self) -> bool {
        // Availability is checked separately via is_running().
        true
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        debug!("Sending request to Ollama");
        self.inner.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_metadata() {
        let provider = LocalProvider::new();
        assert_eq!(provider.id(), "local");
        assert_eq!(provider.name(), "Local (Ollama)");
        assert_eq!(provider.default_model(), "llama3.2");
        assert!(provider.is_configured());
    }

    #[test]
    fn test_custom_url_and_model() {
        let provider = LocalProvider::with_url("http://192.168.1.100:11434/v1/").with_default_model("qwen2.5");
        assert_eq!(provider.base_url(), "http://192.168.1.100:11434/v1");
        assert_eq!(provider.native_url("/api/tags"), "http://192.168.1.100:11434/api/tags");
        assert_eq!(provider.default_model(), "qwen2.5");
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_not_running() {
        let provider = LocalProvider::with_url("http://127.0.0.1:9/v1");
        assert!(!provider.is_running().await);
    }
}
