//! Configuration system for Noesis.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default per-request timeout for MCP servers.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Main configuration struct for Noesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// MCP servers keyed by server identifier
    pub servers: BTreeMap<String, ServerConfig>,
    /// Relevance scoring settings
    pub relevance: RelevanceConfig,
    /// Query routing settings
    pub router: RouterConfig,
    /// Reasoning backend used by assisted routing
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory of the note vault
    pub vault_path: Option<PathBuf>,
    /// Client name announced during the MCP handshake
    pub client_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            vault_path: None,
            client_name: "noesis".to_string(),
        }
    }
}

/// How a server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON over stdin/stdout
    #[default]
    Stdio,
    /// WebSocket connection, one JSON message per text frame
    #[serde(alias = "websocket")]
    Socket,
    /// HTTP event stream for responses, POST for requests
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Socket => write!(f, "socket"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// Configuration for one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name (falls back to the server identifier)
    pub name: String,
    /// Command to execute (stdio)
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Working directory
    #[serde(alias = "cwd")]
    pub working_dir: Option<PathBuf>,
    /// Environment overrides layered over the host environment
    pub env: HashMap<String, String>,
    /// Transport kind
    pub transport: TransportKind,
    /// Endpoint URL (socket and sse)
    pub url: Option<String>,
    /// Whether this server is enabled
    pub enabled: bool,
    /// Per-request timeout in milliseconds
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    /// Extra connection attempts after the first failure
    pub retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            transport: TransportKind::Stdio,
            url: None,
            enabled: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: 0,
        }
    }
}

impl ServerConfig {
    /// Create a stdio server configuration.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Create a configuration for a URL-based transport.
    pub fn remote(transport: TransportKind, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set whether the server is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the number of retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Display name, or the given identifier when no name is configured.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        if self.name.is_empty() {
            id
        } else {
            &self.name
        }
    }

    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Weight for each query term contained in the title
    pub title_weight: f64,
    /// Weight for each query term contained in the document path
    pub path_weight: f64,
    /// Weight for each query term contained in a tag
    pub tag_weight: f64,
    /// Weight for each occurrence of a query term in the body
    pub body_weight: f64,
    /// Minimum score for search results
    pub min_score: f64,
    /// Minimum score for discovery results
    pub discovery_min_score: f64,
    /// Maximum number of results returned
    pub max_results: usize,
    /// Lines of context on each side of an excerpt match
    pub excerpt_lines: usize,
    /// Maximum excerpt length in characters
    pub excerpt_chars: usize,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            title_weight: 3.0,
            path_weight: 1.5,
            tag_weight: 2.0,
            body_weight: 1.0,
            min_score: 0.3,
            discovery_min_score: 0.1,
            max_results: 10,
            excerpt_lines: 2,
            excerpt_chars: 300,
        }
    }
}

/// Routing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// Keyword heuristics only
    #[default]
    Heuristic,
    /// Ask the reasoning backend first, fall back to heuristics
    Assisted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Routing strategy
    pub mode: RouterMode,
    /// Minimum backend confidence accepted in assisted mode
    pub confidence_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::Heuristic,
            confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend: "openai" (any OpenAI-compatible endpoint) or "local" (Ollama)
    pub provider: String,
    /// Model identifier
    pub model: Option<String>,
    /// Base URL override
    pub base_url: Option<String>,
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for the API key
    pub api_key_env: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            base_url: None,
            api_key: None,
            api_key_env: None,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from either direct value or environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Some(key);
            }
        }
        None
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "servers.github.command")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// The layered figment used by [`Config::load`].
    pub fn figment() -> Figment {
        let config_dir = Self::config_dir();

        Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(config_dir.join("config.toml")))
            .merge(Toml::file(".noesis/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".noesis/config.local.toml"))
            // Double underscore keeps snake_case keys intact: NOESIS_GENERAL__VAULT_PATH
            .merge(Env::prefixed("NOESIS_").split("__"))
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        for (id, server) in &self.servers {
            let prefix = format!("servers.{}", id);

            match server.transport {
                TransportKind::Stdio => {
                    if server.command.trim().is_empty() {
                        result.add_error(format!("{}.command", prefix), "stdio servers need a command");
                    }
                }
                TransportKind::Socket | TransportKind::Sse => match server.url.as_deref() {
                    None | Some("") => {
                        result.add_error(
                            format!("{}.url", prefix),
                            format!("{} servers need a url", server.transport),
                        );
                    }
                    Some(url) => {
                        let valid_schemes: &[&str] = match server.transport {
                            TransportKind::Socket => &["ws://", "wss://"],
                            _ => &["http://", "https://"],
                        };
                        if !valid_schemes.iter().any(|s| url.starts_with(s)) {
                            result.add_error(
                                format!("{}.url", prefix),
                                format!("url must start with one of {:?}", valid_schemes),
                            );
                        }
                    }
                },
            }

            if server.timeout_ms == 0 {
                result.add_error(format!("{}.timeout_ms", prefix), "timeout_ms must be greater than 0");
            } else if server.timeout_ms > 600_000 {
                result.add_warning(
                    format!("{}.timeout_ms", prefix),
                    "timeout_ms is above 10 minutes, stalled requests will linger",
                );
            }

            if server.retries > 10 {
                result.add_warning(format!("{}.retries", prefix), "more than 10 retries slows startup");
            }
        }

        let relevance = &self.relevance;
        for (field, value) in [
            ("relevance.min_score", relevance.min_score),
            ("relevance.discovery_min_score", relevance.discovery_min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                result.add_error(field, "score thresholds must be within [0, 1]");
            }
        }

        if relevance.max_results == 0 {
            result.add_error("relevance.max_results", "max_results must be greater than 0");
        }

        if relevance.excerpt_chars < 16 {
            result.add_warning("relevance.excerpt_chars", "excerpts shorter than 16 characters are hard to read");
        }

        for (field, value) in [
            ("relevance.title_weight", relevance.title_weight),
            ("relevance.path_weight", relevance.path_weight),
            ("relevance.tag_weight", relevance.tag_weight),
            ("relevance.body_weight", relevance.body_weight),
        ] {
            if value < 0.0 {
                result.add_error(field, "weights cannot be negative");
            }
        }

        if !(0.0..=1.0).contains(&self.router.confidence_threshold) {
            result.add_error("router.confidence_threshold", "confidence_threshold must be within [0, 1]");
        }

        let valid_providers = ["openai", "local"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            result.add_error(
                "llm.provider",
                format!("Invalid provider '{}'. Valid values: {:?}", self.llm.provider, valid_providers),
            );
        }

        if let Some(ref base_url) = self.llm.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                result.add_error("llm.base_url", "base_url must start with http:// or https://");
            }
        }

        if self.router.mode == RouterMode::Assisted
            && self.llm.provider == "openai"
            && self.llm.resolve_api_key().is_none()
        {
            result.add_warning(
                "llm.api_key",
                "assisted routing with the openai provider has no API key, heuristics will be used",
            );
        }

        if let Some(ref vault) = self.general.vault_path {
            if !vault.is_dir() {
                result.add_warning("general.vault_path", format!("{} is not a directory", vault.display()));
            }
        }

        result
    }

    /// Servers that are enabled, keyed by identifier.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter().filter(|(_, s)| s.enabled)
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("noesis"))
            .unwrap_or_else(|| PathBuf::from("~/.config/noesis"))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new("npx")
            .with_name("Files")
            .with_args(["-y", "@modelcontextprotocol/server-filesystem"])
            .with_env("NODE_ENV", "production")
            .with_timeout_ms(5_000)
            .with_enabled(true);

        assert_eq!(config.command, "npx");
        assert_eq!(config.args.len(), 2);
        assert_eq!(config.env.get("NODE_ENV"), Some(&"production".to_string()));
        assert_eq!(config.timeout(), std::time::Duration::from_secs(5));
        assert_eq!(config.display_name("fs"), "Files");
        assert_eq!(ServerConfig::new("x").display_name("fs"), "fs");
    }

    #[test]
    fn test_missing_fields_defaulted_unknown_ignored() {
        let parsed: Config = toml::from_str(
            r#"
            [servers.notes]
            command = "notes-mcp"
            cwd = "/tmp"
            flavour = "ignored"

            [servers.remote]
            transport = "websocket"
            url = "ws://localhost:9000"
            enabled = false
            timeout = 1500
            "#,
        )
        .unwrap();

        let notes = &parsed.servers["notes"];
        assert!(notes.enabled);
        assert_eq!(notes.transport, TransportKind::Stdio);
        assert_eq!(notes.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(notes.working_dir, Some(PathBuf::from("/tmp")));

        let remote = &parsed.servers["remote"];
        assert_eq!(remote.transport, TransportKind::Socket);
        assert_eq!(remote.timeout_ms, 1500);
        assert!(!remote.enabled);

        assert_eq!(parsed.enabled_servers().count(), 1);
    }

    #[test]
    fn test_stdio_server_without_command() {
        let mut config = Config::default();
        config.servers.insert("broken".to_string(), ServerConfig::default());
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "servers.broken.command"));
    }

    #[test]
    fn test_remote_server_url_scheme() {
        let mut config = Config::default();
        config.servers.insert(
            "ws".to_string(),
            ServerConfig::remote(TransportKind::Socket, "http://localhost:1"),
        );
        config.servers.insert(
            "sse".to_string(),
            ServerConfig::remote(TransportKind::Sse, "http://localhost:2/sse"),
        );
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "servers.ws.url"));
        assert!(!result.errors().iter().any(|e| e.field == "servers.sse.url"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = Config::default();
        config.relevance.min_score = 1.5;
        config.router.confidence_threshold = -0.1;
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "relevance.min_score"));
        assert!(result.errors().iter().any(|e| e.field == "router.confidence_threshold"));
    }

    #[test]
    fn test_invalid_llm_provider() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".to_string();
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "llm.provider"));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir(".noesis")?;
            jail.create_file(
                ".noesis/config.toml",
                r#"
                [servers.notes]
                command = "notes-mcp"
                "#,
            )?;
            jail.set_env("NOESIS_RELEVANCE__MAX_RESULTS", "3");

            let config = Config::load()?;
            assert_eq!(config.relevance.max_results, 3);
            assert_eq!(config.servers["notes"].command, "notes-mcp");
            Ok(())
        });
    }
}
