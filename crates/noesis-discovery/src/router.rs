//! Query routing: pick an intent, a server and a tool for a query.
//!
//! Routing never fails. The heuristic router always yields a decision, and
//! the assisted router falls back to it whenever the backend cannot be
//! trusted.

use std::fmt;
use std::sync::Arc;

use noesis_core::config::{RouterConfig, RouterMode};
use noesis_core::knowledge::clamp_score;
use noesis_providers::{CompletionRequest, Provider};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

const SEARCH_KEYWORDS: &[&str] = &["find", "search"];
const DISCOVERY_KEYWORDS: &[&str] = &["discover", "related", "connect"];

const KEYWORD_CONFIDENCE: f64 = 0.7;
const GENERAL_CONFIDENCE: f64 = 0.5;

const ROUTER_PROMPT: &str = r#"You route queries for a note-taking assistant.
Reply with a single JSON object and nothing else:
{"intent": "search" | "knowledge-discovery" | "general",
 "server": <one of the connected server ids, or null>,
 "tool": <tool name, or null>,
 "parameters": <JSON object of tool arguments, or null>,
 "confidence": <number between 0 and 1>,
 "rationale": <short explanation>}
Use "search" for lookups, "knowledge-discovery" for finding related notes,
and "general" for anything else."#;

/// What the user wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Search,
    KnowledgeDiscovery,
    General,
}

impl Intent {
    /// Tool invoked for this intent when nothing more specific is known.
    pub fn default_tool(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::KnowledgeDiscovery => "discover_related",
            Self::General => "query",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::KnowledgeDiscovery => write!(f, "knowledge-discovery"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Server selected for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerChoice {
    Connected(String),
    /// No server is connected; callers fall back to the vault.
    NoneAvailable,
}

impl ServerChoice {
    /// First server in sorted order.
    fn first_of(connected: &[String]) -> Self {
        connected
            .iter()
            .min()
            .map(|id| Self::Connected(id.clone()))
            .unwrap_or(Self::NoneAvailable)
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Connected(id) => Some(id),
            Self::NoneAvailable => None,
        }
    }
}

/// Outcome of routing one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub intent: Intent,
    pub server: ServerChoice,
    pub tool: String,
    pub parameters: Value,
    /// In [0, 1].
    pub confidence: f64,
    pub rationale: String,
}

impl RoutingDecision {
    /// The text to search with: `parameters.query`, or `fallback`.
    pub fn query_text<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.parameters
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(fallback)
    }
}

/// Decision as returned by the reasoning backend.
#[derive(Debug, Deserialize)]
struct BackendDecision {
    intent: Intent,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
    confidence: f64,
    #[serde(default)]
    rationale: Option<String>,
}

/// Routes queries using keywords, optionally consulting a backend first.
#[derive(Clone)]
pub struct QueryRouter {
    config: RouterConfig,
    backend: Option<Arc<dyn Provider>>,
}

impl QueryRouter {
    pub fn new(config: RouterConfig, backend: Option<Arc<dyn Provider>>) -> Self {
        Self { config, backend }
    }

    /// Keyword routing only.
    pub fn heuristic() -> Self {
        Self::new(RouterConfig::default(), None)
    }

    pub fn mode(&self) -> RouterMode {
        match (&self.backend, self.config.mode) {
            (Some(_), RouterMode::Assisted) => RouterMode::Assisted,
            _ => RouterMode::Heuristic,
        }
    }

    /// Route a query against the currently connected servers.
    pub async fn route(&self, query: &str, connected: &[String]) -> RoutingDecision {
        if let (Some(backend), RouterMode::Assisted) = (&self.backend, self.config.mode) {
            match self.route_assisted(backend.as_ref(), query, connected).await {
                Ok(decision) => return decision,
                Err(e) => debug!(error = %e, "Assisted routing rejected, using heuristics"),
            }
        }
        route_heuristic(query, connected)
    }

    async fn route_assisted(
        &self,
        backend: &dyn Provider,
        query: &str,
        connected: &[String],
    ) -> anyhow::Result<RoutingDecision> {
        let prompt = format!(
            "Connected servers: {}\nQuery: {}",
            if connected.is_empty() {
                "(none)".to_string()
            } else {
                connected.join(", ")
            },
            query
        );
        let request = CompletionRequest::single(ROUTER_PROMPT, prompt).with_json_mode();

        let response = match backend.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = backend.id(), error = %e, "Routing backend failed");
                return Err(e);
            }
        };

        let decision = parse_backend_decision(&response.content)?;
        self.validate(decision, query, connected)
    }

    fn validate(
        &self,
        decision: BackendDecision,
        query: &str,
        connected: &[String],
    ) -> anyhow::Result<RoutingDecision> {
        if !decision.confidence.is_finite() || decision.confidence < self.config.confidence_threshold {
            anyhow::bail!(
                "confidence {} below threshold {}",
                decision.confidence,
                self.config.confidence_threshold
            );
        }

        let server = match decision.server.filter(|s| !s.is_empty()) {
            Some(id) if connected.contains(&id) => ServerChoice::Connected(id),
            Some(id) => anyhow::bail!("backend chose server '{}' which is not connected", id),
            None => ServerChoice::first_of(connected),
        };

        let parameters = match decision.parameters {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({ "query": query }),
        };

        Ok(RoutingDecision {
            intent: decision.intent,
            server,
            tool: decision
                .tool
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| decision.intent.default_tool().to_string()),
            parameters,
            confidence: clamp_score(decision.confidence),
            rationale: decision
                .rationale
                .unwrap_or_else(|| "chosen by routing backend".to_string()),
        })
    }
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::heuristic()
    }
}

/// Pull the JSON object out of a backend reply, tolerating code fences or
/// surrounding prose.
fn parse_backend_decision(content: &str) -> anyhow::Result<BackendDecision> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => anyhow::bail!("no JSON object in routing reply"),
    };
    Ok(serde_json::from_str(json)?)
}

/// Keyword routing. Search keywords take precedence over discovery ones;
/// the first matching word is removed and the rest becomes the query.
pub fn route_heuristic(query: &str, connected: &[String]) -> RoutingDecision {
    let words: Vec<&str> = query.split_whitespace().collect();
    let normalized: Vec<String> = words
        .iter()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();

    let matched = [
        (Intent::Search, SEARCH_KEYWORDS),
        (Intent::KnowledgeDiscovery, DISCOVERY_KEYWORDS),
    ]
    .into_iter()
    .find_map(|(intent, keywords)| {
        normalized
            .iter()
            .position(|w| keywords.contains(&w.as_str()))
            .map(|index| (intent, index))
    });

    let (intent, residual, confidence, rationale) = match matched {
        Some((intent, index)) => {
            let residual: Vec<&str> = words
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, w)| *w)
                .collect();
            (
                intent,
                residual.join(" "),
                KEYWORD_CONFIDENCE,
                format!("keyword '{}'", normalized[index]),
            )
        }
        None => (
            Intent::General,
            words.join(" "),
            GENERAL_CONFIDENCE,
            "no routing keyword".to_string(),
        ),
    };

    let residual = if residual.is_empty() {
        query.trim().to_string()
    } else {
        residual
    };

    RoutingDecision {
        intent,
        server: ServerChoice::first_of(connected),
        tool: intent.default_tool().to_string(),
        parameters: json!({ "query": residual }),
        confidence,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use noesis_providers::{CompletionResponse, FinishReason, Usage};

    fn servers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_search_keywords() {
        let decision = route_heuristic("Find notes about Tokio", &servers(&["web", "notes"]));
        assert_eq!(decision.intent, Intent::Search);
        assert_eq!(decision.tool, "search");
        assert_eq!(decision.parameters["query"], "notes about Tokio");
        assert_eq!(decision.server, ServerChoice::Connected("notes".to_string()));
    }

    #[test]
    fn test_discovery_keywords() {
        let decision = route_heuristic("what is related to graph theory?", &[]);
        assert_eq!(decision.intent, Intent::KnowledgeDiscovery);
        assert_eq!(decision.tool, "discover_related");
        assert_eq!(decision.parameters["query"], "what is to graph theory?");
        assert_eq!(decision.server, ServerChoice::NoneAvailable);
    }

    #[test]
    fn test_search_wins_over_discovery() {
        let decision = route_heuristic("discover and search", &[]);
        assert_eq!(decision.intent, Intent::Search);
        assert_eq!(decision.parameters["query"], "discover and");
    }

    #[test]
    fn test_general_query() {
        let decision = route_heuristic("summarize my week", &servers(&["a"]));
        assert_eq!(decision.intent, Intent::General);
        assert_eq!(decision.tool, "query");
        assert_eq!(decision.parameters["query"], "summarize my week");
        assert!(decision.confidence < KEYWORD_CONFIDENCE);
    }

    #[test]
    fn test_keyword_only_query_keeps_text() {
        let decision = route_heuristic("search", &[]);
        assert_eq!(decision.parameters["query"], "search");
        assert_eq!(decision.query_text("fallback"), "search");
    }

    #[test]
    fn test_keywords_inside_words_do_not_match() {
        let decision = route_heuristic("findings from research", &[]);
        assert_eq!(decision.intent, Intent::General);
    }

    struct CannedBackend {
        reply: anyhow::Result<String>,
    }

    impl CannedBackend {
        fn replying(reply: &str) -> Arc<dyn Provider> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
            })
        }

        fn failing() -> Arc<dyn Provider> {
            Arc::new(Self {
                reply: Err(anyhow::anyhow!("backend down")),
            })
        }
    }

    #[async_trait]
    impl Provider for CannedBackend {
        fn id(&self) -> &str {
            "canned"
        }

        fn name(&self) -> &str {
            "Canned"
        }

        fn default_model(&self) -> &str {
            "canned-1"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
            match &self.reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    finish_reason: FinishReason::Stop,
                    usage: Usage::default(),
                }),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn assisted(backend: Arc<dyn Provider>) -> QueryRouter {
        QueryRouter::new(
            RouterConfig {
                mode: RouterMode::Assisted,
                confidence_threshold: 0.6,
            },
            Some(backend),
        )
    }

    #[tokio::test]
    async fn test_assisted_decision_is_trusted() {
        let router = assisted(CannedBackend::replying(
            "```json\n{\"intent\":\"general\",\"server\":\"web\",\"tool\":\"fetch\",\
             \"parameters\":{\"url\":\"https://example.com\"},\"confidence\":0.9,\
             \"rationale\":\"needs the web\"}\n```",
        ));
        let decision = router.route("grab example.com", &servers(&["notes", "web"])).await;
        assert_eq!(decision.intent, Intent::General);
        assert_eq!(decision.server, ServerChoice::Connected("web".to_string()));
        assert_eq!(decision.tool, "fetch");
        assert_eq!(decision.parameters["url"], "https://example.com");
        assert_eq!(decision.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_assisted_fills_missing_fields() {
        let router = assisted(CannedBackend::replying(
            r#"{"intent":"knowledge-discovery","confidence":0.8}"#,
        ));
        let decision = router.route("rust ownership", &servers(&["b", "a"])).await;
        assert_eq!(decision.intent, Intent::KnowledgeDiscovery);
        assert_eq!(decision.server, ServerChoice::Connected("a".to_string()));
        assert_eq!(decision.tool, "discover_related");
        assert_eq!(decision.parameters["query"], "rust ownership");
    }

    #[tokio::test]
    async fn test_assisted_falls_back() {
        let connected = servers(&["notes"]);
        let cases = [
            CannedBackend::failing(),
            CannedBackend::replying("I think you want to search"),
            CannedBackend::replying(r#"{"intent":"general","confidence":0.2}"#),
            CannedBackend::replying(r#"{"intent":"general","server":"ghost","confidence":0.95}"#),
            CannedBackend::replying(r#"{"intent":"teleport","confidence":0.95}"#),
        ];

        for backend in cases {
            let decision = assisted(backend).route("find tokio notes", &connected).await;
            assert_eq!(decision, route_heuristic("find tokio notes", &connected));
        }
    }

    #[test]
    fn test_mode_requires_backend() {
        let router = QueryRouter::new(
            RouterConfig {
                mode: RouterMode::Assisted,
                ..RouterConfig::default()
            },
            None,
        );
        assert_eq!(router.mode(), RouterMode::Heuristic);
        assert_eq!(assisted(CannedBackend::failing()).mode(), RouterMode::Assisted);
    }

    #[test]
    fn test_intent_display_matches_serde() {
        for intent in [Intent::Search, Intent::KnowledgeDiscovery, Intent::General] {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent));
        }
    }
}
