//! The knowledge engine: routes a query and assembles the answer.

use std::sync::Arc;

use noesis_core::error::format_error_with_suggestion;
use noesis_core::{Error, ItemKind, KnowledgeItem, Origin, Result};
use noesis_mcp::{RemoteHit, ToolFacade};
use tracing::{debug, error, info, instrument, warn};

use crate::formatter::{format_failure, format_items, format_tool_answer};
use crate::host::{DocumentSource, HostEditor};
use crate::relevance::{query_terms, Candidate, RelevanceEngine};
use crate::router::{Intent, QueryRouter, ServerChoice};
use crate::vault::{collect_notes, Note};

/// Answers queries from the vault and connected servers.
pub struct KnowledgeEngine {
    facade: ToolFacade,
    router: QueryRouter,
    relevance: RelevanceEngine,
    vault: Option<Arc<dyn DocumentSource>>,
    host: Option<Arc<dyn HostEditor>>,
}

impl KnowledgeEngine {
    pub fn new(facade: ToolFacade, router: QueryRouter, relevance: RelevanceEngine) -> Self {
        Self {
            facade,
            router,
            relevance,
            vault: None,
            host: None,
        }
    }

    pub fn with_vault(mut self, vault: Arc<dyn DocumentSource>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostEditor>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn facade(&self) -> &ToolFacade {
        &self.facade
    }

    /// Answer a query as Markdown. Never fails; errors are rendered as a
    /// failure message.
    pub async fn process_query(&self, query: &str) -> String {
        match self.answer(query).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Query failed");
                format_failure(&format_error_with_suggestion(&e))
            }
        }
    }

    /// Answer a query, surfacing errors.
    #[instrument(skip(self))]
    pub async fn answer(&self, query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("query is empty".to_string()));
        }

        let connected = self.facade.registry().get_connected_servers();
        let decision = self.router.route(query, &connected).await;
        info!(
            intent = %decision.intent,
            server = decision.server.id().unwrap_or("none"),
            tool = %decision.tool,
            confidence = decision.confidence,
            "Routed query"
        );

        let text = decision.query_text(query);
        match decision.intent {
            Intent::Search => {
                let items = self.search(text).await?;
                Ok(format_items(&format!("Results for \"{}\"", text), &items))
            }
            Intent::KnowledgeDiscovery => {
                let items = self.related(text).await?;
                Ok(format_items(&format!("Notes related to \"{}\"", text), &items))
            }
            Intent::General => match &decision.server {
                ServerChoice::Connected(server) => {
                    let answer = self
                        .facade
                        .call_tool(server, &decision.tool, decision.parameters.clone())
                        .await?;
                    Ok(format_tool_answer(server, &decision.tool, &answer))
                }
                ServerChoice::NoneAvailable => {
                    debug!("No server connected, answering from the vault");
                    let items = self.vault_items(text, self.relevance.config().min_score, None).await;
                    Ok(format_items(&format!("Results for \"{}\"", text), &items))
                }
            },
        }
    }

    /// Ranked vault matches followed by remote search hits.
    pub async fn search(&self, query: &str) -> Result<Vec<KnowledgeItem>> {
        let min_score = self.relevance.config().min_score;
        let (local, remote) = futures::join!(
            self.vault_items(query, min_score, None),
            self.facade.search_across_servers(query)
        );

        let mut items = local;
        items.extend(self.remote_items(query, remote));
        Ok(items)
    }

    /// Vault notes related to a query, at the discovery threshold.
    pub async fn related(&self, query: &str) -> Result<Vec<KnowledgeItem>> {
        Ok(self
            .vault_items(query, self.relevance.config().discovery_min_score, None)
            .await)
    }

    /// Find notes related to the host's active document and insert them at
    /// the cursor. Returns the rendered text, or a failure message.
    pub async fn discover_for_active_document(&self) -> String {
        match self.discover_related_to_active().await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Discovery failed");
                format_failure(&format_error_with_suggestion(&e))
            }
        }
    }

    /// Like [`Self::discover_for_active_document`], surfacing errors.
    pub async fn discover_related_to_active(&self) -> Result<String> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| Error::Host("no host editor attached".to_string()))?;
        let active = host
            .active_document()
            .await?
            .ok_or_else(|| Error::NotFound("no active document".to_string()))?;

        let note = Note::parse(&active.path, &active.content);
        let query = discovery_query(&note);
        debug!(path = %note.path, query = %query, "Discovering from active document");

        let min_score = self.relevance.config().discovery_min_score;
        let items = self.vault_items(&query, min_score, Some(&note.path)).await;
        let text = format_items(&format!("Related to {}", note.title), &items);

        if let Err(e) = host.insert_at_cursor(&text).await {
            warn!(error = %e, "Could not insert discovery results");
        }
        Ok(text)
    }

    /// Answer a query and write the result to a new host document.
    pub async fn save_results(&self, query: &str, path: &str) -> Result<String> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| Error::Host("no host editor attached".to_string()))?;
        let text = self.answer(query).await?;
        host.create_document(path, &text).await?;
        info!(path, "Saved query results");
        Ok(text)
    }

    /// Ranked vault matches. A failing document source yields no matches.
    async fn vault_items(&self, query: &str, min_score: f64, exclude: Option<&str>) -> Vec<KnowledgeItem> {
        let Some(vault) = &self.vault else {
            return Vec::new();
        };

        let notes = match collect_notes(vault.as_ref()).await {
            Ok(notes) => notes,
            Err(e) => {
                warn!(error = %e, "Vault unavailable, continuing without local notes");
                return Vec::new();
            }
        };
        let candidates: Vec<Candidate> = notes
            .iter()
            .filter(|note| Some(note.path.as_str()) != exclude)
            .map(Note::to_candidate)
            .collect();

        let terms = query_terms(query);
        let ranked = self.relevance.rank(query, candidates, min_score);
        ranked
            .into_iter()
            .map(|scored| {
                let excerpt = self.relevance.excerpt(&scored.candidate.body, &terms);
                KnowledgeItem::new(
                    scored.candidate.id,
                    scored.candidate.title,
                    excerpt,
                    Origin::Vault,
                    scored.score,
                    ItemKind::Excerpt,
                )
            })
            .collect()
    }

    fn remote_items(&self, query: &str, hits: Vec<RemoteHit>) -> Vec<KnowledgeItem> {
        let terms = query_terms(query);
        hits.into_iter()
            .enumerate()
            .map(|(index, hit)| {
                let score = self
                    .relevance
                    .score(&terms, &Candidate::text(hit.server.clone(), hit.content.clone()));
                KnowledgeItem::new(
                    format!("{}:{}", hit.server, index),
                    format!("{} ({})", hit.server, hit.tool),
                    self.relevance.excerpt(&hit.content, &terms),
                    Origin::Remote(hit.server),
                    score,
                    ItemKind::Remote,
                )
            })
            .collect()
    }
}

/// Title words and tags of a note, without duplicates.
fn discovery_query(note: &Note) -> String {
    let mut words: Vec<String> = Vec::new();
    let candidates = note
        .title
        .split_whitespace()
        .chain(note.tags.iter().map(String::as_str));
    for word in candidates {
        let word = word.to_lowercase();
        if !words.contains(&word) {
            words.push(word);
        }
    }
    words.join(" ")
}
