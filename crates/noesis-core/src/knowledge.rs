//! Knowledge items surfaced to the user.

use serde::{Deserialize, Serialize};

/// Where a knowledge item came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The local note vault.
    Vault,
    /// A remote MCP server, by identifier.
    Remote(String),
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vault => write!(f, "vault"),
            Self::Remote(server) => write!(f, "{}", server),
        }
    }
}

/// Coarse type of a knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A fragment of a longer document.
    Excerpt,
    /// Output of a remote search tool.
    Remote,
}

/// A scored content fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Stable identifier (vault path or `server:index`).
    pub id: String,
    /// Title.
    pub title: String,
    /// Body text, usually an excerpt.
    pub body: String,
    /// Origin tag.
    pub origin: Origin,
    /// Relevance score in [0, 1].
    pub score: f64,
    /// Coarse type tag.
    pub kind: ItemKind,
}

impl KnowledgeItem {
    /// Create an item; the score is clamped to [0, 1].
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        origin: Origin,
        score: f64,
        kind: ItemKind,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            origin,
            score: clamp_score(score),
            kind,
        }
    }

    /// Whether the item came from the vault.
    pub fn is_local(&self) -> bool {
        self.origin == Origin::Vault
    }
}

/// Clamp a score into [0, 1], mapping NaN to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
