//! Collaborator surfaces supplied by the embedding host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noesis_core::Result;
use serde::{Deserialize, Serialize};

/// Listing entry for one vault document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Path relative to the vault root, `/`-separated.
    pub path: String,
    pub title: String,
    pub modified: Option<DateTime<Utc>>,
    /// Size in bytes.
    pub size: u64,
}

/// Read access to a note vault.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every document in the vault, in a stable order.
    async fn list_documents(&self) -> Result<Vec<DocumentMeta>>;

    /// Full text of the document at a path from [`DocumentMeta::path`].
    async fn read_document(&self, path: &str) -> Result<String>;
}

/// The document currently open in the host editor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDocument {
    pub path: String,
    pub content: String,
}

/// Editing surface of the host application.
#[async_trait]
pub trait HostEditor: Send + Sync {
    /// `None` when nothing is open.
    async fn active_document(&self) -> Result<Option<ActiveDocument>>;

    async fn insert_at_cursor(&self, text: &str) -> Result<()>;

    async fn create_document(&self, path: &str, content: &str) -> Result<()>;
}
