//! # noesis-discovery
//!
//! Query routing, relevance scoring and vault discovery for Noesis.
//!
//! This crate provides:
//! - Keyword and backend-assisted query routing
//! - Term-weighted relevance scoring with excerpts
//! - Markdown vault walking and note parsing
//! - The [`KnowledgeEngine`] that ties routing, the vault and MCP servers
//!   together
//!
//! ## Quick Start
//!
//! ```ignore
//! use noesis_discovery::{FsVault, KnowledgeEngine, QueryRouter, RelevanceEngine};
//!
//! let engine = KnowledgeEngine::new(facade, QueryRouter::heuristic(), RelevanceEngine::default())
//!     .with_vault(Arc::new(FsVault::new("~/notes")));
//! println!("{}", engine.process_query("find notes about tokio").await);
//! ```

pub mod engine;
pub mod formatter;
pub mod host;
pub mod relevance;
pub mod router;
pub mod vault;

pub use engine::KnowledgeEngine;
pub use host::{ActiveDocument, DocumentMeta, DocumentSource, HostEditor};
pub use relevance::{Candidate, RelevanceEngine, Scored};
pub use router::{Intent, QueryRouter, RoutingDecision, ServerChoice};
pub use vault::{collect_notes, FsVault, Note};
