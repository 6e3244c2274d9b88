//! # noesis-core
//!
//! Core types and abstractions for Noesis, a knowledge-discovery engine that
//! bridges note vaults and MCP tool servers.
//!
//! This crate provides:
//! - Configuration system (servers, relevance, routing, reasoning backend)
//! - Knowledge item model shared by the search and discovery layers
//! - Common error types

pub mod config;
pub mod error;
pub mod knowledge;

pub use config::{Config, ServerConfig, TransportKind};
pub use error::{Error, Result};
pub use knowledge::{ItemKind, KnowledgeItem, Origin};
