//! # noesis-providers
//!
//! Reasoning backends for Noesis.
//!
//! This crate provides:
//! - Provider trait for chat-completion backends
//! - An OpenAI-compatible provider and a local (Ollama) provider
//! - Construction of the configured backend

pub mod local;
pub mod openai;
pub mod registry;
pub mod traits;

pub use local::LocalProvider;
pub use openai::OpenAIProvider;
pub use registry::provider_from_config;
pub use traits::{CompletionRequest, CompletionResponse, FinishReason, Message, Provider, Role, Usage};
