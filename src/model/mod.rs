//! Local model runtime integration.
//!
//! - `OllamaClient`: HTTP client for the runtime's chat/generate/embeddings
//!   API with per-request deadlines and bounded exponential retry
//! - `ModelRouter`: task-class routing with a TTL-cached model inventory and
//!   fallback substitution

mod client;
mod router;
mod types;

pub use client::OllamaClient;
pub use router::{ModelRouter, RouteOptions, RouteOutcome};
pub use types::{
    ChatMessage, ChatResponse, GenerateResponse, MessageRole, ModelEntry, TaskClass,
};
