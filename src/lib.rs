//! # Memory-and-Reasoning Hub
//!
//! An MCP server multiplexing many AI client processes onto a small set of
//! heterogeneous backends: a property graph store, a filesystem notebook
//! vault, and a pool of local language-model runtimes.
//!
//! ## Sub-servers
//!
//! - **graph-memory**: entity/relationship CRUD and pattern traversal
//! - **notebook**: markdown notes with structured frontmatter
//! - **model**: task-class routing onto local models with fallback and retry
//! - **reasoning-chains**: ordered reasoning traces with branching and export
//! - **tasks**: hierarchical tasks with typed dependencies
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → Dispatcher → Governance (Omega) → Sub-server → Backend
//!                  ↓                                  ↓
//!             Discovery                     Neo4j / Vault / Runtime
//! ```
//!
//! Every tool invocation is conditional on a durable, schema-valid log
//! record landing in the vault first; the post-record follows the action.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_memory_hub::{AppState, Config, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = Arc::new(AppState::new(config).await?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management for the hub.
pub mod config;
/// Error types, the unified taxonomy, and result aliases.
pub mod error;
/// Governance middleware ("Omega") enforcing durable action logs.
pub mod governance;
/// Graph backend layer: store, entities, relationships, traversal.
pub mod graph;
/// MCP registry, dispatcher, discovery, and dispatch sinks.
pub mod mcp;
/// Local model runtime client and task-class router.
pub mod model;
/// Application state and the stdio transport.
pub mod server;
/// Sub-servers composing backends into MCP tool surfaces.
pub mod servers;
/// Filesystem notebook vault with frontmatter codec.
pub mod vault;

pub use config::Config;
pub use error::{ErrorKind, HubError, HubResult};
pub use server::{AppState, McpServer, SharedState};
