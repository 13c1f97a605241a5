//! MCPHub - multiplexing gateway for Model Context Protocol servers
//!
//! MCPHub aggregates many upstream MCP servers behind a single set of
//! streaming endpoints. A downstream client opens one session (SSE or
//! streamable HTTP) and transparently reaches tools, prompts, and resources
//! exported by any number of upstreams:
//! - local stdio subprocesses
//! - remote SSE servers
//! - remote streamable-HTTP servers
//! - synthesized OpenAPI wrappers
//!
//! # Architecture
//!
//! The hub is a data plane built from six components:
//! - `config`: the settings document and its store (load, expand, persist)
//! - `upstream`: the pool of upstream clients and their transports
//! - `oauth`: OAuth 2.0 coordination for upstreams that require it
//! - `vector`: tool-description embeddings backing smart routing
//! - `session`: downstream sessions and their routing scopes
//! - `dispatch`: JSON-RPC translation between downstream and upstreams
//!
//! # Example
//!
//! ```rust,no_run
//! use mcphub::config::SettingsStore;
//! use mcphub::http::HubServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SettingsStore::discover(None)?);
//!     let server = HubServer::new(store).await?;
//!     server.serve("0.0.0.0", 3000).await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;
pub mod protocol;

// Infrastructure
pub mod config;
pub mod oauth;
pub mod vector;

// Data plane
pub mod dispatch;
pub mod session;
pub mod upstream;

// Interface layers
pub mod cli;
pub mod http;

// Re-exports for convenience
pub use error::{McpHubError, Result};
pub use model::{RequestContext, RoutingScope};

/// Initialize logging for the application
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mcphub=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
