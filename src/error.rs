//! Error types for MCPHub
//!
//! This module provides a comprehensive error hierarchy using thiserror.
//! All errors can be converted to McpHubError for unified error handling,
//! and every error maps to a JSON-RPC error at the dispatch boundary.

use crate::constants;
use crate::protocol::RpcError;
use serde_json::json;
use thiserror::Error;

/// Main error type for MCPHub operations
#[derive(Error, Debug)]
pub enum McpHubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Upstream '{server}' unavailable: {reason}")]
    UpstreamUnavailable { server: String, reason: String },

    #[error("Upstream '{server}' requires authorization")]
    AuthRequired {
        server: String,
        authorization_url: Option<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Timeout after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    /// JSON-RPC error returned by an upstream; forwarded verbatim
    #[error("Upstream error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Transport closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Convenient result type for MCPHub operations
pub type Result<T> = std::result::Result<T, McpHubError>;

impl McpHubError {
    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        McpHubError::Config(msg.into())
    }

    /// Create an OAuth error
    #[inline]
    pub fn oauth<S: Into<String>>(msg: S) -> Self {
        McpHubError::OAuth(msg.into())
    }

    /// Create a not found error
    #[inline]
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        McpHubError::NotFound(msg.into())
    }

    /// Create an invalid params error
    #[inline]
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        McpHubError::InvalidParams(msg.into())
    }

    /// Create an internal error for unexpected conditions
    #[inline]
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        McpHubError::Internal(msg.into())
    }

    /// Create an upstream-unavailable error
    #[inline]
    pub fn unavailable<S: Into<String>, R: Into<String>>(server: S, reason: R) -> Self {
        McpHubError::UpstreamUnavailable {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Add context to an error
    pub fn context<C: std::fmt::Display>(self, context: C) -> Self {
        match self {
            Self::Config(msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::OAuth(msg) => Self::OAuth(format!("{}: {}", context, msg)),
            Self::NotFound(msg) => Self::NotFound(format!("{}: {}", context, msg)),
            Self::InvalidParams(msg) => Self::InvalidParams(format!("{}: {}", context, msg)),
            Self::Internal(msg) => Self::Internal(format!("{}: {}", context, msg)),
            other => Self::Internal(format!("{}: {}", context, other)),
        }
    }

    /// Map this error to the JSON-RPC error surfaced downstream.
    ///
    /// Upstream-originated `Rpc` errors pass through with their original
    /// code and message; the hub overlays its own codes only when it
    /// short-circuits before contacting the upstream. Internal errors are
    /// logged but never leak details to the client.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Rpc(err) => err.clone(),
            Self::UpstreamUnavailable { server, reason } => RpcError {
                code: constants::RPC_UPSTREAM_UNAVAILABLE,
                message: format!("Upstream '{}' unavailable: {}", server, reason),
                data: None,
            },
            Self::AuthRequired {
                server,
                authorization_url,
            } => RpcError {
                code: constants::RPC_AUTH_REQUIRED,
                message: format!("Upstream '{}' requires authorization", server),
                data: authorization_url
                    .as_ref()
                    .map(|url| json!({ "authorizationUrl": url })),
            },
            Self::NotFound(msg) => RpcError {
                code: constants::RPC_METHOD_NOT_FOUND,
                message: msg.clone(),
                data: None,
            },
            Self::InvalidParams(msg) => RpcError {
                code: constants::RPC_INVALID_PARAMS,
                message: msg.clone(),
                data: None,
            },
            Self::Timeout { operation, .. } => RpcError {
                code: constants::RPC_TIMEOUT,
                message: format!("Request timed out: {}", operation),
                data: Some(json!({ "kind": "timeout" })),
            },
            other => {
                tracing::error!("Internal error surfaced to client: {:?}", other);
                RpcError {
                    code: constants::RPC_INTERNAL,
                    message: "Internal error".to_string(),
                    data: None,
                }
            }
        }
    }
}
