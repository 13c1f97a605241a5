//! Shared runtime entities
//!
//! Types that cross component boundaries: routing scopes, per-request
//! context, upstream status, and qualified-name helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The routing intent carried by a downstream session.
///
/// Parsed from the session URL by the session manager and consulted by the
/// dispatcher on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingScope {
    /// All enabled servers
    Global,
    /// Members of one group
    Group(String),
    /// A single named server
    Server(String),
    /// Smart routing across all servers
    SmartGlobal,
    /// Smart routing across one group's members
    SmartGroup(String),
}

impl RoutingScope {
    /// Whether this scope substitutes the meta-tools for the full catalog
    pub fn is_smart(&self) -> bool {
        matches!(self, RoutingScope::SmartGlobal | RoutingScope::SmartGroup(_))
    }

    /// Group id restricting this scope, if any
    pub fn group_id(&self) -> Option<&str> {
        match self {
            RoutingScope::Group(id) | RoutingScope::SmartGroup(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoutingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingScope::Global => write!(f, "global"),
            RoutingScope::Group(id) => write!(f, "group:{}", id),
            RoutingScope::Server(name) => write!(f, "server:{}", name),
            RoutingScope::SmartGlobal => write!(f, "smart"),
            RoutingScope::SmartGroup(id) => write!(f, "smart:{}", id),
        }
    }
}

/// Per in-flight JSON-RPC call context.
///
/// Carries the downstream request's header snapshot so openapi upstreams can
/// forward whitelisted headers. Lifetime is bounded by the call; no ambient
/// globals.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub scope: RoutingScope,
    pub user: Option<String>,
    /// Header names lowercased; multi-valued headers comma-joined
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>, scope: RoutingScope) -> Self {
        Self {
            session_id: session_id.into(),
            scope,
            user: None,
            headers: HashMap::new(),
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Snapshot an axum/http header map.
    ///
    /// Array-valued headers are joined with `", "` per RFC 7230; values that
    /// are not valid UTF-8 are skipped.
    pub fn with_http_headers(mut self, headers: &axum::http::HeaderMap) -> Self {
        for key in headers.keys() {
            let joined = headers
                .get_all(key)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            if !joined.is_empty() {
                self.headers.insert(key.as_str().to_ascii_lowercase(), joined);
            }
        }
        self
    }
}

/// Connection status of an upstream client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamStatus {
    Connecting,
    Connected,
    Disconnected,
    OauthRequired,
}

impl std::fmt::Display for UpstreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamStatus::Connecting => write!(f, "connecting"),
            UpstreamStatus::Connected => write!(f, "connected"),
            UpstreamStatus::Disconnected => write!(f, "disconnected"),
            UpstreamStatus::OauthRequired => write!(f, "oauth_required"),
        }
    }
}

/// Build the qualified name visible downstream: `<server><sep><name>`
pub fn qualify(server: &str, name: &str, separator: &str) -> String {
    format!("{}{}{}", server, separator, name)
}

/// Split a qualified name at the first occurrence of the separator.
///
/// Returns `(server, rest)`; `None` when the separator is absent.
pub fn split_qualified<'a>(qualified: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    qualified
        .find(separator)
        .map(|idx| (&qualified[..idx], &qualified[idx + separator.len()..]))
}
