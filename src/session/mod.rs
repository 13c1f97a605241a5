//! Downstream session management
//!
//! Owns every downstream transport session, maps URL paths to routing
//! scopes, and enforces bearer auth. Sessions are keyed by UUIDv4; an idle
//! reaper removes sessions that stop producing traffic.

use crate::config::{Settings, SettingsStore};
use crate::constants;
use crate::model::RoutingScope;
use crate::protocol::RequestId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Downstream transport flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransportKind {
    Sse,
    StreamableHttp,
}

/// Why a session request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or mismatched credentials (HTTP 401)
    Unauthorized,
    /// The route itself is disabled (HTTP 403)
    Forbidden,
}

/// One downstream session and its routing scope.
pub struct DownstreamSession {
    pub session_id: String,
    pub scope: RoutingScope,
    pub user: Option<String>,
    pub kind: SessionTransportKind,
    pub created_at: DateTime<Utc>,
    /// Serialized frames bound for the session's push stream
    outbound: mpsc::UnboundedSender<String>,
    /// Receiving end of the push stream, until a transport claims it
    stream_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    last_activity: RwLock<tokio::time::Instant>,
    /// Parent token for every dispatch made on behalf of this session
    cancel: CancellationToken,
    /// In-flight request tokens, for `$/cancelRequest`
    inflight: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl DownstreamSession {
    /// Queue a frame for the push stream. Returns false when the stream is
    /// gone.
    pub fn send_frame(&self, frame: &impl serde::Serialize) -> bool {
        match serde_json::to_string(frame) {
            Ok(serialized) => self.outbound.send(serialized).is_ok(),
            Err(error) => {
                tracing::error!("unserializable outbound frame: {}", error);
                false
            }
        }
    }

    /// Claim the receiving end of the push stream. Each session has one;
    /// a second claim returns `None`.
    pub fn take_stream(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.stream_rx.lock().take()
    }

    /// Record traffic on this session.
    pub fn touch(&self) {
        *self.last_activity.write() = tokio::time::Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Token cancelled when the session closes
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register an in-flight request; the returned token is a child of the
    /// session token, so session close cancels it too.
    pub fn begin_request(&self, id: RequestId) -> CancellationToken {
        let token = self.cancel.child_token();
        self.inflight.lock().insert(id, token.clone());
        token
    }

    pub fn finish_request(&self, id: &RequestId) {
        self.inflight.lock().remove(id);
    }

    /// `$/cancelRequest`: cancel one in-flight request by id.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        match self.inflight.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the given request id is currently in flight (progress
    /// routing).
    pub fn has_inflight(&self) -> bool {
        !self.inflight.lock().is_empty()
    }
}

/// Owns the session table.
pub struct SessionManager {
    store: Arc<SettingsStore>,
    sessions: DashMap<String, Arc<DownstreamSession>>,
}

impl SessionManager {
    pub fn new(store: Arc<SettingsStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            sessions: DashMap::new(),
        })
    }

    /// Create a session; its push-stream receiver is claimed later via
    /// [`DownstreamSession::take_stream`].
    pub fn create(
        &self,
        scope: RoutingScope,
        user: Option<String>,
        kind: SessionTransportKind,
    ) -> Arc<DownstreamSession> {
        let session_id = Uuid::new_v4().to_string();
        // UUIDv4 collisions within one process are a broken invariant, not
        // a recoverable condition.
        assert!(
            !self.sessions.contains_key(&session_id),
            "session id collision: {}",
            session_id
        );

        let (outbound, rx) = mpsc::unbounded_channel();
        let session = Arc::new(DownstreamSession {
            session_id: session_id.clone(),
            scope,
            user,
            kind,
            created_at: Utc::now(),
            outbound,
            stream_rx: Mutex::new(Some(rx)),
            last_activity: RwLock::new(tokio::time::Instant::now()),
            cancel: CancellationToken::new(),
            inflight: Mutex::new(HashMap::new()),
        });
        self.sessions.insert(session_id.clone(), session.clone());
        tracing::debug!("session {} opened ({})", session_id, session.scope);
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<DownstreamSession>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Remove a session and cancel its in-flight dispatches. The transport
    /// is never closed while the map shard lock is held.
    pub fn remove(&self, session_id: &str) {
        let session = self.sessions.remove(session_id).map(|(_, s)| s);
        if let Some(session) = session {
            session.cancel.cancel();
            tracing::debug!("session {} closed", session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions whose scope includes the given server (notification
    /// fan-in).
    pub fn sessions_including(&self, server: &str) -> Vec<Arc<DownstreamSession>> {
        let settings = self.store.settings();
        self.sessions
            .iter()
            .filter(|entry| scope_includes(&settings, &entry.scope, server))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Reap sessions idle past the timeout. Runs until the manager drops.
    pub fn start_reaper(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let expired: Vec<String> = manager
                    .sessions
                    .iter()
                    .filter(|entry| entry.idle_for() >= constants::SESSION_IDLE_TIMEOUT)
                    .map(|entry| entry.session_id.clone())
                    .collect();
                for session_id in expired {
                    tracing::info!("session {} idle timeout", session_id);
                    manager.remove(&session_id);
                }
            }
        });
    }
}

/// Whether a scope covers a server (used for notification fan-in).
pub fn scope_includes(settings: &Settings, scope: &RoutingScope, server: &str) -> bool {
    match scope {
        RoutingScope::Global | RoutingScope::SmartGlobal => true,
        RoutingScope::Server(name) => name == server,
        RoutingScope::Group(id) | RoutingScope::SmartGroup(id) => settings
            .find_group(id)
            .map(|group| group.server_names().contains(&server))
            .unwrap_or(false),
    }
}

/// Map the path segments after `/sse` or `/mcp` to a routing scope.
///
/// Grammar: empty → global; `$smart` → smart global; `$smart/<group>` →
/// smart group; `<key>` → group (id first, name when the name route is
/// enabled), then server. Group wins over a server with the same
/// identifier. A disabled global route is a `Forbidden`, unknown
/// identifiers are `None`.
pub fn parse_scope(
    settings: &Settings,
    segments: &[&str],
) -> std::result::Result<RoutingScope, ScopeError> {
    let routing = &settings.system_config.routing;
    match segments {
        [] => {
            if routing.enable_global_route {
                Ok(RoutingScope::Global)
            } else {
                Err(ScopeError::GlobalRouteDisabled)
            }
        }
        [marker] if *marker == constants::SMART_ROUTE_MARKER => Ok(RoutingScope::SmartGlobal),
        [marker, group] if *marker == constants::SMART_ROUTE_MARKER => {
            match settings.find_group(group) {
                Some(found) => Ok(RoutingScope::SmartGroup(found.id.clone())),
                None => Err(ScopeError::Unknown(group.to_string())),
            }
        }
        [key] => {
            // Group wins when a group and a server share the identifier.
            if let Some(group) = settings.find_group(key) {
                Ok(RoutingScope::Group(group.id.clone()))
            } else if settings.mcp_servers.contains_key(*key) {
                Ok(RoutingScope::Server(key.to_string()))
            } else {
                Err(ScopeError::Unknown(key.to_string()))
            }
        }
        _ => Err(ScopeError::Unknown(segments.join("/"))),
    }
}

/// Scope resolution failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// `enableGlobalRoute=false` and no scope given (HTTP 403)
    GlobalRouteDisabled,
    /// Identifier matches no group and no server (HTTP 404)
    Unknown(String),
}

/// Bearer-auth gate for session endpoints.
///
/// `skip_auth` bypasses everything; bearer auth compares the presented
/// token against the configured key in constant time; otherwise the
/// upstream auth layer is trusted and user mounts must name a known user.
pub fn check_auth(
    settings: &Settings,
    user: Option<&str>,
    authorization: Option<&str>,
) -> std::result::Result<(), AuthError> {
    let routing = &settings.system_config_for(user).routing;

    if routing.skip_auth {
        return Ok(());
    }

    if routing.enable_bearer_auth {
        let Some(token) = authorization.and_then(|h| h.strip_prefix("Bearer ")) else {
            return Err(AuthError::Unauthorized);
        };
        let expected = routing.bearer_auth_key.as_bytes();
        let presented = token.as_bytes();
        if expected.len() != presented.len()
            || expected.ct_eq(presented).unwrap_u8() != 1
        {
            return Err(AuthError::Unauthorized);
        }
        return Ok(());
    }

    if let Some(username) = user
        && !settings.users.iter().any(|u| u.username == username)
    {
        return Err(AuthError::Unauthorized);
    }

    Ok(())
}

#[cfg(test)]
mod session_test {
    include!("session_test.rs");
}
