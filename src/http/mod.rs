//! HTTP server for MCPHub
//!
//! The downstream endpoint surface: SSE sessions (`/sse`, `/messages`),
//! streamable-HTTP sessions (`/mcp`), their user-scoped variants, the OAuth
//! callback, and the optional authorization-proxy routes. All session
//! endpoints accept an optional scope suffix (`/<group>`, `/$smart`,
//! `/$smart/<group>`).

use crate::config::SettingsStore;
use crate::constants;
use crate::dispatch::RequestDispatcher;
use crate::model::{RequestContext, RoutingScope};
use crate::oauth::OAuthCoordinator;
use crate::oauth::routes::{OAuthRoutesState, create_oauth_proxy_routes, create_oauth_routes};
use crate::protocol::{JsonRpcMessage, JsonRpcResponse, RpcError};
use crate::session::{
    AuthError, ScopeError, SessionManager, SessionTransportKind, parse_scope,
};
use crate::upstream::UpstreamRegistry;
use crate::vector::VectorIndex;
use crate::{McpHubError, Result};
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    store: Arc<SettingsStore>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<RequestDispatcher>,
    base_path: String,
}

/// The assembled hub: all components wired, ready to serve.
pub struct HubServer {
    store: Arc<SettingsStore>,
    registry: Arc<UpstreamRegistry>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<RequestDispatcher>,
    oauth: Arc<OAuthCoordinator>,
    base_path: String,
}

impl HubServer {
    /// Wire every component and start the upstream pool.
    pub async fn new(store: Arc<SettingsStore>) -> Result<Self> {
        let base_path = base_path_from_env();
        let port = std::env::var(constants::ENV_PORT)
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(constants::DEFAULT_HTTP_PORT);
        let redirect_uri = format!(
            "http://localhost:{}{}/oauth/callback",
            port, base_path
        );

        let oauth = OAuthCoordinator::new(store.clone(), redirect_uri)?;
        let registry = UpstreamRegistry::new(store.clone(), oauth.clone());
        registry.start().await;

        let vector = VectorIndex::new(store.clone(), registry.clone());
        vector.start();

        let sessions = SessionManager::new(store.clone());
        sessions.start_reaper();

        let dispatcher = RequestDispatcher::new(
            store.clone(),
            registry.clone(),
            vector,
            sessions.clone(),
        );
        dispatcher.start();

        Ok(Self {
            store,
            registry,
            sessions,
            dispatcher,
            oauth,
            base_path,
        })
    }

    pub fn registry(&self) -> Arc<UpstreamRegistry> {
        self.registry.clone()
    }

    /// Build the full router (exposed separately for tests).
    pub fn router(&self) -> Router {
        let state = AppState {
            store: self.store.clone(),
            sessions: self.sessions.clone(),
            dispatcher: self.dispatcher.clone(),
            base_path: self.base_path.clone(),
        };

        let session_routes = Router::new()
            .route("/sse", get(sse_handler))
            .route("/sse/{*scope}", get(sse_handler_scoped))
            .route("/messages", post(messages_handler))
            .route("/mcp", any(mcp_handler))
            .route("/mcp/{*scope}", any(mcp_handler_scoped))
            .route("/{user}/sse", get(sse_handler_user))
            .route("/{user}/sse/{*scope}", get(sse_handler_user_scoped))
            .route("/{user}/messages", post(messages_handler_user))
            .route("/{user}/mcp", any(mcp_handler_user))
            .route("/{user}/mcp/{*scope}", any(mcp_handler_user_scoped))
            .with_state(state);

        let oauth_state = Arc::new(OAuthRoutesState {
            coordinator: self.oauth.clone(),
            store: self.store.clone(),
            http: reqwest::Client::new(),
        });
        let mut router = session_routes.merge(create_oauth_routes(oauth_state.clone()));

        let proxy_enabled = self
            .store
            .settings()
            .system_config
            .oauth
            .as_ref()
            .map(|p| p.enabled)
            .unwrap_or(false);
        if proxy_enabled {
            router = router.merge(create_oauth_proxy_routes(oauth_state));
        }

        let router = if self.base_path.is_empty() {
            router
        } else {
            Router::new().nest(&self.base_path, router)
        };

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until SIGINT/SIGTERM.
    ///
    /// Bind failures surface as `Io` so the binary can exit with code 2.
    pub async fn serve(&self, host: &str, port: u16) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| McpHubError::config(format!("Invalid address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("MCPHub listening on http://{}{}", addr, self.base_path);
        tracing::info!("  SSE endpoint:       {}/sse[/<scope>]", self.base_path);
        tracing::info!("  Streamable HTTP:    {}/mcp[/<scope>]", self.base_path);
        tracing::info!("  OAuth callback:     {}/oauth/callback", self.base_path);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| McpHubError::internal(format!("Server error: {}", e)))?;

        tracing::info!("MCPHub shut down cleanly");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// `BASE_PATH` normalized to `""` or `/prefix`
fn base_path_from_env() -> String {
    let raw = std::env::var(constants::ENV_BASE_PATH).unwrap_or_default();
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

// ============================================================================
// SCOPE / AUTH PLUMBING
// ============================================================================

fn split_scope_segments(scope: &str) -> Vec<&str> {
    scope
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Run the auth gate and scope parse shared by every session endpoint.
fn gate(
    state: &AppState,
    user: Option<&str>,
    headers: &HeaderMap,
    scope: &str,
) -> std::result::Result<RoutingScope, Response> {
    let settings = state.store.settings();

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Err(error) = crate::session::check_auth(&settings, user, authorization) {
        let status = match error {
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        return Err((status, "Unauthorized").into_response());
    }

    match parse_scope(&settings, &split_scope_segments(scope)) {
        Ok(scope) => Ok(scope),
        Err(ScopeError::GlobalRouteDisabled) => {
            Err((StatusCode::FORBIDDEN, "Global route is disabled").into_response())
        }
        Err(ScopeError::Unknown(key)) => Err((
            StatusCode::NOT_FOUND,
            format!("No group or server named '{}'", key),
        )
            .into_response()),
    }
}

fn request_context(
    session: &Arc<crate::session::DownstreamSession>,
    headers: &HeaderMap,
) -> RequestContext {
    let mut ctx = RequestContext::new(session.session_id.clone(), session.scope.clone());
    ctx.user = session.user.clone();
    ctx.with_http_headers(headers)
}

// ============================================================================
// SSE TRANSPORT
// ============================================================================

async fn sse_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    open_sse(state, None, headers, String::new()).await
}

async fn sse_handler_scoped(
    State(state): State<AppState>,
    AxumPath(scope): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    open_sse(state, None, headers, scope).await
}

async fn sse_handler_user(
    State(state): State<AppState>,
    AxumPath(user): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    open_sse(state, Some(user), headers, String::new()).await
}

async fn sse_handler_user_scoped(
    State(state): State<AppState>,
    AxumPath((user, scope)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    open_sse(state, Some(user), headers, scope).await
}

/// Open an SSE session: emit the `endpoint` event, then relay frames with
/// comment keepalives until the client goes away.
async fn open_sse(
    state: AppState,
    user: Option<String>,
    headers: HeaderMap,
    scope: String,
) -> Response {
    let scope = match gate(&state, user.as_deref(), &headers, &scope) {
        Ok(scope) => scope,
        Err(response) => return response,
    };

    let session = state
        .sessions
        .create(scope, user.clone(), SessionTransportKind::Sse);
    let rx = match session.take_stream() {
        Some(rx) => rx,
        None => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let messages_path = match &user {
        Some(user) => format!("{}/{}/messages", state.base_path, user),
        None => format!("{}/messages", state.base_path),
    };
    let endpoint_frame = format!(
        "event: endpoint\ndata: {}?sessionId={}\n\n",
        messages_path, session.session_id
    );

    let guard = SessionGuard {
        sessions: state.sessions.clone(),
        session_id: session.session_id.clone(),
    };
    let body_stream = sse_stream(Some(endpoint_frame), rx, guard);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(constants::MCP_SESSION_ID_HEADER, session.session_id.clone())
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Removes the session when the downstream stream is dropped.
struct SessionGuard {
    sessions: Arc<SessionManager>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.session_id);
    }
}

fn sse_stream(
    first_frame: Option<String>,
    rx: mpsc::UnboundedReceiver<String>,
    guard: SessionGuard,
) -> impl futures::Stream<Item = std::result::Result<Bytes, Infallible>> + Send {
    let mut keepalive = tokio::time::interval(constants::KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    futures::stream::unfold(
        (first_frame, rx, keepalive, guard),
        |(pending, mut rx, mut keepalive, guard)| async move {
            if let Some(frame) = pending {
                // First poll delivers the endpoint event; swallow the
                // interval's immediate initial tick alongside it.
                keepalive.tick().await;
                return Some((Ok(Bytes::from(frame)), (None, rx, keepalive, guard)));
            }
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(json) => Some((
                        Ok(Bytes::from(format!("event: message\ndata: {}\n\n", json))),
                        (None, rx, keepalive, guard),
                    )),
                    None => None,
                },
                _ = keepalive.tick() => Some((
                    Ok(Bytes::from(": keepalive\n\n")),
                    (None, rx, keepalive, guard),
                )),
            }
        },
    )
}

// ============================================================================
// SSE MESSAGE INGRESS
// ============================================================================

async fn messages_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    ingest_message(state, params, headers, body).await
}

async fn messages_handler_user(
    State(state): State<AppState>,
    AxumPath(_user): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    ingest_message(state, params, headers, body).await
}

/// POST ingress for SSE sessions: dispatch in the background, reply 202;
/// the response frame arrives on the event stream.
async fn ingest_message(
    state: AppState,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(session_id) = params.get("sessionId") else {
        return (StatusCode::BAD_REQUEST, "sessionId query parameter is required")
            .into_response();
    };
    let Some(session) = state.sessions.get(session_id) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    let message: JsonRpcMessage = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(error) => {
            let failure = JsonRpcResponse::failure(
                None,
                RpcError {
                    code: constants::RPC_PARSE_ERROR,
                    message: format!("Parse error: {}", error),
                    data: None,
                },
            );
            session.send_frame(&failure);
            return (StatusCode::BAD_REQUEST, "Invalid JSON-RPC frame").into_response();
        }
    };

    let ctx = request_context(&session, &headers);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Some(response) = dispatcher.handle_message(&session, message, ctx).await {
            session.send_frame(&response);
        }
    });

    StatusCode::ACCEPTED.into_response()
}

// ============================================================================
// STREAMABLE HTTP TRANSPORT
// ============================================================================

async fn mcp_handler(
    State(state): State<AppState>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    serve_mcp(state, None, method, headers, String::new(), body).await
}

async fn mcp_handler_scoped(
    State(state): State<AppState>,
    AxumPath(scope): AxumPath<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    serve_mcp(state, None, method, headers, scope, body).await
}

async fn mcp_handler_user(
    State(state): State<AppState>,
    AxumPath(user): AxumPath<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    serve_mcp(state, Some(user), method, headers, String::new(), body).await
}

async fn mcp_handler_user_scoped(
    State(state): State<AppState>,
    AxumPath((user, scope)): AxumPath<(String, String)>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    serve_mcp(state, Some(user), method, headers, scope, body).await
}

/// The unified `/mcp` endpoint: POST carries frames (the first `initialize`
/// without a session id mints one), GET opens the push stream, DELETE
/// closes the session.
async fn serve_mcp(
    state: AppState,
    user: Option<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    scope: String,
    body: String,
) -> Response {
    let presented_session = headers
        .get(constants::MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if method == axum::http::Method::POST {
        mcp_post(state, user, headers, scope, body, presented_session).await
    } else if method == axum::http::Method::GET {
        let Some(session_id) = presented_session else {
            return (StatusCode::BAD_REQUEST, "mcp-session-id header is required")
                .into_response();
        };
        let Some(session) = state.sessions.get(&session_id) else {
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        };
        let Some(rx) = session.take_stream() else {
            return (StatusCode::CONFLICT, "Push stream already claimed").into_response();
        };
        session.touch();

        let guard = SessionGuard {
            sessions: state.sessions.clone(),
            session_id,
        };
        let stream = sse_stream(None, rx, guard);
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else if method == axum::http::Method::DELETE {
        let Some(session_id) = presented_session else {
            return (StatusCode::BAD_REQUEST, "mcp-session-id header is required")
                .into_response();
        };
        if state.sessions.get(&session_id).is_none() {
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        }
        state.sessions.remove(&session_id);
        StatusCode::OK.into_response()
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

async fn mcp_post(
    state: AppState,
    user: Option<String>,
    headers: HeaderMap,
    scope: String,
    body: String,
    presented_session: Option<String>,
) -> Response {
    let message: JsonRpcMessage = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(error) => {
            let failure = JsonRpcResponse::failure(
                None,
                RpcError {
                    code: constants::RPC_PARSE_ERROR,
                    message: format!("Parse error: {}", error),
                    data: None,
                },
            );
            return (StatusCode::BAD_REQUEST, axum::Json(json!(failure))).into_response();
        }
    };

    // An existing session handles any frame; a first POST must initialize.
    if let Some(session_id) = presented_session {
        let Some(session) = state.sessions.get(&session_id) else {
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        };

        let settings = state.store.settings();
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if crate::session::check_auth(&settings, session.user.as_deref(), authorization).is_err()
        {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }

        let ctx = request_context(&session, &headers);
        return match state.dispatcher.handle_message(&session, message, ctx).await {
            Some(response) => axum::Json(json!(response)).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        };
    }

    if message.method.as_deref() != Some(crate::protocol::methods::INITIALIZE) {
        return (
            StatusCode::BAD_REQUEST,
            "First request must be initialize",
        )
            .into_response();
    }

    let scope = match gate(&state, user.as_deref(), &headers, &scope) {
        Ok(scope) => scope,
        Err(response) => return response,
    };

    let session = state
        .sessions
        .create(scope, user, SessionTransportKind::StreamableHttp);

    let ctx = request_context(&session, &headers);
    let response = state
        .dispatcher
        .handle_message(&session, message, ctx)
        .await;

    let mut http_response = match response {
        Some(response) => axum::Json(json!(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Ok(value) = session.session_id.parse() {
        http_response
            .headers_mut()
            .insert(constants::MCP_SESSION_ID_HEADER, value);
    }
    http_response
}
