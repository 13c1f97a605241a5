//! OAuth HTTP surface
//!
//! The redirect endpoint (`/oauth/callback`) that completes upstream
//! authorization flows, plus the optional authorization-proxy endpoints
//! (RFC 8414 metadata, `/authorize`, `/token`) that delegate to a
//! configured issuer when `systemConfig.oauth.enabled` is set.

use super::OAuthCoordinator;
use crate::config::SettingsStore;
use axum::{
    Json, Router,
    extract::{Query, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub struct OAuthRoutesState {
    pub coordinator: Arc<OAuthCoordinator>,
    pub store: Arc<SettingsStore>,
    pub http: reqwest::Client,
}

/// Callback route, always mounted.
pub fn create_oauth_routes(state: Arc<OAuthRoutesState>) -> Router {
    Router::new()
        .route("/oauth/callback", get(oauth_callback_handler))
        .with_state(state)
}

/// Authorization-proxy routes, mounted when the proxy is enabled.
pub fn create_oauth_proxy_routes(state: Arc<OAuthRoutesState>) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(proxy_metadata_handler),
        )
        .route("/authorize", get(proxy_authorize_handler))
        .route("/token", post(proxy_token_handler))
        .with_state(state)
}

async fn oauth_callback_handler(
    State(state): State<Arc<OAuthRoutesState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.as_str())
            .unwrap_or("Unknown error");
        tracing::error!("OAuth authorization failed: {} - {}", error, description);
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page(
                "OAuth Authorization Failed",
                &format!("{}: {}", error, description),
            )),
        )
            .into_response();
    }

    let (Some(code), Some(callback_state)) = (params.get("code"), params.get("state")) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page(
                "Invalid Callback",
                "Missing code or state parameter.",
            )),
        )
            .into_response();
    };

    match state
        .coordinator
        .handle_callback(callback_state, code)
        .await
    {
        Ok(server) => {
            tracing::info!("authorization completed for upstream '{}'", server);
            Html(success_page(&server)).into_response()
        }
        Err(error) => {
            tracing::error!("OAuth callback failed: {}", error);
            (
                StatusCode::BAD_REQUEST,
                Html(error_page("Token Exchange Failed", &error.to_string())),
            )
                .into_response()
        }
    }
}

/// RFC 8414 metadata pointing clients at the hub's proxied endpoints.
async fn proxy_metadata_handler(
    State(state): State<Arc<OAuthRoutesState>>,
) -> Result<Json<Value>, StatusCode> {
    let settings = state.store.settings();
    let proxy = settings
        .system_config
        .oauth
        .as_ref()
        .filter(|p| p.enabled)
        .ok_or(StatusCode::NOT_FOUND)?;
    let issuer = proxy.issuer.clone().ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(json!({
        "issuer": issuer,
        "authorization_endpoint": "/authorize",
        "token_endpoint": "/token",
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
    })))
}

/// Redirect to the configured issuer's authorization endpoint, preserving
/// the client's query string.
async fn proxy_authorize_handler(
    State(state): State<Arc<OAuthRoutesState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let settings = state.store.settings();
    let Some(proxy) = settings
        .system_config
        .oauth
        .as_ref()
        .filter(|p| p.enabled)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let endpoint = match resolve_endpoint(
        &state,
        proxy.authorization_endpoint.clone(),
        proxy.issuer.as_deref(),
        |m| m.authorization_endpoint.clone(),
    )
    .await
    {
        Some(endpoint) => endpoint,
        None => return StatusCode::BAD_GATEWAY.into_response(),
    };

    let target = match query {
        Some(query) => format!("{}?{}", endpoint, query),
        None => endpoint,
    };
    Redirect::temporary(&target).into_response()
}

/// Forward the token grant to the issuer and relay its response.
async fn proxy_token_handler(
    State(state): State<Arc<OAuthRoutesState>>,
    body: String,
) -> Response {
    let settings = state.store.settings();
    let Some(proxy) = settings
        .system_config
        .oauth
        .as_ref()
        .filter(|p| p.enabled)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let endpoint = match resolve_endpoint(
        &state,
        proxy.token_endpoint.clone(),
        proxy.issuer.as_deref(),
        |m| m.token_endpoint.clone(),
    )
    .await
    {
        Some(endpoint) => endpoint,
        None => return StatusCode::BAD_GATEWAY.into_response(),
    };

    let result = state
        .http
        .post(&endpoint)
        .header(
            reqwest::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body(body)
        .send()
        .await;

    match result {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let body = upstream.text().await.unwrap_or_default();
            (
                status,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(error) => {
            tracing::error!("token proxy failed: {}", error);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Explicit endpoint wins; otherwise discover it from the issuer.
async fn resolve_endpoint<F>(
    state: &Arc<OAuthRoutesState>,
    explicit: Option<String>,
    issuer: Option<&str>,
    pick: F,
) -> Option<String>
where
    F: Fn(&super::AuthServerMetadata) -> Option<String>,
{
    if let Some(endpoint) = explicit {
        return Some(endpoint);
    }
    let issuer = issuer?;
    match state.coordinator.discover(issuer).await {
        Ok(metadata) => pick(&metadata),
        Err(error) => {
            tracing::error!("issuer discovery failed: {}", error);
            None
        }
    }
}

fn success_page(server: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Complete</title></head>
<body>
    <h1>Authorization Complete</h1>
    <p>Server <strong>{}</strong> is now authorized. This window closes automatically.</p>
    <script>setTimeout(function() {{ window.close(); }}, 3000);</script>
</body>
</html>"#,
        server
    )
}

fn error_page(heading: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>OAuth Error</title></head>
<body>
    <h1>{}</h1>
    <p>{}</p>
</body>
</html>"#,
        heading, message
    )
}
