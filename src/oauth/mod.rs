//! OAuth 2.0 coordination for upstream servers
//!
//! Handles every OAuth interaction on behalf of upstreams that advertise
//! it: static tokens, refresh grants, dynamic client registration
//! (RFC 7591), and the authorization-code flow with PKCE (RFC 7636). The
//! flow is a two-phase state machine: *preparing* builds a persisted
//! pending-authorization record, *awaiting callback* survives restarts,
//! then the callback exchanges the code and activates the token.
//!
//! All mutations go through the settings store so persistence is
//! authoritative; a per-server mutex serializes them.

pub mod routes;

use crate::config::{
    DynamicRegistration, OAuthConfig, PendingAuthorization, SettingsStore,
};
use crate::constants;
use crate::{McpHubError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use dashmap::DashMap;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Authorization-server metadata (RFC 8414 subset)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub registration_endpoint: Option<String>,
}

/// The hub-side payload encoded into the OAuth `state` parameter so
/// callbacks can recover the target server even across process restarts.
#[derive(Debug, Serialize, Deserialize)]
struct StatePayload {
    server: String,
    nonce: String,
}

/// Drives OAuth flows for upstream servers and persists every result.
pub struct OAuthCoordinator {
    store: Arc<SettingsStore>,
    http: reqwest::Client,
    redirect_uri: String,
    /// Per-server write serialization
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OAuthCoordinator {
    /// Create a coordinator. The HTTP client refuses redirects so
    /// authorization codes cannot be intercepted mid-flight.
    pub fn new(store: Arc<SettingsStore>, redirect_uri: String) -> Result<Arc<Self>> {
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                McpHubError::config(format!("Failed to build HTTP client for OAuth: {}", e))
            })?;

        Ok(Arc::new(Self {
            store,
            http,
            redirect_uri,
            locks: DashMap::new(),
        }))
    }

    fn lock_for(&self, server: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn oauth_config(&self, server: &str) -> Result<OAuthConfig> {
        let settings = self.store.settings();
        let config = settings
            .mcp_servers
            .get(server)
            .ok_or_else(|| McpHubError::not_found(format!("Server '{}' not found", server)))?;
        config
            .oauth
            .clone()
            .ok_or_else(|| McpHubError::oauth(format!("Server '{}' has no oauth config", server)))
    }

    /// Produce an access token for an upstream, walking the acquisition
    /// chain: static token, refresh grant, dynamic registration, then a
    /// pending authorization. `None` means the server stays in
    /// `oauth_required` until the callback arrives.
    pub async fn acquire_token(&self, server: &str) -> Result<Option<String>> {
        self.gc_pending();
        let oauth = self.oauth_config(server)?;

        if let Some(token) = &oauth.access_token
            && !token_expired(token)
        {
            return Ok(Some(token.clone()));
        }

        self.reauthorize(server).await
    }

    /// Re-authorization after a 401 or an expired token: the cached access
    /// token is assumed dead, so go straight to refresh / registration /
    /// pending authorization.
    pub async fn reauthorize(&self, server: &str) -> Result<Option<String>> {
        self.gc_pending();
        let oauth = self.oauth_config(server)?;

        if oauth.refresh_token.is_some() {
            match self.refresh_access_token(server).await {
                Ok(token) => return Ok(Some(token)),
                Err(error) => {
                    tracing::warn!("refresh for '{}' failed: {}", server, error);
                    // Fall through to a fresh authorization flow.
                }
            }
        }

        let oauth = self.oauth_config(server)?;
        if oauth.client_id.is_none() {
            let dynamic_enabled = oauth
                .dynamic_registration
                .as_ref()
                .map(|d| d.enabled)
                .unwrap_or(false);
            if dynamic_enabled {
                self.register_client(server).await?;
            } else {
                return Err(McpHubError::oauth(format!(
                    "Server '{}' has no clientId and dynamic registration is disabled",
                    server
                )));
            }
        }

        self.begin_authorization(server).await?;
        Ok(None)
    }

    /// Refresh-token grant. On success the new tokens are persisted and the
    /// access token returned. On failure the stored access token is
    /// cleared so the server lands in `oauth_required`; the refresh token
    /// is dropped only when the issuer answered `invalid_grant`.
    pub async fn refresh_access_token(&self, server: &str) -> Result<String> {
        let lock = self.lock_for(server);
        let _guard = lock.lock().await;

        let oauth = self.oauth_config(server)?;
        let refresh_token = oauth
            .refresh_token
            .clone()
            .ok_or_else(|| McpHubError::oauth(format!("No refresh token for '{}'", server)))?;

        let client = self.build_client(&oauth)?;
        let result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => {
                let access_token = response.access_token().secret().clone();
                let new_refresh = response.refresh_token().map(|t| t.secret().clone());
                self.persist_oauth(server, |oauth| {
                    oauth.access_token = Some(access_token.clone());
                    if let Some(refresh) = new_refresh.clone() {
                        oauth.refresh_token = Some(refresh);
                    }
                })?;
                tracing::info!("refreshed access token for '{}'", server);
                Ok(access_token)
            }
            Err(error) => {
                let invalid_grant = matches!(
                    &error,
                    oauth2::RequestTokenError::ServerResponse(response)
                        if *response.error() == oauth2::basic::BasicErrorResponseType::InvalidGrant
                );
                self.persist_oauth(server, |oauth| {
                    oauth.access_token = None;
                    if invalid_grant {
                        oauth.refresh_token = None;
                    }
                })?;
                Err(McpHubError::oauth(format!(
                    "Token refresh failed for '{}': {}",
                    server, error
                )))
            }
        }
    }

    /// RFC 7591 dynamic client registration.
    pub async fn register_client(&self, server: &str) -> Result<()> {
        let lock = self.lock_for(server);
        let _guard = lock.lock().await;

        let oauth = self.oauth_config(server)?;
        let dynamic = oauth
            .dynamic_registration
            .clone()
            .unwrap_or(DynamicRegistration {
                enabled: false,
                issuer: None,
                registration_endpoint: None,
                metadata: None,
                initial_access_token: None,
            });

        let mut registration_endpoint = dynamic.registration_endpoint.clone();
        let mut discovered: Option<AuthServerMetadata> = None;
        if registration_endpoint.is_none() {
            let issuer = dynamic.issuer.clone().ok_or_else(|| {
                McpHubError::oauth(format!(
                    "Server '{}' dynamic registration needs an issuer or registrationEndpoint",
                    server
                ))
            })?;
            let metadata = self.discover(&issuer).await?;
            registration_endpoint = metadata.registration_endpoint.clone();
            discovered = Some(metadata);
        }
        let registration_endpoint = registration_endpoint.ok_or_else(|| {
            McpHubError::oauth(format!(
                "Issuer for '{}' does not advertise a registration endpoint",
                server
            ))
        })?;

        let mut metadata = dynamic.metadata.clone().unwrap_or_else(|| {
            json!({
                "client_name": env!("CARGO_PKG_NAME"),
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"],
                "token_endpoint_auth_method": "none",
            })
        });
        if let Some(object) = metadata.as_object_mut() {
            object
                .entry("redirect_uris")
                .or_insert_with(|| json!([self.redirect_uri]));
        }

        let mut request = self.http.post(&registration_endpoint).json(&metadata);
        if let Some(token) = &dynamic.initial_access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| McpHubError::oauth(format!("Registration request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpHubError::oauth(format!(
                "Registration for '{}' failed with HTTP {}",
                server, status
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| McpHubError::oauth(format!("Registration response unreadable: {}", e)))?;

        let client_id = body
            .get("client_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| McpHubError::oauth("Registration response missing client_id"))?;
        let client_secret = body
            .get("client_secret")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let endpoints = discovered;
        self.persist_oauth(server, |oauth| {
            oauth.client_id = Some(client_id.clone());
            if let Some(secret) = client_secret.clone() {
                oauth.client_secret = Some(secret);
            }
            if let Some(metadata) = &endpoints {
                if oauth.authorization_endpoint.is_none() {
                    oauth.authorization_endpoint = metadata.authorization_endpoint.clone();
                }
                if oauth.token_endpoint.is_none() {
                    oauth.token_endpoint = metadata.token_endpoint.clone();
                }
            }
        })?;

        tracing::info!("registered OAuth client for '{}'", server);
        Ok(())
    }

    /// Start the PKCE authorization-code flow: build the authorization URL
    /// and persist a pending record. A new request supersedes and discards
    /// any previous pending authorization for the server.
    pub async fn begin_authorization(&self, server: &str) -> Result<String> {
        let lock = self.lock_for(server);
        let _guard = lock.lock().await;

        let mut oauth = self.oauth_config(server)?;

        // Endpoints may need discovery from the dynamic-registration issuer.
        if oauth.authorization_endpoint.is_none() || oauth.token_endpoint.is_none() {
            let issuer = oauth
                .dynamic_registration
                .as_ref()
                .and_then(|d| d.issuer.clone());
            if let Some(issuer) = issuer {
                let metadata = self.discover(&issuer).await?;
                if oauth.authorization_endpoint.is_none() {
                    oauth.authorization_endpoint = metadata.authorization_endpoint;
                }
                if oauth.token_endpoint.is_none() {
                    oauth.token_endpoint = metadata.token_endpoint;
                }
            }
        }

        let client = self.build_authorization_client(&oauth)?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let state = encode_state(server);
        let scopes = oauth.scopes.clone().unwrap_or_default();
        let state_for_url = state.clone();
        let mut request = client
            .authorize_url(move || CsrfToken::new(state_for_url.clone()))
            .add_scopes(scopes.into_iter().map(Scope::new))
            .set_pkce_challenge(pkce_challenge);
        if let Some(resource) = &oauth.resource {
            request = request.add_extra_param("resource", resource.clone());
        }
        let (authorization_url, _) = request.url();
        let authorization_url = authorization_url.to_string();

        let pending = PendingAuthorization {
            authorization_url: authorization_url.clone(),
            state,
            code_verifier: pkce_verifier.secret().clone(),
            created_at: Utc::now(),
        };
        let endpoints = (
            oauth.authorization_endpoint.clone(),
            oauth.token_endpoint.clone(),
        );
        self.persist_oauth(server, |oauth| {
            oauth.pending_authorization = Some(pending.clone());
            oauth.authorization_endpoint = endpoints.0.clone();
            oauth.token_endpoint = endpoints.1.clone();
        })?;

        tracing::info!("awaiting OAuth authorization for '{}'", server);
        Ok(authorization_url)
    }

    /// Authorization callback: locate the server by state, exchange the
    /// code with the stored verifier, persist tokens, clear the pending
    /// record. Returns the server name so the caller can report it.
    pub async fn handle_callback(&self, state: &str, code: &str) -> Result<String> {
        self.gc_pending();

        // Stored state wins over the decoded payload.
        let settings = self.store.settings();
        let server = settings
            .mcp_servers
            .iter()
            .find(|(_, config)| {
                config
                    .oauth
                    .as_ref()
                    .and_then(|o| o.pending_authorization.as_ref())
                    .map(|p| p.state == state)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .or_else(|| decode_state(state))
            .ok_or_else(|| McpHubError::oauth("No pending authorization matches this state"))?;

        let lock = self.lock_for(&server);
        let _guard = lock.lock().await;

        let oauth = self.oauth_config(&server)?;
        let pending = oauth
            .pending_authorization
            .clone()
            .ok_or_else(|| {
                McpHubError::oauth(format!("Server '{}' has no pending authorization", server))
            })?;

        let client = self.build_authorization_client(&oauth)?;
        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pending.code_verifier.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| McpHubError::oauth(format!("Token exchange failed: {}", e)))?;

        let access_token = response.access_token().secret().clone();
        let refresh_token = response.refresh_token().map(|t| t.secret().clone());
        self.persist_oauth(&server, |oauth| {
            oauth.access_token = Some(access_token.clone());
            if let Some(refresh) = refresh_token.clone() {
                oauth.refresh_token = Some(refresh);
            }
            oauth.pending_authorization = None;
        })?;

        tracing::info!("OAuth authorization completed for '{}'", server);
        Ok(server)
    }

    /// Fetch RFC 8414 authorization-server metadata for an issuer.
    pub async fn discover(&self, issuer: &str) -> Result<AuthServerMetadata> {
        let url = format!(
            "{}/.well-known/oauth-authorization-server",
            issuer.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| McpHubError::oauth(format!("Metadata discovery failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpHubError::oauth(format!(
                "Metadata discovery for {} returned HTTP {}",
                issuer, status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| McpHubError::oauth(format!("Metadata unreadable: {}", e)))
    }

    /// Drop pending authorizations older than the TTL.
    fn gc_pending(&self) {
        let settings = self.store.settings();
        let ttl = chrono::Duration::from_std(constants::PENDING_AUTHORIZATION_TTL)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let now = Utc::now();

        let stale: Vec<String> = settings
            .mcp_servers
            .iter()
            .filter(|(_, config)| {
                config
                    .oauth
                    .as_ref()
                    .and_then(|o| o.pending_authorization.as_ref())
                    .map(|p| now - p.created_at > ttl)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for server in stale {
            tracing::debug!("expiring pending authorization for '{}'", server);
            let _ = self.persist_oauth(&server, |oauth| {
                oauth.pending_authorization = None;
            });
        }
    }

    /// Apply a mutation to one server's oauth block and persist it.
    fn persist_oauth<F>(&self, server: &str, mutate: F) -> Result<()>
    where
        F: Fn(&mut OAuthConfig),
    {
        self.store.update(|doc| {
            let config = doc
                .mcp_servers
                .get_mut(server)
                .ok_or_else(|| McpHubError::not_found(format!("Server '{}' not found", server)))?;
            let oauth = config.oauth.get_or_insert_with(OAuthConfig::default);
            mutate(oauth);
            Ok(())
        })
    }

    fn build_client(
        &self,
        oauth: &OAuthConfig,
    ) -> Result<
        BasicClient<
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointSet,
        >,
    > {
        let client_id = oauth
            .client_id
            .clone()
            .ok_or_else(|| McpHubError::oauth("Missing clientId"))?;
        let token_endpoint = oauth
            .token_endpoint
            .clone()
            .ok_or_else(|| McpHubError::oauth("Missing tokenEndpoint"))?;

        let mut client = BasicClient::new(ClientId::new(client_id)).set_token_uri(
            TokenUrl::new(token_endpoint)
                .map_err(|e| McpHubError::oauth(format!("Invalid token URL: {}", e)))?,
        );
        if let Some(secret) = &oauth.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        Ok(client)
    }

    fn build_authorization_client(
        &self,
        oauth: &OAuthConfig,
    ) -> Result<
        BasicClient<
            oauth2::EndpointSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointSet,
        >,
    > {
        let client_id = oauth
            .client_id
            .clone()
            .ok_or_else(|| McpHubError::oauth("Missing clientId"))?;
        let authorization_endpoint = oauth
            .authorization_endpoint
            .clone()
            .ok_or_else(|| McpHubError::oauth("Missing authorizationEndpoint"))?;
        let token_endpoint = oauth
            .token_endpoint
            .clone()
            .ok_or_else(|| McpHubError::oauth("Missing tokenEndpoint"))?;

        let mut client = BasicClient::new(ClientId::new(client_id))
            .set_auth_uri(
                AuthUrl::new(authorization_endpoint)
                    .map_err(|e| McpHubError::oauth(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(token_endpoint)
                    .map_err(|e| McpHubError::oauth(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(self.redirect_uri.clone())
                    .map_err(|e| McpHubError::oauth(format!("Invalid redirect URI: {}", e)))?,
            );
        if let Some(secret) = &oauth.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        Ok(client)
    }
}

/// URL-safe base64 JSON `{server, nonce}`
fn encode_state(server: &str) -> String {
    let nonce: String = {
        let mut rng = rand::rng();
        (0..16)
            .map(|_| format!("{:02x}", rng.random::<u8>()))
            .collect()
    };
    let payload = StatePayload {
        server: server.to_string(),
        nonce,
    };
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap_or_default())
}

fn decode_state(state: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let payload: StatePayload = serde_json::from_slice(&bytes).ok()?;
    Some(payload.server)
}

/// Whether a (possibly JWT) access token is expired, with 60s clock-skew
/// tolerance. Opaque tokens are assumed valid.
fn token_expired(token: &str) -> bool {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    // Only the exp claim matters here; the signature belongs to the
    // upstream issuer and is not ours to verify.
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let Ok(data) = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(&[]),
        &validation,
    ) else {
        return false;
    };
    let Some(exp) = data.claims.exp else {
        return false;
    };
    // Refresh within the skew window rather than risking a 401.
    let skew = constants::TOKEN_EXP_SKEW.as_secs() as i64;
    exp < Utc::now().timestamp() + skew
}

#[cfg(test)]
mod oauth_test {
    include!("oauth_test.rs");
}
