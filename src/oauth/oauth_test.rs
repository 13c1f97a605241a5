use super::*;
use crate::config::{ServerConfig, ServerSpec, Settings, SettingsStore};
use std::collections::HashMap;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_with_server(name: &str, oauth: OAuthConfig) -> (TempDir, Arc<SettingsStore>) {
    let dir = TempDir::new().unwrap();
    let store = SettingsStore::discover(Some(dir.path().join("mcp_settings.json"))).unwrap();

    let mut doc = Settings::default();
    doc.mcp_servers.insert(
        name.to_string(),
        ServerConfig {
            spec: ServerSpec::Sse {
                url: "https://upstream.example.com/sse".to_string(),
                headers: HashMap::new(),
            },
            enabled: None,
            options: None,
            tools: HashMap::new(),
            prompts: HashMap::new(),
            oauth: Some(oauth),
        },
    );
    store.save(&doc).unwrap();
    (dir, Arc::new(store))
}

fn coordinator(store: Arc<SettingsStore>) -> Arc<OAuthCoordinator> {
    OAuthCoordinator::new(store, "http://localhost:3000/oauth/callback".to_string()).unwrap()
}

fn jwt_with_exp(exp: i64) -> String {
    #[derive(serde::Serialize)]
    struct Claims {
        exp: i64,
    }
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &Claims { exp },
        &jsonwebtoken::EncodingKey::from_secret(b"test"),
    )
    .unwrap()
}

#[test]
fn test_state_round_trip() {
    let state = encode_state("vercel");
    assert_eq!(decode_state(&state).as_deref(), Some("vercel"));

    // Two states for the same server differ by nonce.
    assert_ne!(state, encode_state("vercel"));
}

#[test]
fn test_decode_state_rejects_garbage() {
    assert!(decode_state("not-base64!").is_none());
    assert!(decode_state(&URL_SAFE_NO_PAD.encode(b"not json")).is_none());
}

#[test]
fn test_token_expiry_checks() {
    let future = Utc::now().timestamp() + 3600;
    assert!(!token_expired(&jwt_with_exp(future)));

    let past = Utc::now().timestamp() - 3600;
    assert!(token_expired(&jwt_with_exp(past)));

    // Inside the 60s skew window counts as expired.
    let skewed = Utc::now().timestamp() + 30;
    assert!(token_expired(&jwt_with_exp(skewed)));

    // Opaque tokens are assumed valid.
    assert!(!token_expired("opaque-token-value"));
}

#[tokio::test]
async fn test_acquire_returns_static_token() {
    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            access_token: Some("static-token".to_string()),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store);

    let token = coordinator.acquire_token("srv").await.unwrap();
    assert_eq!(token.as_deref(), Some("static-token"));
}

#[tokio::test]
async fn test_refresh_persists_new_tokens() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-rt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-at",
            "token_type": "bearer",
            "refresh_token": "new-rt",
            "expires_in": 3600,
        })))
        .mount(&mock)
        .await;

    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            client_id: Some("client-1".to_string()),
            refresh_token: Some("old-rt".to_string()),
            token_endpoint: Some(format!("{}/token", mock.uri())),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    let token = coordinator.refresh_access_token("srv").await.unwrap();
    assert_eq!(token, "new-at");

    let persisted = store.load_original().unwrap();
    let oauth = persisted.mcp_servers["srv"].oauth.clone().unwrap();
    assert_eq!(oauth.access_token.as_deref(), Some("new-at"));
    assert_eq!(oauth.refresh_token.as_deref(), Some("new-rt"));
}

#[tokio::test]
async fn test_refresh_invalid_grant_drops_refresh_token() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
        )
        .mount(&mock)
        .await;

    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            client_id: Some("client-1".to_string()),
            access_token: Some("stale-at".to_string()),
            refresh_token: Some("revoked-rt".to_string()),
            token_endpoint: Some(format!("{}/token", mock.uri())),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    assert!(coordinator.refresh_access_token("srv").await.is_err());

    let persisted = store.load_original().unwrap();
    let oauth = persisted.mcp_servers["srv"].oauth.clone().unwrap();
    assert!(oauth.access_token.is_none());
    assert!(oauth.refresh_token.is_none());
}

#[tokio::test]
async fn test_refresh_transient_failure_keeps_refresh_token() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(serde_json::json!({ "error": "server_error" })),
        )
        .mount(&mock)
        .await;

    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            client_id: Some("client-1".to_string()),
            access_token: Some("stale-at".to_string()),
            refresh_token: Some("still-good-rt".to_string()),
            token_endpoint: Some(format!("{}/token", mock.uri())),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    assert!(coordinator.refresh_access_token("srv").await.is_err());

    let persisted = store.load_original().unwrap();
    let oauth = persisted.mcp_servers["srv"].oauth.clone().unwrap();
    assert!(oauth.access_token.is_none());
    assert_eq!(oauth.refresh_token.as_deref(), Some("still-good-rt"));
}

#[tokio::test]
async fn test_begin_authorization_persists_pending() {
    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            client_id: Some("client-1".to_string()),
            authorization_endpoint: Some("https://issuer.example.com/authorize".to_string()),
            token_endpoint: Some("https://issuer.example.com/token".to_string()),
            scopes: Some(vec!["mcp".to_string()]),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    let url = coordinator.begin_authorization("srv").await.unwrap();
    assert!(url.starts_with("https://issuer.example.com/authorize"));
    assert!(url.contains("code_challenge_method=S256"));

    let persisted = store.load_original().unwrap();
    let pending = persisted.mcp_servers["srv"]
        .oauth
        .clone()
        .unwrap()
        .pending_authorization
        .unwrap();
    assert!(!pending.state.is_empty());
    assert!(!pending.code_verifier.is_empty());
    assert_eq!(pending.authorization_url, url);
    assert_eq!(decode_state(&pending.state).as_deref(), Some("srv"));

    // A second request supersedes the first.
    let second_url = coordinator.begin_authorization("srv").await.unwrap();
    let persisted = store.load_original().unwrap();
    let second = persisted.mcp_servers["srv"]
        .oauth
        .clone()
        .unwrap()
        .pending_authorization
        .unwrap();
    assert_ne!(second.state, pending.state);
    assert_eq!(second.authorization_url, second_url);
}

#[tokio::test]
async fn test_callback_exchanges_code_with_verifier() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=C"))
        .and(body_string_contains("code_verifier=V"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-at",
            "token_type": "bearer",
            "refresh_token": "fresh-rt",
        })))
        .mount(&mock)
        .await;

    let (_dir, store) = store_with_server(
        "vercel",
        OAuthConfig {
            client_id: Some("client-1".to_string()),
            authorization_endpoint: Some("https://issuer.example.com/authorize".to_string()),
            token_endpoint: Some(format!("{}/token", mock.uri())),
            pending_authorization: Some(PendingAuthorization {
                authorization_url: "https://issuer.example.com/authorize?state=S".to_string(),
                state: "S".to_string(),
                code_verifier: "V".to_string(),
                created_at: Utc::now(),
            }),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    let server = coordinator.handle_callback("S", "C").await.unwrap();
    assert_eq!(server, "vercel");

    let persisted = store.load_original().unwrap();
    let oauth = persisted.mcp_servers["vercel"].oauth.clone().unwrap();
    assert_eq!(oauth.access_token.as_deref(), Some("fresh-at"));
    assert_eq!(oauth.refresh_token.as_deref(), Some("fresh-rt"));
    assert!(oauth.pending_authorization.is_none());
}

#[tokio::test]
async fn test_callback_with_unknown_state_fails() {
    let (_dir, store) = store_with_server("srv", OAuthConfig::default());
    let coordinator = coordinator(store);

    assert!(coordinator.handle_callback("missing", "C").await.is_err());
}

#[tokio::test]
async fn test_stale_pending_is_garbage_collected() {
    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            access_token: Some("static".to_string()),
            pending_authorization: Some(PendingAuthorization {
                authorization_url: "https://issuer.example.com/authorize?state=old".to_string(),
                state: "old".to_string(),
                code_verifier: "old-v".to_string(),
                created_at: Utc::now() - chrono::Duration::minutes(45),
            }),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    // Any OAuth operation triggers the sweep.
    let _ = coordinator.acquire_token("srv").await.unwrap();

    let persisted = store.load_original().unwrap();
    assert!(
        persisted.mcp_servers["srv"]
            .oauth
            .clone()
            .unwrap()
            .pending_authorization
            .is_none()
    );
}

#[tokio::test]
async fn test_dynamic_registration_persists_client() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": mock.uri(),
            "authorization_endpoint": format!("{}/authorize", mock.uri()),
            "token_endpoint": format!("{}/token", mock.uri()),
            "registration_endpoint": format!("{}/register", mock.uri()),
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "registered-client",
            "client_secret": "registered-secret",
        })))
        .mount(&mock)
        .await;

    let (_dir, store) = store_with_server(
        "srv",
        OAuthConfig {
            dynamic_registration: Some(DynamicRegistration {
                enabled: true,
                issuer: Some(mock.uri()),
                registration_endpoint: None,
                metadata: None,
                initial_access_token: None,
            }),
            ..Default::default()
        },
    );
    let coordinator = coordinator(store.clone());

    coordinator.register_client("srv").await.unwrap();

    let persisted = store.load_original().unwrap();
    let oauth = persisted.mcp_servers["srv"].oauth.clone().unwrap();
    assert_eq!(oauth.client_id.as_deref(), Some("registered-client"));
    assert_eq!(oauth.client_secret.as_deref(), Some("registered-secret"));
    assert_eq!(
        oauth.authorization_endpoint.as_deref(),
        Some(format!("{}/authorize", mock.uri()).as_str())
    );
}
