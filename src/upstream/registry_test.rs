use super::*;
use crate::config::{ItemOverride, OAuthConfig, ServerOptions};

fn stdio_config(command: &str) -> ServerConfig {
    ServerConfig {
        spec: ServerSpec::Stdio {
            command: command.to_string(),
            args: vec![],
            env: HashMap::new(),
        },
        enabled: None,
        options: None,
        tools: HashMap::new(),
        prompts: HashMap::new(),
        oauth: None,
    }
}

fn test_client(config: ServerConfig) -> Arc<UpstreamClient> {
    let (events, _) = broadcast::channel(16);
    UpstreamClient::new("srv".to_string(), config, events)
}

#[test]
fn test_material_change_on_spec() {
    let old = stdio_config("uvx");
    let new = stdio_config("npx");
    assert!(material_change(&old, &new));
    assert!(!material_change(&old, &stdio_config("uvx")));
}

#[test]
fn test_material_change_on_oauth_and_options() {
    let old = stdio_config("uvx");

    let mut with_oauth = stdio_config("uvx");
    with_oauth.oauth = Some(OAuthConfig {
        access_token: Some("tok".to_string()),
        ..Default::default()
    });
    assert!(material_change(&old, &with_oauth));

    let mut with_options = stdio_config("uvx");
    with_options.options = Some(ServerOptions {
        timeout_ms: Some(1000),
        ..Default::default()
    });
    assert!(material_change(&old, &with_options));
}

#[test]
fn test_pending_authorization_is_not_material() {
    // Bookkeeping fields written mid-flow must not bounce the transport.
    let old = stdio_config("uvx");
    let mut pending = stdio_config("uvx");
    pending.oauth = Some(OAuthConfig {
        client_id: Some("client-1".to_string()),
        refresh_token: Some("rt".to_string()),
        pending_authorization: Some(crate::config::PendingAuthorization {
            authorization_url: "https://issuer.example.com/authorize?state=s".to_string(),
            state: "s".to_string(),
            code_verifier: "v".to_string(),
            created_at: chrono::Utc::now(),
        }),
        ..Default::default()
    });
    assert!(!material_change(&old, &pending));
}

#[test]
fn test_toggle_is_not_material() {
    let old = stdio_config("uvx");
    let mut toggled = stdio_config("uvx");
    toggled.tools.insert(
        "fetch".to_string(),
        ItemOverride {
            enabled: false,
            description: None,
        },
    );
    assert!(!material_change(&old, &toggled));
}

#[test]
fn test_with_bearer_adds_authorization() {
    let mut config = stdio_config("uvx");
    config.oauth = Some(OAuthConfig {
        access_token: Some("tok-1".to_string()),
        ..Default::default()
    });
    let headers = with_bearer(&HashMap::new(), &config);
    assert_eq!(headers["Authorization"], "Bearer tok-1");
}

#[test]
fn test_with_bearer_respects_existing_header() {
    let mut config = stdio_config("uvx");
    config.oauth = Some(OAuthConfig {
        access_token: Some("tok-1".to_string()),
        ..Default::default()
    });
    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), "Basic abc".to_string());
    let merged = with_bearer(&headers, &config);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged["authorization"], "Basic abc");
}

#[test]
fn test_effective_tools_filters_and_overrides() {
    let mut config = stdio_config("uvx");
    config.tools.insert(
        "disabled_tool".to_string(),
        ItemOverride {
            enabled: false,
            description: None,
        },
    );
    config.tools.insert(
        "renamed_tool".to_string(),
        ItemOverride {
            enabled: true,
            description: Some("Custom description".to_string()),
        },
    );

    let client = test_client(config);
    *client.tools.write() = vec![
        ToolInfo {
            name: "disabled_tool".to_string(),
            description: Some("original".to_string()),
            input_schema: json!({"type": "object"}),
        },
        ToolInfo {
            name: "renamed_tool".to_string(),
            description: Some("original".to_string()),
            input_schema: json!({"type": "object"}),
        },
        ToolInfo {
            name: "plain_tool".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        },
    ];

    let tools = client.effective_tools();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["renamed_tool", "plain_tool"]);
    assert_eq!(
        tools[0].description.as_deref(),
        Some("Custom description")
    );
    assert!(client.has_tool("plain_tool"));
    assert!(!client.has_tool("disabled_tool"));
}

#[test]
fn test_unavailable_error_carries_authorization_url() {
    let mut config = stdio_config("uvx");
    config.oauth = Some(OAuthConfig {
        pending_authorization: Some(crate::config::PendingAuthorization {
            authorization_url: "https://issuer.example.com/authorize?state=s".to_string(),
            state: "s".to_string(),
            code_verifier: "v".to_string(),
            created_at: chrono::Utc::now(),
        }),
        ..Default::default()
    });

    let client = test_client(config);
    client.set_status(UpstreamStatus::OauthRequired);

    match client.unavailable_error() {
        McpHubError::AuthRequired {
            server,
            authorization_url,
        } => {
            assert_eq!(server, "srv");
            assert_eq!(
                authorization_url.as_deref(),
                Some("https://issuer.example.com/authorize?state=s")
            );
        }
        other => panic!("expected AuthRequired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_fails_when_not_connected() {
    let client = test_client(stdio_config("uvx"));
    client.set_status(UpstreamStatus::Disconnected);

    let err = client
        .request("tools/list", json!({}), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, McpHubError::UpstreamUnavailable { .. }));
}
