use super::*;
use crate::config::{GroupConfig, ServerConfig, ServerSpec};
use tempfile::TempDir;

fn settings_fixture() -> Settings {
    let mut settings = Settings::default();
    for name in ["server1", "server2", "shared"] {
        settings.mcp_servers.insert(
            name.to_string(),
            ServerConfig {
                spec: ServerSpec::Stdio {
                    command: "true".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
                enabled: None,
                options: None,
                tools: HashMap::new(),
                prompts: HashMap::new(),
                oauth: None,
            },
        );
    }
    settings.groups.insert(
        "test-group".to_string(),
        GroupConfig {
            id: "test-group".to_string(),
            name: "Test Group".to_string(),
            description: None,
            members: vec![
                crate::config::GroupMember::Name("server1".to_string()),
                crate::config::GroupMember::Name("server2".to_string()),
            ],
        },
    );
    // A group whose id collides with a server name.
    settings.groups.insert(
        "shared".to_string(),
        GroupConfig {
            id: "shared".to_string(),
            name: "Shared".to_string(),
            description: None,
            members: vec![crate::config::GroupMember::Name("server1".to_string())],
        },
    );
    settings
}

fn manager_with(settings: Settings) -> (TempDir, Arc<SessionManager>) {
    let dir = TempDir::new().unwrap();
    let store =
        Arc::new(SettingsStore::discover(Some(dir.path().join("mcp_settings.json"))).unwrap());
    store.save(&settings).unwrap();
    (dir, SessionManager::new(store))
}

#[test]
fn test_parse_scope_variants() {
    let settings = settings_fixture();

    assert_eq!(parse_scope(&settings, &[]), Ok(RoutingScope::Global));
    assert_eq!(
        parse_scope(&settings, &["$smart"]),
        Ok(RoutingScope::SmartGlobal)
    );
    assert_eq!(
        parse_scope(&settings, &["$smart", "test-group"]),
        Ok(RoutingScope::SmartGroup("test-group".to_string()))
    );
    assert_eq!(
        parse_scope(&settings, &["test-group"]),
        Ok(RoutingScope::Group("test-group".to_string()))
    );
    assert_eq!(
        parse_scope(&settings, &["server1"]),
        Ok(RoutingScope::Server("server1".to_string()))
    );
    assert_eq!(
        parse_scope(&settings, &["nonexistent"]),
        Err(ScopeError::Unknown("nonexistent".to_string()))
    );
}

#[test]
fn test_parse_scope_group_wins_over_server() {
    let settings = settings_fixture();
    // "shared" names both a group and a server; the group wins.
    assert_eq!(
        parse_scope(&settings, &["shared"]),
        Ok(RoutingScope::Group("shared".to_string()))
    );
}

#[test]
fn test_parse_scope_group_by_name() {
    let mut settings = settings_fixture();
    assert_eq!(
        parse_scope(&settings, &["Test Group"]),
        Ok(RoutingScope::Group("test-group".to_string()))
    );

    settings.system_config.routing.enable_group_name_route = false;
    assert_eq!(
        parse_scope(&settings, &["Test Group"]),
        Err(ScopeError::Unknown("Test Group".to_string()))
    );
}

#[test]
fn test_parse_scope_global_route_disabled() {
    let mut settings = settings_fixture();
    settings.system_config.routing.enable_global_route = false;
    assert_eq!(
        parse_scope(&settings, &[]),
        Err(ScopeError::GlobalRouteDisabled)
    );
    // Explicit scopes still work.
    assert!(parse_scope(&settings, &["server1"]).is_ok());
}

#[test]
fn test_check_auth_bearer() {
    let mut settings = settings_fixture();
    settings.system_config.routing.enable_bearer_auth = true;
    settings.system_config.routing.bearer_auth_key = "k".to_string();

    assert_eq!(check_auth(&settings, None, None), Err(AuthError::Unauthorized));
    assert_eq!(
        check_auth(&settings, None, Some("Bearer wrong")),
        Err(AuthError::Unauthorized)
    );
    assert_eq!(
        check_auth(&settings, None, Some("Basic k")),
        Err(AuthError::Unauthorized)
    );
    assert_eq!(check_auth(&settings, None, Some("Bearer k")), Ok(()));
}

#[test]
fn test_check_auth_skip_overrides_bearer() {
    let mut settings = settings_fixture();
    settings.system_config.routing.enable_bearer_auth = true;
    settings.system_config.routing.bearer_auth_key = "k".to_string();
    settings.system_config.routing.skip_auth = true;

    assert_eq!(check_auth(&settings, None, None), Ok(()));
}

#[test]
fn test_check_auth_user_mount_requires_known_user() {
    let mut settings = settings_fixture();
    settings.ensure_seed_admin();

    assert_eq!(check_auth(&settings, Some("admin"), None), Ok(()));
    assert_eq!(
        check_auth(&settings, Some("ghost"), None),
        Err(AuthError::Unauthorized)
    );
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (_dir, manager) = manager_with(settings_fixture());

    let session = manager.create(RoutingScope::Global, None, SessionTransportKind::Sse);
    let mut rx = session.take_stream().unwrap();
    assert_eq!(manager.len(), 1);
    assert!(Uuid::parse_str(&session.session_id).is_ok());
    // The push stream can only be claimed once.
    assert!(session.take_stream().is_none());

    assert!(session.send_frame(&serde_json::json!({"jsonrpc": "2.0"})));
    assert!(rx.recv().await.is_some());

    manager.remove(&session.session_id);
    assert!(manager.is_empty());
    assert!(session.cancellation().is_cancelled());
    // The push stream drains to closed after removal.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_distinct_session_ids() {
    let (_dir, manager) = manager_with(settings_fixture());
    let first = manager.create(RoutingScope::Global, None, SessionTransportKind::Sse);
    let second = manager.create(RoutingScope::Global, None, SessionTransportKind::Sse);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(manager.len(), 2);
}

#[tokio::test]
async fn test_cancel_request_by_id() {
    let (_dir, manager) = manager_with(settings_fixture());
    let session = manager.create(
        RoutingScope::Global,
        None,
        SessionTransportKind::StreamableHttp,
    );

    let token = session.begin_request(RequestId::Number(7));
    assert!(!token.is_cancelled());
    assert!(session.cancel_request(&RequestId::Number(7)));
    assert!(token.is_cancelled());
    assert!(!session.cancel_request(&RequestId::Number(99)));
}

#[tokio::test]
async fn test_session_close_cancels_inflight() {
    let (_dir, manager) = manager_with(settings_fixture());
    let session = manager.create(
        RoutingScope::Global,
        None,
        SessionTransportKind::StreamableHttp,
    );

    let token = session.begin_request(RequestId::Number(1));
    manager.remove(&session.session_id);
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn test_sessions_including_server() {
    let (_dir, manager) = manager_with(settings_fixture());

    let _global = manager.create(RoutingScope::Global, None, SessionTransportKind::Sse);
    let _grouped = manager.create(
        RoutingScope::Group("test-group".to_string()),
        None,
        SessionTransportKind::Sse,
    );
    let _single = manager.create(
        RoutingScope::Server("server1".to_string()),
        None,
        SessionTransportKind::Sse,
    );

    // server1 is in every scope above.
    assert_eq!(manager.sessions_including("server1").len(), 3);
    // server2 only via global and the group.
    assert_eq!(manager.sessions_including("server2").len(), 2);
    // an unrelated server reaches only the global session.
    assert_eq!(manager.sessions_including("shared").len(), 1);
}

#[test]
fn test_scope_includes() {
    let settings = settings_fixture();
    assert!(scope_includes(&settings, &RoutingScope::Global, "anything"));
    assert!(scope_includes(
        &settings,
        &RoutingScope::Group("test-group".to_string()),
        "server1"
    ));
    assert!(!scope_includes(
        &settings,
        &RoutingScope::Group("test-group".to_string()),
        "shared"
    ));
    assert!(scope_includes(
        &settings,
        &RoutingScope::Server("server1".to_string()),
        "server1"
    ));
    assert!(!scope_includes(
        &settings,
        &RoutingScope::Server("server1".to_string()),
        "server2"
    ));
}
