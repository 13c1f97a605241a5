use super::*;
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_expand_env_braced_and_bare() {
    unsafe {
        std::env::set_var("MCPHUB_TEST_BRACED", "braced-value");
        std::env::set_var("MCPHUB_TEST_BARE", "bare-value");
    }
    assert_eq!(expand_env_str("${MCPHUB_TEST_BRACED}"), "braced-value");
    assert_eq!(expand_env_str("$MCPHUB_TEST_BARE"), "bare-value");
    assert_eq!(
        expand_env_str("pre-${MCPHUB_TEST_BRACED}-post"),
        "pre-braced-value-post"
    );
}

#[test]
fn test_expand_env_unset_is_empty() {
    unsafe {
        std::env::remove_var("MCPHUB_TEST_UNSET");
    }
    assert_eq!(expand_env_str("${MCPHUB_TEST_UNSET}"), "");
    assert_eq!(expand_env_str("x$MCPHUB_TEST_UNSET!"), "x!");
}

#[test]
fn test_expand_env_ignores_lowercase_names() {
    // Only [A-Z_][A-Z0-9_]* is a variable reference.
    assert_eq!(expand_env_str("$path"), "$path");
    assert_eq!(expand_env_str("${not_a_var}"), "${not_a_var}");
}

#[test]
fn test_expand_env_value_recursive() {
    unsafe {
        std::env::set_var("CONTEXT7_API_KEY", "ctx7sk-abc");
    }
    let mut value = json!({
        "headers": { "CONTEXT7_API_KEY": "${CONTEXT7_API_KEY}" },
        "timeout": 60000,
        "nested": [ { "flag": true, "key": "$CONTEXT7_API_KEY" }, null ]
    });
    expand_env_value(&mut value);

    assert_eq!(value["headers"]["CONTEXT7_API_KEY"], "ctx7sk-abc");
    assert_eq!(value["timeout"], 60000);
    assert_eq!(value["nested"][0]["flag"], true);
    assert_eq!(value["nested"][0]["key"], "ctx7sk-abc");
    assert!(value["nested"][1].is_null());
}

#[test]
fn test_server_spec_tagged_parsing() {
    let doc = json!({
        "mcpServers": {
            "fetcher": {
                "type": "stdio",
                "command": "uvx",
                "args": ["mcp-server-fetch"],
                "env": { "DEBUG": "1" }
            },
            "remote": {
                "type": "sse",
                "url": "https://example.com/sse",
                "headers": { "Authorization": "Bearer tok" }
            },
            "streaming": {
                "type": "streamable-http",
                "url": "https://example.com/mcp"
            },
            "petstore": {
                "type": "openapi",
                "openapi": { "url": "https://example.com/openapi.json" }
            }
        }
    });

    let settings: Settings = serde_json::from_value(doc).unwrap();
    assert!(matches!(
        settings.mcp_servers["fetcher"].spec,
        ServerSpec::Stdio { .. }
    ));
    assert!(matches!(
        settings.mcp_servers["remote"].spec,
        ServerSpec::Sse { .. }
    ));
    assert!(matches!(
        settings.mcp_servers["streaming"].spec,
        ServerSpec::StreamableHttp { .. }
    ));
    assert!(matches!(
        settings.mcp_servers["petstore"].spec,
        ServerSpec::Openapi { .. }
    ));
    assert!(settings.mcp_servers["fetcher"].is_enabled());
}

#[test]
fn test_group_member_forms() {
    let group: GroupConfig = serde_json::from_value(json!({
        "id": "dev",
        "name": "Development",
        "members": [
            "server1",
            { "name": "server2", "tools": "all" },
            { "name": "server3", "tools": ["alpha", "beta"] }
        ]
    }))
    .unwrap();

    assert_eq!(group.server_names(), vec!["server1", "server2", "server3"]);
    assert!(group.member("server1").unwrap().allows_tool("anything"));
    assert!(group.member("server2").unwrap().allows_tool("anything"));
    assert!(group.member("server3").unwrap().allows_tool("alpha"));
    assert!(!group.member("server3").unwrap().allows_tool("gamma"));
    assert!(group.member("missing").is_none());
}

#[test]
fn test_find_group_by_id_and_name() {
    let mut settings = Settings::default();
    settings.groups.insert(
        "g1".to_string(),
        GroupConfig {
            id: "g1".to_string(),
            name: "tools".to_string(),
            description: None,
            members: vec![],
        },
    );

    assert!(settings.find_group("g1").is_some());
    assert!(settings.find_group("tools").is_some());

    settings.system_config.routing.enable_group_name_route = false;
    assert!(settings.find_group("g1").is_some());
    assert!(settings.find_group("tools").is_none());
}

#[test]
fn test_system_config_for_user_override() {
    let mut settings = Settings::default();
    settings.users.push(UserConfig {
        username: "admin".to_string(),
        password_hash: "h".to_string(),
        is_admin: true,
    });
    settings.users.push(UserConfig {
        username: "dev".to_string(),
        password_hash: "h".to_string(),
        is_admin: false,
    });
    let mut override_cfg = SystemConfig::default();
    override_cfg.routing.enable_global_route = false;
    settings
        .user_configs
        .insert("dev".to_string(), override_cfg);

    assert!(settings.system_config_for(None).routing.enable_global_route);
    assert!(
        settings
            .system_config_for(Some("admin"))
            .routing
            .enable_global_route
    );
    assert!(
        !settings
            .system_config_for(Some("dev"))
            .routing
            .enable_global_route
    );
}

#[test]
fn test_validate_bearer_auth_requires_key() {
    let mut settings = Settings::default();
    settings.system_config.routing.enable_bearer_auth = true;
    assert!(settings.validate().is_err());

    settings.system_config.routing.bearer_auth_key = "k".to_string();
    assert!(settings.validate().is_ok());
}

#[test]
fn test_validate_stdio_requires_command() {
    let mut settings = Settings::default();
    settings.mcp_servers.insert(
        "bad".to_string(),
        ServerConfig {
            spec: ServerSpec::Stdio {
                command: String::new(),
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
    assert!(settings.validate().is_err());
}

#[test]
fn test_seed_admin_when_users_empty() {
    let mut settings = Settings::default();
    settings.ensure_seed_admin();
    assert_eq!(settings.users.len(), 1);
    assert!(settings.users[0].is_admin);
    assert_eq!(settings.users[0].username, "admin");

    // Seeding is idempotent and never duplicates.
    settings.ensure_seed_admin();
    assert_eq!(settings.users.len(), 1);
}

#[test]
fn test_store_missing_file_synthesizes_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp_settings.json");
    let store = SettingsStore::discover(Some(path.clone())).unwrap();

    let settings = store.settings();
    assert!(settings.mcp_servers.is_empty());
    assert_eq!(settings.users.len(), 1);
    assert!(!path.exists());
}

#[test]
fn test_store_parse_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp_settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(SettingsStore::discover(Some(path)).is_err());
}

#[test]
fn test_store_save_and_original_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp_settings.json");
    let store = SettingsStore::discover(Some(path)).unwrap();

    let doc: Settings = serde_json::from_value(json!({
        "mcpServers": {
            "fetcher": { "type": "stdio", "command": "uvx", "args": ["mcp-server-fetch"] }
        },
        "groups": {
            "dev": { "id": "dev", "name": "Development", "members": ["fetcher"] }
        }
    }))
    .unwrap();
    store.save(&doc).unwrap();

    // LoadOriginal . Save . LoadOriginal is identity on the canonical form.
    let first = store.load_original().unwrap();
    store.save(&first).unwrap();
    let second = store.load_original().unwrap();
    assert_eq!(
        canonical(&serde_json::to_value(&first).unwrap()),
        canonical(&serde_json::to_value(&second).unwrap())
    );
}

#[test]
fn test_save_expands_snapshot_but_not_disk() {
    unsafe {
        std::env::set_var("MCPHUB_TEST_TOKEN", "tok-123");
    }
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp_settings.json");
    let store = SettingsStore::discover(Some(path.clone())).unwrap();

    let doc: Settings = serde_json::from_value(json!({
        "mcpServers": {
            "remote": {
                "type": "sse",
                "url": "https://example.com/sse",
                "headers": { "Authorization": "Bearer ${MCPHUB_TEST_TOKEN}" }
            }
        }
    }))
    .unwrap();
    store.save(&doc).unwrap();

    // The snapshot readers see is expanded...
    let snapshot = store.settings();
    let ServerSpec::Sse { headers, .. } = &snapshot.mcp_servers["remote"].spec else {
        panic!("expected sse spec");
    };
    assert_eq!(headers["Authorization"], "Bearer tok-123");

    // ...while the persisted document keeps the reference.
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("${MCPHUB_TEST_TOKEN}"));
}

#[test]
fn test_subscribe_sees_generation_bump() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp_settings.json");
    let store = SettingsStore::discover(Some(path)).unwrap();

    let rx = store.subscribe();
    let before = *rx.borrow();
    store.save(&Settings::default()).unwrap();
    assert!(*rx.borrow() > before);
}

#[test]
fn test_update_mutates_raw_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp_settings.json");
    let store = SettingsStore::discover(Some(path)).unwrap();
    store.save(&Settings::default()).unwrap();

    store
        .update(|doc| {
            doc.mcp_servers.insert(
                "added".to_string(),
                ServerConfig {
                    spec: ServerSpec::Sse {
                        url: "https://example.com/sse".to_string(),
                        headers: HashMap::new(),
                    },
                    enabled: None,
                    options: None,
                    tools: HashMap::new(),
                    prompts: HashMap::new(),
                    oauth: None,
                },
            );
            Ok(())
        })
        .unwrap();

    assert!(store.load_original().unwrap().mcp_servers.contains_key("added"));
    assert!(store.settings().mcp_servers.contains_key("added"));
}

#[test]
fn test_resolve_path_env_dir() {
    let dir = TempDir::new().unwrap();
    unsafe {
        std::env::set_var(constants::ENV_SETTINGS_PATH, dir.path());
    }
    let resolved = SettingsStore::resolve_path(None);
    unsafe {
        std::env::remove_var(constants::ENV_SETTINGS_PATH);
    }
    assert_eq!(resolved, dir.path().join(constants::SETTINGS_FILE_NAME));
}

#[test]
fn test_oauth_config_debug_redacts_secrets() {
    let cfg = OAuthConfig {
        client_id: Some("client".to_string()),
        client_secret: Some("hunter2".to_string()),
        access_token: Some("at-secret".to_string()),
        refresh_token: Some("rt-secret".to_string()),
        ..Default::default()
    };
    let rendered = format!("{:?}", cfg);
    assert!(rendered.contains("client"));
    assert!(!rendered.contains("hunter2"));
    assert!(!rendered.contains("at-secret"));
    assert!(!rendered.contains("rt-secret"));
}

fn canonical(value: &serde_json::Value) -> String {
    // serde_json's BTreeMap-free Value keeps insertion order; re-serialize
    // through a sorted representation for comparison.
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted: Vec<_> = map.iter().collect();
                sorted.sort_by_key(|(k, _)| k.clone());
                serde_json::Value::Object(
                    sorted
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sort(v)))
                        .collect(),
                )
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
