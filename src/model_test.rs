use super::*;

#[test]
fn test_qualify_and_split() {
    let qualified = qualify("github", "create_issue", "::");
    assert_eq!(qualified, "github::create_issue");
    assert_eq!(
        split_qualified(&qualified, "::"),
        Some(("github", "create_issue"))
    );
}

#[test]
fn test_split_at_first_separator_only() {
    // A tool name may itself contain the separator; the first occurrence wins.
    assert_eq!(
        split_qualified("srv::ns::tool", "::"),
        Some(("srv", "ns::tool"))
    );
}

#[test]
fn test_split_without_separator() {
    assert_eq!(split_qualified("plainname", "::"), None);
}

#[test]
fn test_scope_predicates() {
    assert!(RoutingScope::SmartGlobal.is_smart());
    assert!(RoutingScope::SmartGroup("g".to_string()).is_smart());
    assert!(!RoutingScope::Global.is_smart());
    assert_eq!(
        RoutingScope::SmartGroup("g".to_string()).group_id(),
        Some("g")
    );
    assert_eq!(RoutingScope::Server("s".to_string()).group_id(), None);
}

#[test]
fn test_request_context_headers() {
    let mut headers = axum::http::HeaderMap::new();
    headers.insert("X-Api-Key", "secret".parse().unwrap());
    headers.append("Accept", "application/json".parse().unwrap());
    headers.append("Accept", "text/event-stream".parse().unwrap());

    let ctx = RequestContext::new("sess", RoutingScope::Global).with_http_headers(&headers);

    assert_eq!(ctx.header("x-api-key"), Some("secret"));
    assert_eq!(ctx.header("X-API-KEY"), Some("secret"));
    assert_eq!(
        ctx.header("accept"),
        Some("application/json, text/event-stream")
    );
    assert_eq!(ctx.header("missing"), None);
}

#[test]
fn test_upstream_status_serialization() {
    assert_eq!(
        serde_json::to_string(&UpstreamStatus::OauthRequired).unwrap(),
        "\"oauth_required\""
    );
    assert_eq!(UpstreamStatus::Connected.to_string(), "connected");
}
