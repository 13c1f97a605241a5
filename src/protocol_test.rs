use super::*;

#[test]
fn test_request_id_roundtrip() {
    let num: RequestId = serde_json::from_str("7").unwrap();
    assert_eq!(num, RequestId::Number(7));
    assert_eq!(serde_json::to_string(&num).unwrap(), "7");

    let s: RequestId = serde_json::from_str("\"abc\"").unwrap();
    assert_eq!(s, RequestId::String("abc".to_string()));
    assert_eq!(serde_json::to_string(&s).unwrap(), "\"abc\"");
}

#[test]
fn test_message_classification() {
    let req: JsonRpcMessage =
        serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
    assert!(req.is_request());
    assert!(!req.is_notification());

    let notif: JsonRpcMessage =
        serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
    assert!(notif.is_notification());
    assert!(!notif.is_request());

    let resp: JsonRpcMessage =
        serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
    assert!(resp.is_response());
}

#[test]
fn test_tool_info_input_schema_rename() {
    let tool: ToolInfo = serde_json::from_str(
        r#"{"name":"fetch","description":"Fetch a URL","inputSchema":{"type":"object","properties":{"url":{"type":"string"}}}}"#,
    )
    .unwrap();
    assert_eq!(tool.name, "fetch");
    assert_eq!(tool.input_schema["type"], "object");

    let out = serde_json::to_value(&tool).unwrap();
    assert!(out.get("inputSchema").is_some());
    assert!(out.get("input_schema").is_none());
}

#[test]
fn test_tool_info_missing_schema_defaults_to_object() {
    let tool: ToolInfo = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
    assert_eq!(tool.input_schema, serde_json::json!({"type": "object"}));
}

#[test]
fn test_tool_error_shape() {
    let result = tool_error("Query parameter is required");
    assert_eq!(result["isError"], true);
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["content"][0]["text"], "Query parameter is required");
}

#[test]
fn test_hub_initialize_result() {
    let result = hub_initialize_result();
    assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(
        result["protocolVersion"],
        crate::constants::MCP_PROTOCOL_VERSION
    );
}

#[test]
fn test_failure_response_keeps_null_id() {
    let resp = JsonRpcResponse::failure(
        None,
        RpcError {
            code: crate::constants::RPC_PARSE_ERROR,
            message: "parse error".to_string(),
            data: None,
        },
    );
    let out = serde_json::to_value(&resp).unwrap();
    assert!(out["id"].is_null());
    assert_eq!(out["error"]["code"], crate::constants::RPC_PARSE_ERROR);
}
