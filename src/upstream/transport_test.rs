use super::*;
use crate::protocol::RpcError;

fn test_router() -> Arc<RequestRouter> {
    let (events, _) = broadcast::channel(16);
    RequestRouter::new("test".to_string(), events)
}

#[tokio::test]
async fn test_router_completes_pending_by_id() {
    let router = test_router();
    let (id, rx) = router.register();

    let frame = format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"ok":true}}}}"#, id);
    let message: JsonRpcMessage = serde_json::from_str(&frame).unwrap();
    router.route(message);

    let response = rx.await.unwrap();
    assert_eq!(response.result.unwrap()["ok"], true);
}

#[tokio::test]
async fn test_router_ids_are_sequential() {
    let router = test_router();
    let (first, _rx1) = router.register();
    let (second, _rx2) = router.register();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_router_forwards_notifications() {
    let (events, mut rx) = broadcast::channel(16);
    let router = RequestRouter::new("test".to_string(), events);

    let message: JsonRpcMessage = serde_json::from_str(
        r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":5}}"#,
    )
    .unwrap();
    router.route(message);

    match rx.recv().await.unwrap() {
        UpstreamEvent::Notification {
            server,
            notification,
        } => {
            assert_eq!(server, "test");
            assert_eq!(notification.method, "notifications/progress");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_router_fail_all() {
    let router = test_router();
    let (_, rx) = router.register();

    router.fail_all("transport gone");

    let response = rx.await.unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, crate::constants::RPC_UPSTREAM_UNAVAILABLE);
    assert_eq!(error.message, "transport gone");
}

#[tokio::test]
async fn test_await_response_cancellation() {
    let router = test_router();
    let (_, rx) = router.register();

    let cancel = CancellationToken::new();
    let closed = CancellationToken::new();
    cancel.cancel();

    let result = await_response(rx, &cancel, &closed).await;
    assert!(matches!(result, Err(McpHubError::Cancelled)));
}

#[test]
fn test_unwrap_response_forwards_rpc_error() {
    let response = JsonRpcResponse::failure(
        Some(RequestId::Number(1)),
        RpcError {
            code: -32601,
            message: "no such method".to_string(),
            data: None,
        },
    );
    match unwrap_response(response) {
        Err(McpHubError::Rpc(error)) => assert_eq!(error.code, -32601),
        other => panic!("expected rpc error, got {:?}", other),
    }
}

#[test]
fn test_encode_frame_is_lf_terminated() {
    let request = JsonRpcRequest::new(RequestId::Number(1), "ping", None);
    let frame = encode_frame(&request).unwrap();
    assert!(frame.ends_with('\n'));
    assert!(!frame[..frame.len() - 1].contains('\n'));
}
