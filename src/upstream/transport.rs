//! Upstream transport abstraction
//!
//! Every upstream variant (stdio subprocess, SSE, streamable HTTP, OpenAPI
//! wrapper) implements [`UpstreamTransport`]. The trait speaks at the MCP
//! operation level so the OpenAPI wrapper, which has no JSON-RPC wire at
//! all, can synthesize results directly.

use crate::error::TransportError;
use crate::model::RequestContext;
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::{McpHubError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::UpstreamEvent;

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Perform the MCP `initialize` handshake. Returns the upstream's
    /// reported server info and capabilities.
    async fn initialize(&self) -> Result<Value>;

    /// Issue a JSON-RPC request and await its result.
    ///
    /// `ctx` carries the downstream header snapshot; only the OpenAPI
    /// wrapper consumes it (header passthrough). Upstream JSON-RPC errors
    /// surface as [`McpHubError::Rpc`]; wire failures as
    /// [`McpHubError::Transport`].
    async fn request(
        &self,
        method: &str,
        params: Value,
        ctx: Option<&RequestContext>,
        cancel: CancellationToken,
    ) -> Result<Value>;

    /// Send a one-way notification.
    async fn notify(&self, method: &str, params: Value) -> Result<()>;

    /// Token triggered when the transport dies.
    fn closed(&self) -> CancellationToken;

    /// Graceful shutdown. Idempotent.
    async fn shutdown(&self);
}

/// Correlates JSON-RPC responses to in-flight requests by id and fans
/// upstream-initiated notifications out to the registry event channel.
///
/// Shared by the stdio and SSE transports, whose responses arrive on a
/// single reader task.
pub struct RequestRouter {
    server: String,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    events: broadcast::Sender<UpstreamEvent>,
}

impl RequestRouter {
    pub fn new(server: String, events: broadcast::Sender<UpstreamEvent>) -> Arc<Self> {
        Arc::new(Self {
            server,
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Allocate the next request id and register a completion slot for it.
    pub fn register(&self) -> (RequestId, oneshot::Receiver<JsonRpcResponse>) {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        (id, rx)
    }

    /// Drop the completion slot for an abandoned request.
    pub fn discard(&self, id: &RequestId) {
        self.pending.lock().remove(id);
    }

    /// Route one inbound frame: responses complete their pending slot,
    /// notifications go to the event channel, requests from the upstream
    /// are logged and dropped (the hub does not serve upstreams).
    pub fn route(&self, message: JsonRpcMessage) {
        if message.is_response() {
            let Some(id) = message.id.clone() else {
                tracing::warn!("upstream '{}' sent a response without id", self.server);
                return;
            };
            if let Some(slot) = self.pending.lock().remove(&id) {
                let _ = slot.send(message.into_response());
            } else {
                tracing::debug!(
                    "upstream '{}' response for unknown id {}",
                    self.server,
                    id
                );
            }
        } else if message.is_notification() {
            let notification = JsonRpcNotification::new(
                message.method.unwrap_or_default(),
                message.params,
            );
            let _ = self.events.send(UpstreamEvent::Notification {
                server: self.server.clone(),
                notification,
            });
        } else {
            tracing::debug!(
                "upstream '{}' sent a request ({:?}); not supported, dropping",
                self.server,
                message.method
            );
        }
    }

    /// Fail every in-flight request, e.g. when the transport closes.
    pub fn fail_all(&self, reason: &str) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (id, slot) in pending {
            let _ = slot.send(JsonRpcResponse::failure(
                Some(id),
                crate::protocol::RpcError {
                    code: crate::constants::RPC_UPSTREAM_UNAVAILABLE,
                    message: reason.to_string(),
                    data: None,
                },
            ));
        }
    }
}

/// Await a routed response, honoring cancellation and transport death.
pub async fn await_response(
    rx: oneshot::Receiver<JsonRpcResponse>,
    cancel: &CancellationToken,
    closed: &CancellationToken,
) -> Result<Value> {
    tokio::select! {
        response = rx => match response {
            Ok(response) => unwrap_response(response),
            Err(_) => Err(TransportError::Closed.into()),
        },
        _ = cancel.cancelled() => Err(McpHubError::Cancelled),
        _ = closed.cancelled() => Err(TransportError::Closed.into()),
    }
}

/// Turn a JSON-RPC response into a result value or forwarded error.
pub fn unwrap_response(response: JsonRpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(McpHubError::Rpc(error));
    }
    response
        .result
        .ok_or_else(|| McpHubError::internal("upstream response had neither result nor error"))
}

/// Build the MCP initialize request parameters the hub sends upstream.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": crate::constants::MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Serialize a request frame with a trailing newline for LF-delimited wires.
pub fn encode_frame(request: &JsonRpcRequest) -> Result<String> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}
