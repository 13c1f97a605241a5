//! Streamable-HTTP upstream transport
//!
//! Each POST carries one JSON-RPC frame; the response body is either plain
//! JSON or a chunked event stream holding the matching response (and any
//! interleaved notifications). The `mcp-session-id` response header from
//! the initialize exchange establishes the session and is echoed on every
//! subsequent request. A GET with the same header opens the server-push
//! stream; DELETE closes the session.

use super::UpstreamEvent;
use super::sse::SseParser;
use super::transport::{
    RequestRouter, UpstreamTransport, await_response, initialize_params,
};
use crate::constants::MCP_SESSION_ID_HEADER;
use crate::error::TransportError;
use crate::model::RequestContext;
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, methods};
use crate::{McpHubError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub struct StreamableHttpTransport {
    http: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
    router: Arc<RequestRouter>,
    closed: CancellationToken,
}

impl StreamableHttpTransport {
    pub fn new(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        http: reqwest::Client,
        events: broadcast::Sender<UpstreamEvent>,
    ) -> Self {
        Self {
            http,
            url: url.to_string(),
            headers: headers.clone(),
            session_id: RwLock::new(None),
            router: RequestRouter::new(name.to_string(), events),
            closed: CancellationToken::new(),
        }
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(session) = self.session_id.read().as_deref() {
            request = request.header(MCP_SESSION_ID_HEADER, session);
        }
        request
    }

    /// POST one frame and feed whatever comes back into the router.
    async fn post_message(&self, body: Value) -> Result<()> {
        let request = self
            .apply_headers(self.http.post(&self.url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::ACCEPT,
                "application/json, text/event-stream",
            )
            .json(&body);

        let response = request.send().await.map_err(TransportError::Reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()).into());
        }

        // The initialize response carries the session id.
        if let Some(session) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            // Drain the body stream in the background; the caller awaits its
            // pending slot, completed when the matching frame is routed.
            let router = self.router.clone();
            let closed = self.closed.clone();
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                let mut parser = SseParser::new();
                loop {
                    tokio::select! {
                        _ = closed.cancelled() => break,
                        chunk = stream.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for event in parser.feed(&bytes) {
                                    route_frame(&router, &event.data);
                                }
                            }
                            Some(Err(e)) => {
                                tracing::debug!("response stream error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            });
        } else {
            let text = response.text().await.map_err(TransportError::Reqwest)?;
            if !text.trim().is_empty() {
                route_frame(&self.router, &text);
            }
        }

        Ok(())
    }

    /// Open the server-push stream. Optional: upstreams may not support it.
    fn spawn_push_stream(self: &Arc<Self>) {
        let transport = self.clone();
        tokio::spawn(async move {
            let request = transport
                .apply_headers(transport.http.get(&transport.url))
                .header(reqwest::header::ACCEPT, "text/event-stream");
            let response = match request.send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::debug!(
                        "upstream '{}': push stream unsupported ({})",
                        transport.router.server(),
                        r.status()
                    );
                    return;
                }
                Err(e) => {
                    tracing::debug!(
                        "upstream '{}': push stream failed: {}",
                        transport.router.server(),
                        e
                    );
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            loop {
                tokio::select! {
                    _ = transport.closed.cancelled() => break,
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            for event in parser.feed(&bytes) {
                                route_frame(&transport.router, &event.data);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!("push stream error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        });
    }

    /// Initialize on an `Arc` so the push stream can be spawned afterwards.
    pub async fn handshake(self: &Arc<Self>) -> Result<Value> {
        let result = self
            .request(
                methods::INITIALIZE,
                initialize_params(),
                None,
                CancellationToken::new(),
            )
            .await?;
        self.notify(methods::NOTIFICATION_INITIALIZED, Value::Null)
            .await?;
        self.spawn_push_stream();
        Ok(result)
    }
}

fn route_frame(router: &Arc<RequestRouter>, raw: &str) {
    match serde_json::from_str::<JsonRpcMessage>(raw) {
        Ok(message) => router.route(message),
        Err(e) => tracing::warn!(
            "upstream '{}': unparseable frame: {}",
            router.server(),
            e
        ),
    }
}

#[async_trait]
impl UpstreamTransport for StreamableHttpTransport {
    async fn initialize(&self) -> Result<Value> {
        // Handshake must go through the Arc wrapper to start the push
        // stream; the registry calls `handshake` directly.
        Err(McpHubError::internal(
            "StreamableHttpTransport::initialize must go through handshake()",
        ))
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        _ctx: Option<&RequestContext>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        let (id, rx) = self.router.register();
        let request = JsonRpcRequest::new(id.clone(), method, Some(params));
        if let Err(e) = self.post_message(serde_json::to_value(&request)?).await {
            self.router.discard(&id);
            // A rejected session id means the server dropped us.
            if matches!(
                e,
                McpHubError::Transport(TransportError::Status(404))
            ) {
                self.closed.cancel();
            }
            return Err(e);
        }
        let result = await_response(rx, &cancel, &self.closed).await;
        if matches!(result, Err(McpHubError::Cancelled)) {
            self.router.discard(&id);
        }
        result
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let params = if params.is_null() { None } else { Some(params) };
        let notification = JsonRpcNotification::new(method, params);
        self.post_message(serde_json::to_value(&notification)?).await
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn shutdown(&self) {
        self.closed.cancel();
        self.router.fail_all("transport shut down");

        let session = self.session_id.read().clone();
        if session.is_some() {
            let request = self.apply_headers(self.http.delete(&self.url));
            if let Err(e) = request.send().await {
                tracing::debug!(
                    "upstream '{}': session delete failed: {}",
                    self.router.server(),
                    e
                );
            }
        }
    }
}
