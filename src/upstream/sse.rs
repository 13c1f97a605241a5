//! SSE upstream transport
//!
//! Opens a long-lived one-way event stream from the configured URL and
//! POSTs outbound frames to the messages endpoint announced by the server's
//! initial `endpoint` event. Responses and notifications arrive as
//! `message` events on the stream.

use super::UpstreamEvent;
use super::transport::{
    RequestRouter, UpstreamTransport, await_response, initialize_params,
};
use crate::error::TransportError;
use crate::model::RequestContext;
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, methods};
use crate::{McpHubError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

/// How long to wait for the server's `endpoint` event before giving up
const ENDPOINT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SseTransport {
    http: reqwest::Client,
    messages_url: String,
    headers: HashMap<String, String>,
    router: Arc<RequestRouter>,
    closed: CancellationToken,
}

impl SseTransport {
    /// Open the event stream and wait for endpoint discovery.
    pub async fn connect(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        http: reqwest::Client,
        events: broadcast::Sender<UpstreamEvent>,
    ) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| TransportError::Handshake(format!("invalid url '{}': {}", url, e)))?;

        let mut request = http
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(TransportError::Reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()).into());
        }

        let router = RequestRouter::new(name.to_string(), events);
        let closed = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        {
            let router = router.clone();
            let closed = closed.clone();
            let server = name.to_string();
            let mut endpoint_tx = Some(endpoint_tx);
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                let mut parser = SseParser::new();
                loop {
                    tokio::select! {
                        _ = closed.cancelled() => break,
                        chunk = stream.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for event in parser.feed(&bytes) {
                                    match event.name.as_str() {
                                        "endpoint" => {
                                            if let Some(tx) = endpoint_tx.take() {
                                                let _ = tx.send(event.data);
                                            }
                                        }
                                        // Unnamed events default to "message".
                                        "message" | "" => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                                            Ok(message) => router.route(message),
                                            Err(e) => tracing::warn!(
                                                "upstream '{}': unparseable SSE frame: {}",
                                                server,
                                                e
                                            ),
                                        },
                                        other => tracing::debug!(
                                            "upstream '{}': ignoring SSE event '{}'",
                                            server,
                                            other
                                        ),
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!("upstream '{}': SSE stream error: {}", server, e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
                router.fail_all("SSE stream closed");
                closed.cancel();
            });
        }

        let endpoint = tokio::time::timeout(ENDPOINT_DISCOVERY_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| TransportError::Handshake("no endpoint event received".to_string()))?
            .map_err(|_| TransportError::Handshake("stream closed before endpoint".to_string()))?;

        let messages_url = base
            .join(&endpoint)
            .map_err(|e| TransportError::Handshake(format!("bad endpoint '{}': {}", endpoint, e)))?
            .to_string();

        tracing::debug!("upstream '{}': messages endpoint {}", name, messages_url);

        Ok(Self {
            http,
            messages_url,
            headers: headers.clone(),
            router,
            closed,
        })
    }

    async fn post_frame(&self, body: String) -> Result<()> {
        let mut request = self
            .http
            .post(&self.messages_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let response = request.send().await.map_err(TransportError::Reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamTransport for SseTransport {
    async fn initialize(&self) -> Result<Value> {
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
        Ok(result)
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
        let body = serde_json::to_string(&request)?;
        if let Err(e) = self.post_frame(body).await {
            self.router.discard(&id);
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
        self.post_frame(serde_json::to_string(&notification)?).await
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn shutdown(&self) {
        self.closed.cancel();
        self.router.fail_all("transport shut down");
    }
}

/// One parsed server-sent event
#[derive(Debug, PartialEq)]
pub(crate) struct SseEvent {
    pub name: String,
    pub data: String,
}

/// Incremental SSE frame parser.
///
/// Buffers partial lines across chunks; multi-line `data:` fields are
/// joined with newlines per the SSE specification; `:` comment lines are
/// skipped.
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    event_name: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            event_name: String::new(),
            data_lines: Vec::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if !self.data_lines.is_empty() || !self.event_name.is_empty() {
                    events.push(SseEvent {
                        name: std::mem::take(&mut self.event_name),
                        data: self.data_lines.join("\n"),
                    });
                    self.data_lines.clear();
                }
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event_name = rest.trim_start().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if line.starts_with(':') {
                // keepalive comment
            } else {
                tracing::trace!("ignoring SSE field: {}", line);
            }
        }

        events
    }
}
