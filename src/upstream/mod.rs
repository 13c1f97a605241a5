//! Upstream client pool
//!
//! One [`UpstreamClient`] per enabled server, owned by the
//! [`UpstreamRegistry`]. The registry creates and destroys clients on
//! settings changes, exposes per-server operations and catalogs, and fans
//! upstream notifications out through a broadcast channel.

pub mod http;
pub mod openapi;
pub mod sse;
pub mod stdio;
pub mod transport;

use crate::config::{ServerConfig, ServerSpec, SettingsStore};
use crate::constants;
use crate::error::TransportError;
use crate::model::{RequestContext, UpstreamStatus};
use crate::oauth::OAuthCoordinator;
use crate::protocol::{JsonRpcNotification, PromptInfo, ResourceInfo, ToolInfo, methods};
use crate::{McpHubError, Result};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use self::http::StreamableHttpTransport;
use self::openapi::OpenApiTransport;
use self::sse::SseTransport;
use self::stdio::StdioTransport;
use self::transport::UpstreamTransport;

/// Events published by the registry and its transports
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// An upstream emitted a notification (progress, list-changed, ...)
    Notification {
        server: String,
        notification: JsonRpcNotification,
    },
    /// A server's effective catalog changed (connect, disconnect, toggle)
    CatalogChanged { server: String },
    /// A server's connection status changed
    StatusChanged {
        server: String,
        status: UpstreamStatus,
    },
}

/// A live upstream client: transport handle, status, and cached catalogs.
///
/// Handles stay valid until the registry replaces or removes them; holders
/// must tolerate a `disconnected` status at any time.
pub struct UpstreamClient {
    pub name: String,
    config: RwLock<ServerConfig>,
    status: RwLock<UpstreamStatus>,
    last_error: RwLock<Option<String>>,
    transport: RwLock<Option<Arc<dyn UpstreamTransport>>>,
    tools: RwLock<Vec<ToolInfo>>,
    prompts: RwLock<Vec<PromptInfo>>,
    resources: RwLock<Vec<ResourceInfo>>,
    lifecycle: CancellationToken,
    events: broadcast::Sender<UpstreamEvent>,
}

impl UpstreamClient {
    fn new(
        name: String,
        config: ServerConfig,
        events: broadcast::Sender<UpstreamEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            config: RwLock::new(config),
            status: RwLock::new(UpstreamStatus::Connecting),
            last_error: RwLock::new(None),
            transport: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            lifecycle: CancellationToken::new(),
            events,
        })
    }

    pub fn status(&self) -> UpstreamStatus {
        *self.status.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn config(&self) -> ServerConfig {
        self.config.read().clone()
    }

    /// Mutable config access for tests that mimic a reconcile pass.
    #[cfg(test)]
    pub fn config_for_tests(&self) -> parking_lot::RwLockWriteGuard<'_, ServerConfig> {
        self.config.write()
    }

    fn set_status(&self, status: UpstreamStatus) {
        *self.status.write() = status;
        let _ = self.events.send(UpstreamEvent::StatusChanged {
            server: self.name.clone(),
            status,
        });
    }

    fn record_error(&self, error: &McpHubError) {
        *self.last_error.write() = Some(error.to_string());
    }

    /// Tools after per-tool enable flags and description overrides
    pub fn effective_tools(&self) -> Vec<ToolInfo> {
        let config = self.config.read();
        self.tools
            .read()
            .iter()
            .filter(|tool| {
                config
                    .tools
                    .get(&tool.name)
                    .map(|o| o.enabled)
                    .unwrap_or(true)
            })
            .map(|tool| {
                let mut tool = tool.clone();
                if let Some(custom) = config
                    .tools
                    .get(&tool.name)
                    .and_then(|o| o.description.clone())
                {
                    tool.description = Some(custom);
                }
                tool
            })
            .collect()
    }

    /// Prompts after per-prompt enable flags and description overrides
    pub fn effective_prompts(&self) -> Vec<PromptInfo> {
        let config = self.config.read();
        self.prompts
            .read()
            .iter()
            .filter(|prompt| {
                config
                    .prompts
                    .get(&prompt.name)
                    .map(|o| o.enabled)
                    .unwrap_or(true)
            })
            .map(|prompt| {
                let mut prompt = prompt.clone();
                if let Some(custom) = config
                    .prompts
                    .get(&prompt.name)
                    .and_then(|o| o.description.clone())
                {
                    prompt.description = Some(custom);
                }
                prompt
            })
            .collect()
    }

    pub fn resources(&self) -> Vec<ResourceInfo> {
        self.resources.read().clone()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.effective_tools().iter().any(|t| t.name == name)
    }

    /// Error describing why this client cannot take requests right now
    fn unavailable_error(&self) -> McpHubError {
        match self.status() {
            UpstreamStatus::OauthRequired => McpHubError::AuthRequired {
                server: self.name.clone(),
                authorization_url: self
                    .config
                    .read()
                    .oauth
                    .as_ref()
                    .and_then(|o| o.pending_authorization.as_ref())
                    .map(|p| p.authorization_url.clone()),
            },
            _ => McpHubError::unavailable(
                &self.name,
                self.last_error().unwrap_or_else(|| "not connected".to_string()),
            ),
        }
    }

    /// Issue a request bounded by the server's configured timeouts.
    ///
    /// `resetTimeoutOnProgress` extends the deadline on every progress
    /// notification from this server; `maxTotalTimeoutMs` is a hard
    /// ceiling regardless of progress.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        ctx: Option<&RequestContext>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or_else(|| self.unavailable_error())?;
        if self.status() != UpstreamStatus::Connected {
            return Err(self.unavailable_error());
        }

        let options = self.config.read().options.clone().unwrap_or_default();
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_request_timeout());
        let reset_on_progress = options.reset_timeout_on_progress.unwrap_or(false);
        let max_total = options.max_total_timeout_ms.map(Duration::from_millis);

        let started = tokio::time::Instant::now();
        let hard_deadline = max_total.map(|d| started + d);
        let mut deadline = started + timeout;
        if let Some(hard) = hard_deadline {
            deadline = deadline.min(hard);
        }

        let mut events = self.events.subscribe();
        let call = transport.request(method, params, ctx, cancel.clone());
        tokio::pin!(call);

        loop {
            tokio::select! {
                result = &mut call => {
                    return self.map_transport_result(result);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    cancel.cancel();
                    return Err(McpHubError::Timeout {
                        operation: format!("{} on '{}'", method, self.name),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                event = events.recv(), if reset_on_progress => {
                    if let Ok(UpstreamEvent::Notification { server, notification }) = event
                        && server == self.name
                        && notification.method == methods::NOTIFICATION_PROGRESS
                    {
                        let mut next = tokio::time::Instant::now() + timeout;
                        if let Some(hard) = hard_deadline {
                            next = next.min(hard);
                        }
                        deadline = next;
                    }
                }
            }
        }
    }

    /// Map a transport result, catching the mid-session 401.
    fn map_transport_result(&self, result: Result<Value>) -> Result<Value> {
        match result {
            Err(McpHubError::Transport(TransportError::Status(401)))
                if self.config.read().oauth.is_some() =>
            {
                self.set_status(UpstreamStatus::OauthRequired);
                Err(self.unavailable_error())
            }
            other => other,
        }
    }

    async fn teardown(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        self.tools.write().clear();
        self.prompts.write().clear();
        self.resources.write().clear();
    }

    /// Build the transport, run the initialize handshake, and load catalogs.
    async fn connect_once(&self, http: &reqwest::Client) -> Result<()> {
        let config = self.config();
        let transport: Arc<dyn UpstreamTransport> = match &config.spec {
            ServerSpec::Stdio { command, args, env } => {
                let t = StdioTransport::spawn(&self.name, command, args, env, self.events.clone())
                    .await?;
                t.initialize().await?;
                Arc::new(t)
            }
            ServerSpec::Sse { url, headers } => {
                let headers = with_bearer(headers, &config);
                let t = SseTransport::connect(
                    &self.name,
                    url,
                    &headers,
                    http.clone(),
                    self.events.clone(),
                )
                .await?;
                t.initialize().await?;
                Arc::new(t)
            }
            ServerSpec::StreamableHttp { url, headers } => {
                let headers = with_bearer(headers, &config);
                let t = Arc::new(StreamableHttpTransport::new(
                    &self.name,
                    url,
                    &headers,
                    http.clone(),
                    self.events.clone(),
                ));
                t.handshake().await?;
                t
            }
            ServerSpec::Openapi { openapi } => {
                let t = OpenApiTransport::connect(&self.name, openapi, http.clone()).await?;
                t.initialize().await?;
                Arc::new(t)
            }
        };

        let cancel = self.lifecycle.child_token();
        let tools_result = transport
            .request(methods::TOOLS_LIST, json!({}), None, cancel.clone())
            .await?;
        let tools: Vec<ToolInfo> = serde_json::from_value(
            tools_result.get("tools").cloned().unwrap_or(json!([])),
        )
        .unwrap_or_default();

        // Prompts and resources are optional capabilities; method-not-found
        // is expected from servers that do not export them.
        let prompts: Vec<PromptInfo> = match transport
            .request(methods::PROMPTS_LIST, json!({}), None, cancel.clone())
            .await
        {
            Ok(result) => serde_json::from_value(
                result.get("prompts").cloned().unwrap_or(json!([])),
            )
            .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let resources: Vec<ResourceInfo> = match transport
            .request(methods::RESOURCES_LIST, json!({}), None, cancel)
            .await
        {
            Ok(result) => serde_json::from_value(
                result.get("resources").cloned().unwrap_or(json!([])),
            )
            .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        tracing::info!(
            "upstream '{}' connected: {} tools, {} prompts, {} resources",
            self.name,
            tools.len(),
            prompts.len(),
            resources.len()
        );

        *self.tools.write() = tools;
        *self.prompts.write() = prompts;
        *self.resources.write() = resources;
        *self.transport.write() = Some(transport);
        Ok(())
    }
}

/// Add the stored bearer token unless the config already sets Authorization.
fn with_bearer(headers: &HashMap<String, String>, config: &ServerConfig) -> HashMap<String, String> {
    let mut headers = headers.clone();
    if let Some(token) = config.oauth.as_ref().and_then(|o| o.access_token.as_ref())
        && !headers.keys().any(|k| k.eq_ignore_ascii_case("authorization"))
    {
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
}

fn default_request_timeout() -> Duration {
    std::env::var(constants::ENV_REQUEST_TIMEOUT)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(constants::DEFAULT_REQUEST_TIMEOUT)
}

fn wants_oauth(config: &ServerConfig) -> bool {
    config.oauth.is_some()
}

fn is_unauthorized(error: &McpHubError) -> bool {
    matches!(
        error,
        McpHubError::Transport(TransportError::Status(401))
    )
}

/// Owns the pool of upstream clients and reconciles it with the settings
/// document.
pub struct UpstreamRegistry {
    store: Arc<SettingsStore>,
    oauth: Arc<OAuthCoordinator>,
    http: reqwest::Client,
    clients: RwLock<HashMap<String, Arc<UpstreamClient>>>,
    events: broadcast::Sender<UpstreamEvent>,
}

impl UpstreamRegistry {
    pub fn new(store: Arc<SettingsStore>, oauth: Arc<OAuthCoordinator>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            oauth,
            http: reqwest::Client::new(),
            clients: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Connect every enabled server and start watching for settings changes.
    pub async fn start(self: &Arc<Self>) {
        self.reconcile().await;

        let registry = Arc::downgrade(self);
        let mut rx = self.store.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.reconcile().await;
            }
        });
    }

    /// Subscribe to upstream events (notifications, catalog changes)
    pub fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, name: &str) -> Option<Arc<UpstreamClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Live clients, sorted by name for stable listings
    pub fn list(&self) -> Vec<Arc<UpstreamClient>> {
        let mut clients: Vec<_> = self.clients.read().values().cloned().collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        clients
    }

    /// Diff the settings document against the live pool and apply changes.
    ///
    /// Removed or disabled servers are torn down; material config changes
    /// (transport, oauth, options) tear the old client down before starting
    /// its replacement; toggle-only changes refilter catalogs in place.
    pub async fn reconcile(self: &Arc<Self>) {
        let settings = self.store.settings();
        let current: HashMap<String, Arc<UpstreamClient>> = self.clients.read().clone();

        for (name, client) in &current {
            match settings.mcp_servers.get(name) {
                None => {
                    tracing::info!("upstream '{}' removed from settings", name);
                    self.remove_client(name).await;
                }
                Some(config) if !config.is_enabled() => {
                    tracing::info!("upstream '{}' disabled", name);
                    self.remove_client(name).await;
                }
                Some(config) => {
                    if material_change(&client.config(), config) {
                        tracing::info!("upstream '{}' config changed, rebuilding", name);
                        self.remove_client(name).await;
                        self.spawn_client(name.clone(), config.clone());
                    } else {
                        *client.config.write() = config.clone();
                        let _ = self.events.send(UpstreamEvent::CatalogChanged {
                            server: name.clone(),
                        });
                    }
                }
            }
        }

        for (name, config) in &settings.mcp_servers {
            if config.is_enabled() && !current.contains_key(name) {
                self.spawn_client(name.clone(), config.clone());
            }
        }
    }

    /// Explicitly (re)connect one server from its current settings entry
    pub async fn connect(self: &Arc<Self>, name: &str) -> Result<()> {
        let settings = self.store.settings();
        let config = settings
            .mcp_servers
            .get(name)
            .ok_or_else(|| McpHubError::not_found(format!("Server '{}' not found", name)))?;
        if !config.is_enabled() {
            return Err(McpHubError::config(format!("Server '{}' is disabled", name)));
        }
        self.remove_client(name).await;
        self.spawn_client(name.to_string(), config.clone());
        Ok(())
    }

    /// Tear down one server's client, leaving its settings entry alone
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        if self.clients.read().contains_key(name) {
            self.remove_client(name).await;
            Ok(())
        } else {
            Err(McpHubError::not_found(format!("Server '{}' not found", name)))
        }
    }

    /// Tear down and rebuild every client
    pub async fn reconnect_all(self: &Arc<Self>) {
        let names: Vec<String> = self.clients.read().keys().cloned().collect();
        for name in names {
            self.remove_client(&name).await;
        }
        self.reconcile().await;
    }

    /// Forward a tool call to one upstream.
    ///
    /// `tool` is the inner (unqualified) name; the caller has already split
    /// the qualified form.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        ctx: &RequestContext,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let client = self
            .get(server)
            .ok_or_else(|| McpHubError::not_found(format!("Server '{}' not found", server)))?;
        if !client.has_tool(tool) {
            return Err(McpHubError::not_found(format!(
                "Tool '{}' not found on server '{}'",
                tool, server
            )));
        }
        client
            .request(
                methods::TOOLS_CALL,
                json!({ "name": tool, "arguments": arguments }),
                Some(ctx),
                cancel,
            )
            .await
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        prompt: &str,
        arguments: Value,
        ctx: &RequestContext,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let client = self
            .get(server)
            .ok_or_else(|| McpHubError::not_found(format!("Server '{}' not found", server)))?;
        if !client.effective_prompts().iter().any(|p| p.name == prompt) {
            return Err(McpHubError::not_found(format!(
                "Prompt '{}' not found on server '{}'",
                prompt, server
            )));
        }
        client
            .request(
                methods::PROMPTS_GET,
                json!({ "name": prompt, "arguments": arguments }),
                Some(ctx),
                cancel,
            )
            .await
    }

    pub async fn read_resource(
        &self,
        server: &str,
        uri: &str,
        ctx: &RequestContext,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let client = self
            .get(server)
            .ok_or_else(|| McpHubError::not_found(format!("Server '{}' not found", server)))?;
        client
            .request(
                methods::RESOURCES_READ,
                json!({ "uri": uri }),
                Some(ctx),
                cancel,
            )
            .await
    }

    /// Persist a per-tool enable flag; catalogs refilter via reconcile.
    pub fn toggle_tool(&self, server: &str, tool: &str, enabled: bool) -> Result<()> {
        self.store.update(|doc| {
            let config = doc.mcp_servers.get_mut(server).ok_or_else(|| {
                McpHubError::not_found(format!("Server '{}' not found", server))
            })?;
            config
                .tools
                .entry(tool.to_string())
                .or_insert_with(|| crate::config::ItemOverride {
                    enabled: true,
                    description: None,
                })
                .enabled = enabled;
            Ok(())
        })
    }

    /// Persist a per-prompt enable flag
    pub fn toggle_prompt(&self, server: &str, prompt: &str, enabled: bool) -> Result<()> {
        self.store.update(|doc| {
            let config = doc.mcp_servers.get_mut(server).ok_or_else(|| {
                McpHubError::not_found(format!("Server '{}' not found", server))
            })?;
            config
                .prompts
                .entry(prompt.to_string())
                .or_insert_with(|| crate::config::ItemOverride {
                    enabled: true,
                    description: None,
                })
                .enabled = enabled;
            Ok(())
        })
    }

    /// Insert a connected client with a fixed catalog and no transport.
    /// Requests against it fail as unavailable; listing paths see it as
    /// connected.
    #[cfg(test)]
    pub fn inject_for_tests(
        &self,
        name: &str,
        config: ServerConfig,
        tools: Vec<ToolInfo>,
        prompts: Vec<PromptInfo>,
    ) -> Arc<UpstreamClient> {
        let client = UpstreamClient::new(name.to_string(), config, self.events.clone());
        *client.tools.write() = tools;
        *client.prompts.write() = prompts;
        *client.status.write() = crate::model::UpstreamStatus::Connected;
        self.clients.write().insert(name.to_string(), client.clone());
        client
    }

    /// Tear down one client, as reconcile would for a removed server.
    #[cfg(test)]
    pub async fn remove_for_tests(&self, name: &str) {
        self.remove_client(name).await;
    }

    fn spawn_client(self: &Arc<Self>, name: String, config: ServerConfig) {
        let client = UpstreamClient::new(name.clone(), config, self.events.clone());
        self.clients.write().insert(name, client.clone());

        let oauth = self.oauth.clone();
        let http = self.http.clone();
        tokio::spawn(run_lifecycle(client, oauth, http));
    }

    async fn remove_client(&self, name: &str) {
        let client = self.clients.write().remove(name);
        if let Some(client) = client {
            client.lifecycle.cancel();
            client.teardown().await;
            let _ = self.events.send(UpstreamEvent::CatalogChanged {
                server: name.to_string(),
            });
        }
    }
}

/// Material changes require a transport rebuild; toggles do not.
///
/// Of the oauth block only the access token is material: it rides in the
/// transport's bearer header. Pending authorizations, client ids, and
/// refresh tokens change during flows that must not bounce the client.
fn material_change(old: &ServerConfig, new: &ServerConfig) -> bool {
    let old_spec = serde_json::to_value(&old.spec).unwrap_or_default();
    let new_spec = serde_json::to_value(&new.spec).unwrap_or_default();
    if old_spec != new_spec {
        return true;
    }
    let old_token = old.oauth.as_ref().and_then(|o| o.access_token.as_ref());
    let new_token = new.oauth.as_ref().and_then(|o| o.access_token.as_ref());
    if old_token != new_token {
        return true;
    }
    let old_options = serde_json::to_value(&old.options).unwrap_or_default();
    let new_options = serde_json::to_value(&new.options).unwrap_or_default();
    old_options != new_options
}

/// Per-client connection loop: connect, watch for death, retry with
/// exponential backoff (1s base, factor 2, 60s cap); divert to the OAuth
/// coordinator on 401.
async fn run_lifecycle(
    client: Arc<UpstreamClient>,
    oauth: Arc<OAuthCoordinator>,
    http: reqwest::Client,
) {
    let mut delay = constants::RECONNECT_BASE_DELAY;

    loop {
        if client.lifecycle.is_cancelled() {
            break;
        }
        client.set_status(UpstreamStatus::Connecting);

        match client.connect_once(&http).await {
            Ok(()) => {
                delay = constants::RECONNECT_BASE_DELAY;
                *client.last_error.write() = None;
                client.set_status(UpstreamStatus::Connected);
                let _ = client.events.send(UpstreamEvent::CatalogChanged {
                    server: client.name.clone(),
                });

                let closed = match client.transport.read().as_ref() {
                    Some(transport) => transport.closed(),
                    None => break,
                };
                tokio::select! {
                    _ = closed.cancelled() => {
                        tracing::warn!("upstream '{}' transport closed", client.name);
                        client.teardown().await;
                        client.set_status(UpstreamStatus::Disconnected);
                        *client.last_error.write() = Some("transport closed".to_string());
                        let _ = client.events.send(UpstreamEvent::CatalogChanged {
                            server: client.name.clone(),
                        });
                    }
                    _ = client.lifecycle.cancelled() => break,
                }
            }
            Err(error) if is_unauthorized(&error) && wants_oauth(&client.config()) => {
                tracing::info!("upstream '{}' requires authorization", client.name);
                client.record_error(&error);
                client.set_status(UpstreamStatus::OauthRequired);

                match oauth.reauthorize(&client.name).await {
                    Ok(Some(token)) => {
                        // Retry immediately with the fresh token; reconcile
                        // may also replace this client once the persisted
                        // document lands.
                        client
                            .config
                            .write()
                            .oauth
                            .get_or_insert_with(Default::default)
                            .access_token = Some(token);
                        continue;
                    }
                    Ok(None) => {
                        // Awaiting the authorization callback. The token
                        // persist will bump settings and replace this client.
                        client.lifecycle.cancelled().await;
                        break;
                    }
                    Err(oauth_error) => {
                        tracing::warn!(
                            "upstream '{}' authorization failed: {}",
                            client.name,
                            oauth_error
                        );
                        client.record_error(&oauth_error);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = client.lifecycle.cancelled() => break,
                        }
                        delay = (delay * constants::RECONNECT_FACTOR)
                            .min(constants::RECONNECT_MAX_DELAY);
                    }
                }
            }
            Err(error) => {
                tracing::warn!("upstream '{}' connect failed: {}", client.name, error);
                client.record_error(&error);
                client.set_status(UpstreamStatus::Disconnected);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = client.lifecycle.cancelled() => break,
                }
                delay = (delay * constants::RECONNECT_FACTOR).min(constants::RECONNECT_MAX_DELAY);
            }
        }
    }

    client.teardown().await;
}

#[cfg(test)]
mod registry_test {
    include!("registry_test.rs");
}
