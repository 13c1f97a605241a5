//! Request dispatch
//!
//! Translates each downstream JSON-RPC request into fan-out/fan-in calls
//! against the upstream pool: qualified-name rewriting, group filtering,
//! smart-routing substitution, per-request header context, and the
//! notification fan-in back to downstream sessions.

use crate::config::{GroupMember, Settings, SettingsStore};
use crate::constants;
use crate::model::{RequestContext, RoutingScope, UpstreamStatus, qualify, split_qualified};
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, PromptInfo, RequestId, ToolInfo,
    hub_initialize_result, methods, text_content, tool_error, tool_result,
};
use crate::session::{DownstreamSession, SessionManager};
use crate::upstream::{UpstreamClient, UpstreamEvent, UpstreamRegistry};
use crate::vector::VectorIndex;
use crate::{McpHubError, Result};
use serde_json::{Value, json};
use std::sync::Arc;

/// One scope member: a live client plus the group filter applied to it.
struct ScopeMember {
    client: Arc<UpstreamClient>,
    filter: Option<GroupMember>,
}

impl ScopeMember {
    fn allows_tool(&self, tool: &str) -> bool {
        self.filter
            .as_ref()
            .map(|member| member.allows_tool(tool))
            .unwrap_or(true)
    }
}

/// Translates downstream JSON-RPC traffic into upstream calls.
pub struct RequestDispatcher {
    store: Arc<SettingsStore>,
    registry: Arc<UpstreamRegistry>,
    vector: Arc<VectorIndex>,
    sessions: Arc<SessionManager>,
}

impl RequestDispatcher {
    pub fn new(
        store: Arc<SettingsStore>,
        registry: Arc<UpstreamRegistry>,
        vector: Arc<VectorIndex>,
        sessions: Arc<SessionManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            vector,
            sessions,
        })
    }

    /// Start the upstream-notification fan-in loop.
    pub fn start(self: &Arc<Self>) {
        let dispatcher = Arc::downgrade(self);
        let mut events = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("notification fan-in lagged, {} events dropped", skipped);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                dispatcher.fan_in(event);
            }
        });
    }

    /// Deliver one upstream event to every downstream session whose scope
    /// includes the originating server. Progress notifications go only to
    /// sessions with a request in flight.
    fn fan_in(&self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Notification {
                server,
                notification,
            } => {
                let progress = notification.method == methods::NOTIFICATION_PROGRESS;
                for session in self.sessions.sessions_including(&server) {
                    if progress && !session.has_inflight() {
                        continue;
                    }
                    session.send_frame(&notification);
                }
            }
            UpstreamEvent::CatalogChanged { server } => {
                let changed =
                    JsonRpcNotification::new(methods::NOTIFICATION_TOOLS_CHANGED, None);
                for session in self.sessions.sessions_including(&server) {
                    session.send_frame(&changed);
                }
            }
            UpstreamEvent::StatusChanged { .. } => {}
        }
    }

    /// Handle one inbound downstream frame. Requests produce a response;
    /// notifications produce none.
    pub async fn handle_message(
        &self,
        session: &Arc<DownstreamSession>,
        message: JsonRpcMessage,
        ctx: RequestContext,
    ) -> Option<JsonRpcResponse> {
        session.touch();

        if message.is_notification() {
            self.handle_notification(session, &message);
            return None;
        }
        if !message.is_request() {
            // Responses from downstream (e.g. to a ping) need no routing.
            return None;
        }

        let id = message.id.clone()?;
        let method = message.method.clone().unwrap_or_default();
        let params = message.params.clone().unwrap_or(Value::Null);

        let result = self
            .dispatch_request(session, &id, &method, params, ctx)
            .await;
        session.finish_request(&id);

        match result {
            Ok(value) => Some(JsonRpcResponse::success(id, value)),
            Err(McpHubError::Cancelled) => {
                // No response if the client is gone; otherwise report the
                // cancellation as a timeout-class error.
                if session.cancellation().is_cancelled() {
                    None
                } else {
                    Some(JsonRpcResponse::failure(
                        Some(id),
                        crate::protocol::RpcError {
                            code: constants::RPC_TIMEOUT,
                            message: "Request cancelled".to_string(),
                            data: Some(json!({ "kind": "cancelled" })),
                        },
                    ))
                }
            }
            Err(error) => Some(JsonRpcResponse::failure(Some(id), error.to_rpc_error())),
        }
    }

    fn handle_notification(&self, session: &Arc<DownstreamSession>, message: &JsonRpcMessage) {
        match message.method.as_deref() {
            Some(methods::CANCEL_REQUEST) => {
                let id = message
                    .params
                    .as_ref()
                    .and_then(|p| p.get("id"))
                    .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
                if let Some(id) = id {
                    session.cancel_request(&id);
                }
            }
            Some(methods::NOTIFICATION_INITIALIZED) => {}
            Some(other) => tracing::debug!("ignoring downstream notification {}", other),
            None => {}
        }
    }

    async fn dispatch_request(
        &self,
        session: &Arc<DownstreamSession>,
        id: &RequestId,
        method: &str,
        params: Value,
        ctx: RequestContext,
    ) -> Result<Value> {
        let cancel = session.begin_request(id.clone());
        let settings = self.store.settings();
        let scope = session.scope.clone();

        match method {
            methods::INITIALIZE => Ok(hub_initialize_result()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => self.list_tools(&settings, &scope),
            methods::TOOLS_CALL => {
                self.call_tool(&settings, &scope, params, &ctx, cancel).await
            }
            methods::PROMPTS_LIST => self.list_prompts(&settings, &scope),
            methods::PROMPTS_GET => {
                self.get_prompt(&settings, &scope, params, &ctx, cancel).await
            }
            methods::RESOURCES_LIST => self.list_resources(&settings, &scope),
            methods::RESOURCES_READ => {
                self.read_resource(&settings, &scope, params, &ctx, cancel)
                    .await
            }
            other => Err(McpHubError::not_found(format!(
                "Method '{}' not found",
                other
            ))),
        }
    }

    /// Resolve the scope to its member clients, in stable order.
    fn scope_members(&self, settings: &Settings, scope: &RoutingScope) -> Vec<ScopeMember> {
        match scope {
            RoutingScope::Global | RoutingScope::SmartGlobal => self
                .registry
                .list()
                .into_iter()
                .map(|client| ScopeMember {
                    client,
                    filter: None,
                })
                .collect(),
            RoutingScope::Server(name) => self
                .registry
                .get(name)
                .map(|client| ScopeMember {
                    client,
                    filter: None,
                })
                .into_iter()
                .collect(),
            RoutingScope::Group(group_id) | RoutingScope::SmartGroup(group_id) => {
                let Some(group) = settings.find_group(group_id) else {
                    return Vec::new();
                };
                group
                    .members
                    .iter()
                    .filter_map(|member| {
                        self.registry
                            .get(member.server_name())
                            .map(|client| ScopeMember {
                                client,
                                filter: Some(member.clone()),
                            })
                    })
                    .collect()
            }
        }
    }

    fn connected_members(&self, settings: &Settings, scope: &RoutingScope) -> Vec<ScopeMember> {
        self.scope_members(settings, scope)
            .into_iter()
            .filter(|member| member.client.status() == UpstreamStatus::Connected)
            .collect()
    }

    /// `tools/list`: union of member catalogs with qualified names, or the
    /// two meta-tools in smart scopes.
    fn list_tools(&self, settings: &Settings, scope: &RoutingScope) -> Result<Value> {
        if scope.is_smart() && self.vector.is_enabled() {
            return Ok(json!({ "tools": smart_tools(scope) }));
        }

        let separator = settings.system_config.separator();
        let mut tools: Vec<(String, String, ToolInfo)> = Vec::new();
        for member in self.connected_members(settings, scope) {
            for tool in member.client.effective_tools() {
                if !member.allows_tool(&tool.name) {
                    continue;
                }
                tools.push((member.client.name.clone(), tool.name.clone(), tool));
            }
        }

        // Dedup on qualified name; stable order by (serverName, toolName).
        tools.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        tools.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);

        let listed: Vec<Value> = tools
            .into_iter()
            .map(|(server, name, tool)| {
                let mut entry = serde_json::to_value(&tool).unwrap_or_default();
                entry["name"] = json!(qualify(&server, &name, separator));
                entry
            })
            .collect();
        Ok(json!({ "tools": listed }))
    }

    /// `tools/call`: smart meta-tools, or qualified-name forwarding.
    async fn call_tool(
        &self,
        settings: &Settings,
        scope: &RoutingScope,
        params: Value,
        ctx: &RequestContext,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpHubError::invalid_params("Tool name is required"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        if scope.is_smart() && self.vector.is_enabled() {
            return match name {
                constants::TOOL_SEARCH_TOOLS => {
                    self.search_tools(settings, scope, &arguments).await
                }
                constants::TOOL_CALL_TOOL => {
                    let inner = arguments
                        .get("toolName")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            McpHubError::invalid_params("toolName is required")
                        })?;
                    let inner_args = arguments.get("arguments").cloned().unwrap_or(json!({}));
                    self.forward_tool_call(settings, scope, inner, inner_args, ctx, cancel)
                        .await
                }
                other => Err(McpHubError::not_found(format!(
                    "Tool '{}' not found",
                    other
                ))),
            };
        }

        self.forward_tool_call(settings, scope, name, arguments, ctx, cancel)
            .await
    }

    /// The `search_tools` meta-tool: vector search scoped to the group's
    /// members when routing through a smart group.
    async fn search_tools(
        &self,
        settings: &Settings,
        scope: &RoutingScope,
        arguments: &Value,
    ) -> Result<Value> {
        let query = arguments.get("query").and_then(|v| v.as_str());
        let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
            return Ok(tool_error("Query parameter is required"));
        };

        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(constants::SEARCH_LIMIT_DEFAULT)
            .clamp(1, constants::SEARCH_LIMIT_MAX) as usize;

        let allowlist = scope.group_id().and_then(|group_id| {
            settings.find_group(group_id).map(|group| {
                group
                    .server_names()
                    .into_iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
        });

        let hits = self.vector.search(query, limit, allowlist).await;
        let listed: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "serverName": hit.server_name,
                    "toolName": hit.tool.name,
                    "description": hit.tool.description,
                    "inputSchema": hit.tool.input_schema,
                })
            })
            .collect();

        let text = serde_json::to_string_pretty(&listed)?;
        Ok(tool_result(vec![text_content(text)]))
    }

    /// Forward a call to the upstream named in the qualified tool name; an
    /// unqualified name is accepted when it matches exactly one tool in
    /// scope.
    async fn forward_tool_call(
        &self,
        settings: &Settings,
        scope: &RoutingScope,
        name: &str,
        arguments: Value,
        ctx: &RequestContext,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Value> {
        let separator = settings.system_config.separator();
        let members = self.scope_members(settings, scope);

        if let Some((server, tool)) = split_qualified(name, separator) {
            let member = members
                .iter()
                .find(|m| m.client.name == server)
                .ok_or_else(|| {
                    McpHubError::not_found(format!("Server '{}' not found", server))
                })?;
            if !member.allows_tool(tool) || !member.client.has_tool(tool) {
                return Err(McpHubError::not_found(format!(
                    "Tool '{}' not found on server '{}'",
                    tool, server
                )));
            }
            return self
                .registry
                .call_tool(server, tool, arguments, ctx, cancel)
                .await;
        }

        // Unqualified: unique match across the scope, ambiguity is an
        // error listing the candidates.
        let candidates: Vec<String> = members
            .iter()
            .filter(|m| m.allows_tool(name) && m.client.has_tool(name))
            .map(|m| qualify(&m.client.name, name, separator))
            .collect();
        match candidates.len() {
            0 => Err(McpHubError::not_found(format!("Tool '{}' not found", name))),
            1 => {
                let (server, tool) =
                    split_qualified(&candidates[0], separator).ok_or_else(|| {
                        McpHubError::internal("qualified candidate failed to split")
                    })?;
                self.registry
                    .call_tool(server, tool, arguments, ctx, cancel)
                    .await
            }
            _ => Err(McpHubError::invalid_params(format!(
                "Tool name '{}' is ambiguous; candidates: {}",
                name,
                candidates.join(", ")
            ))),
        }
    }

    fn list_prompts(&self, settings: &Settings, scope: &RoutingScope) -> Result<Value> {
        if scope.is_smart() && self.vector.is_enabled() {
            // Smart scopes expose meta-tools only.
            return Ok(json!({ "prompts": [] }));
        }

        let separator = settings.system_config.separator();
        let mut prompts: Vec<(String, String, PromptInfo)> = Vec::new();
        for member in self.connected_members(settings, scope) {
            for prompt in member.client.effective_prompts() {
                prompts.push((member.client.name.clone(), prompt.name.clone(), prompt));
            }
        }
        prompts.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        prompts.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);

        let listed: Vec<Value> = prompts
            .into_iter()
            .map(|(server, name, prompt)| {
                let mut entry = serde_json::to_value(&prompt).unwrap_or_default();
                entry["name"] = json!(qualify(&server, &name, separator));
                entry
            })
            .collect();
        Ok(json!({ "prompts": listed }))
    }

    async fn get_prompt(
        &self,
        settings: &Settings,
        scope: &RoutingScope,
        params: Value,
        ctx: &RequestContext,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpHubError::invalid_params("Prompt name is required"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let separator = settings.system_config.separator();
        let members = self.scope_members(settings, scope);

        if let Some((server, prompt)) = split_qualified(name, separator) {
            if !members.iter().any(|m| m.client.name == server) {
                return Err(McpHubError::not_found(format!(
                    "Server '{}' not found",
                    server
                )));
            }
            return self
                .registry
                .get_prompt(server, prompt, arguments, ctx, cancel)
                .await;
        }

        let candidates: Vec<&ScopeMember> = members
            .iter()
            .filter(|m| m.client.effective_prompts().iter().any(|p| p.name == name))
            .collect();
        match candidates.len() {
            0 => Err(McpHubError::not_found(format!(
                "Prompt '{}' not found",
                name
            ))),
            1 => {
                self.registry
                    .get_prompt(&candidates[0].client.name, name, arguments, ctx, cancel)
                    .await
            }
            _ => Err(McpHubError::invalid_params(format!(
                "Prompt name '{}' is ambiguous",
                name
            ))),
        }
    }

    fn list_resources(&self, settings: &Settings, scope: &RoutingScope) -> Result<Value> {
        if scope.is_smart() && self.vector.is_enabled() {
            return Ok(json!({ "resources": [] }));
        }

        let mut resources: Vec<Value> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for member in self.connected_members(settings, scope) {
            for resource in member.client.resources() {
                if seen.insert(resource.uri.clone()) {
                    resources.push(serde_json::to_value(&resource).unwrap_or_default());
                }
            }
        }
        Ok(json!({ "resources": resources }))
    }

    async fn read_resource(
        &self,
        settings: &Settings,
        scope: &RoutingScope,
        params: Value,
        ctx: &RequestContext,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Value> {
        let uri = params
            .get("uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpHubError::invalid_params("Resource uri is required"))?;

        // Resources are addressed by URI; route to the scope member that
        // exports it.
        let members = self.scope_members(settings, scope);
        let owner = members
            .iter()
            .find(|m| m.client.resources().iter().any(|r| r.uri == uri))
            .ok_or_else(|| {
                McpHubError::not_found(format!("Resource '{}' not found", uri))
            })?;

        self.registry
            .read_resource(&owner.client.name, uri, ctx, cancel)
            .await
    }
}

/// The two meta-tools exposed in smart scopes, with scope-interpolated
/// descriptions.
fn smart_tools(scope: &RoutingScope) -> Vec<Value> {
    let scope_text = match scope {
        RoutingScope::SmartGroup(group) => format!("servers in the \"{}\" group", group),
        _ => "all available servers".to_string(),
    };

    vec![
        json!({
            "name": constants::TOOL_SEARCH_TOOLS,
            "description": format!(
                "Search for relevant tools across {} using a natural-language query. \
                 Returns the matching tools with their full input schemas.",
                scope_text
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural-language description of the task",
                    },
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of results (default 10, max 50)",
                        "maximum": constants::SEARCH_LIMIT_MAX,
                    },
                },
                "required": ["query"],
            },
        }),
        json!({
            "name": constants::TOOL_CALL_TOOL,
            "description": format!(
                "Invoke a tool found via search_tools on {}. \
                 Pass the qualified tool name and its arguments.",
                scope_text
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "toolName": {
                        "type": "string",
                        "description": "Qualified tool name returned by search_tools",
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Arguments matching the tool's input schema",
                    },
                },
                "required": ["toolName"],
            },
        }),
    ]
}

#[cfg(test)]
mod dispatch_test {
    include!("dispatch_test.rs");
}
