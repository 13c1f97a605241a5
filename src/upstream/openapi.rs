//! OpenAPI upstream wrapper
//!
//! Synthesizes an MCP server from an OpenAPI v3 document: one tool per
//! operation, named by operation id, with an input schema derived from the
//! operation's parameters and request body. A tool call performs the HTTP
//! request with the configured security applied and forwards downstream
//! headers whose names appear (case-insensitively) in `passthroughHeaders`.

use super::transport::UpstreamTransport;
use crate::config::{OpenApiSecurity, OpenApiSpec};
use crate::constants;
use crate::error::TransportError;
use crate::model::RequestContext;
use crate::protocol::{RpcError, ToolInfo, methods, text_content};
use crate::{McpHubError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct OpenApiTransport {
    http: reqwest::Client,
    base_url: String,
    operations: HashMap<String, OperationSpec>,
    tools: Vec<ToolInfo>,
    security: Option<OpenApiSecurity>,
    /// Lowercased names of downstream headers forwarded to the API
    passthrough: Vec<String>,
    closed: CancellationToken,
}

/// One HTTP operation behind a synthesized tool
#[derive(Debug, Clone)]
struct OperationSpec {
    method: String,
    path: String,
    params: Vec<ParamSpec>,
    body_fields: Vec<String>,
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: String,
    location: ParamLocation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamLocation {
    Path,
    Query,
    Header,
}

impl OpenApiTransport {
    /// Load the document (fetched or embedded) and synthesize the tool set.
    pub async fn connect(name: &str, spec: &OpenApiSpec, http: reqwest::Client) -> Result<Self> {
        let document = match (&spec.schema, &spec.url) {
            (Some(schema), _) => schema.clone(),
            (None, Some(url)) => {
                let response = http
                    .get(url)
                    .send()
                    .await
                    .map_err(TransportError::Reqwest)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TransportError::Status(status.as_u16()).into());
                }
                response.json().await.map_err(TransportError::Reqwest)?
            }
            (None, None) => {
                return Err(McpHubError::config(format!(
                    "openapi server '{}' has neither url nor schema",
                    name
                )));
            }
        };

        let base_url = resolve_base_url(&document, spec.url.as_deref())?;
        let (operations, tools) = synthesize_operations(&document);

        tracing::info!(
            "openapi upstream '{}': {} operations from {}",
            name,
            operations.len(),
            base_url
        );

        Ok(Self {
            http,
            base_url,
            operations,
            tools,
            security: spec.security.clone(),
            passthrough: spec
                .passthrough_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            closed: CancellationToken::new(),
        })
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        ctx: Option<&RequestContext>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let operation = self.operations.get(tool_name).ok_or_else(|| {
            McpHubError::Rpc(RpcError {
                code: constants::RPC_METHOD_NOT_FOUND,
                message: format!("Tool '{}' not found", tool_name),
                data: None,
            })
        })?;

        // Path template substitution, then query parameters.
        let mut path = operation.path.clone();
        let mut query: Vec<(String, String)> = Vec::new();
        let mut headers: Vec<(String, String)> = Vec::new();
        for param in &operation.params {
            let Some(value) = arguments.get(&param.name) else {
                continue;
            };
            let rendered = render_param(value);
            match param.location {
                ParamLocation::Path => {
                    path = path.replace(
                        &format!("{{{}}}", param.name),
                        &urlencoding::encode(&rendered),
                    );
                }
                ParamLocation::Query => query.push((param.name.clone(), rendered)),
                ParamLocation::Header => headers.push((param.name.clone(), rendered)),
            }
        }

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let method = reqwest::Method::from_bytes(operation.method.as_bytes())
            .map_err(|_| McpHubError::internal(format!("bad method {}", operation.method)))?;

        let mut request = self.http.request(method, &url);
        if !query.is_empty() {
            request = request.query(&query);
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }

        // Request body from the fields the schema assigned to it.
        if !operation.body_fields.is_empty() {
            let mut body = Map::new();
            for field in &operation.body_fields {
                if let Some(value) = arguments.get(field) {
                    body.insert(field.clone(), value.clone());
                }
            }
            if !body.is_empty() {
                request = request.json(&Value::Object(body));
            }
        }

        request = self.apply_security(request);

        // Whitelisted downstream headers pass through.
        if let Some(ctx) = ctx {
            for name in &self.passthrough {
                if let Some(value) = ctx.header(name) {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let send = request.send();
        let response = tokio::select! {
            response = send => response.map_err(TransportError::Reqwest)?,
            _ = cancel.cancelled() => return Err(McpHubError::Cancelled),
        };

        let status = response.status();
        let text = response.text().await.map_err(TransportError::Reqwest)?;
        let pretty = match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => serde_json::to_string_pretty(&parsed).unwrap_or(text),
            Err(_) => text,
        };

        if status.is_success() {
            Ok(json!({ "content": [text_content(pretty)] }))
        } else {
            Ok(json!({
                "content": [text_content(format!("HTTP {}: {}", status.as_u16(), pretty))],
                "isError": true,
            }))
        }
    }

    fn apply_security(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(security) = &self.security else {
            return request;
        };
        match security.kind.as_str() {
            "apiKey" => {
                let (Some(name), Some(key)) = (&security.name, &security.api_key) else {
                    return request;
                };
                match security.location.as_deref() {
                    Some("query") => request.query(&[(name, key)]),
                    _ => request.header(name, key),
                }
            }
            "http" => match security.scheme.as_deref() {
                Some("basic") => request.basic_auth(
                    security.username.clone().unwrap_or_default(),
                    security.password.clone(),
                ),
                _ => match &security.token {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                },
            },
            other => {
                tracing::warn!("unsupported openapi security type '{}'", other);
                request
            }
        }
    }
}

#[async_trait]
impl UpstreamTransport for OpenApiTransport {
    async fn initialize(&self) -> Result<Value> {
        Ok(json!({
            "protocolVersion": constants::MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "openapi", "version": env!("CARGO_PKG_VERSION") },
        }))
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        ctx: Option<&RequestContext>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        match method {
            methods::TOOLS_LIST => Ok(json!({ "tools": self.tools })),
            methods::PROMPTS_LIST => Ok(json!({ "prompts": [] })),
            methods::RESOURCES_LIST => Ok(json!({ "resources": [] })),
            methods::TOOLS_CALL => {
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| McpHubError::invalid_params("tool name is required"))?;
                let arguments = params
                    .get("arguments")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default();
                self.execute(name, &arguments, ctx, cancel).await
            }
            other => Err(McpHubError::Rpc(RpcError {
                code: constants::RPC_METHOD_NOT_FOUND,
                message: format!("Method '{}' not supported by openapi upstream", other),
                data: None,
            })),
        }
    }

    async fn notify(&self, _method: &str, _params: Value) -> Result<()> {
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn shutdown(&self) {
        self.closed.cancel();
    }
}

/// Base URL: the document's first `servers` entry, resolved against the
/// document URL when relative; falls back to the document URL's origin.
fn resolve_base_url(document: &Value, doc_url: Option<&str>) -> Result<String> {
    let server_url = document
        .get("servers")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .and_then(|s| s.get("url"))
        .and_then(|u| u.as_str());

    match (server_url, doc_url) {
        (Some(server), _) if server.contains("://") => Ok(server.trim_end_matches('/').to_string()),
        (Some(server), Some(doc)) => {
            let base = Url::parse(doc)
                .map_err(|e| McpHubError::config(format!("invalid openapi url: {}", e)))?;
            let joined = base
                .join(server)
                .map_err(|e| McpHubError::config(format!("invalid servers url: {}", e)))?;
            Ok(joined.to_string().trim_end_matches('/').to_string())
        }
        (None, Some(doc)) => {
            let base = Url::parse(doc)
                .map_err(|e| McpHubError::config(format!("invalid openapi url: {}", e)))?;
            let origin = base.origin().ascii_serialization();
            Ok(origin)
        }
        (Some(server), None) => Ok(server.trim_end_matches('/').to_string()),
        (None, None) => Err(McpHubError::config(
            "openapi document has no servers entry and no url to derive one from",
        )),
    }
}

/// Walk `paths` and build one operation (and tool) per method entry.
fn synthesize_operations(document: &Value) -> (HashMap<String, OperationSpec>, Vec<ToolInfo>) {
    let mut operations = HashMap::new();
    let mut tools = Vec::new();

    let Some(paths) = document.get("paths").and_then(|p| p.as_object()) else {
        return (operations, tools);
    };

    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        let shared_params = item
            .get("parameters")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        for (http_method, operation) in item {
            if !matches!(
                http_method.as_str(),
                "get" | "put" | "post" | "delete" | "patch" | "head" | "options"
            ) {
                continue;
            }
            let Some(operation) = operation.as_object() else {
                continue;
            };

            let operation_id = operation
                .get("operationId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| {
                    format!(
                        "{}_{}",
                        http_method,
                        path.trim_matches('/').replace(['/', '{', '}'], "_")
                    )
                });

            let mut properties = Map::new();
            let mut required = Vec::new();
            let mut params = Vec::new();

            let mut all_params = shared_params.clone();
            if let Some(own) = operation.get("parameters").and_then(|p| p.as_array()) {
                all_params.extend(own.iter().cloned());
            }
            for param in &all_params {
                let Some(name) = param.get("name").and_then(|v| v.as_str()) else {
                    continue;
                };
                let location = match param.get("in").and_then(|v| v.as_str()) {
                    Some("path") => ParamLocation::Path,
                    Some("query") => ParamLocation::Query,
                    Some("header") => ParamLocation::Header,
                    _ => continue,
                };
                let mut schema = param
                    .get("schema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "string" }));
                if let (Some(desc), Some(obj)) = (
                    param.get("description").and_then(|v| v.as_str()),
                    schema.as_object_mut(),
                ) {
                    obj.entry("description".to_string())
                        .or_insert_with(|| json!(desc));
                }
                properties.insert(name.to_string(), schema);
                if param.get("required").and_then(|v| v.as_bool()) == Some(true)
                    || location == ParamLocation::Path
                {
                    required.push(json!(name));
                }
                params.push(ParamSpec {
                    name: name.to_string(),
                    location,
                });
            }

            // Request-body object properties are lifted into the tool schema.
            let mut body_fields = Vec::new();
            if let Some(body_schema) = operation
                .get("requestBody")
                .and_then(|b| b.get("content"))
                .and_then(|c| c.get("application/json"))
                .and_then(|j| j.get("schema"))
            {
                if let Some(body_props) = body_schema.get("properties").and_then(|p| p.as_object())
                {
                    for (field, schema) in body_props {
                        properties.insert(field.clone(), schema.clone());
                        body_fields.push(field.clone());
                    }
                    if let Some(body_required) =
                        body_schema.get("required").and_then(|r| r.as_array())
                    {
                        required.extend(body_required.iter().cloned());
                    }
                } else {
                    properties.insert("body".to_string(), body_schema.clone());
                    body_fields.push("body".to_string());
                }
            }

            let description = operation
                .get("description")
                .or_else(|| operation.get("summary"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            operations.insert(
                operation_id.clone(),
                OperationSpec {
                    method: http_method.to_uppercase(),
                    path: path.clone(),
                    params,
                    body_fields,
                },
            );
            tools.push(ToolInfo {
                name: operation_id,
                description,
                input_schema: json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            });
        }
    }

    tools.sort_by(|a, b| a.name.cmp(&b.name));
    (operations, tools)
}

fn render_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
