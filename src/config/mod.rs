//! Configuration management for MCPHub
//!
//! Loads, expands, validates, and atomically persists the settings document
//! (`mcp_settings.json`) and notifies subscribers on change. The document is
//! the single source of truth: upstream definitions, users, groups, routing
//! flags, smart routing, and OAuth credentials all live here.

use crate::constants;
use crate::{McpHubError, Result};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Complete MCPHub settings document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Upstream server definitions keyed by unique server name
    #[serde(default)]
    pub mcp_servers: HashMap<String, ServerConfig>,

    /// User accounts (hashes only, never plaintext)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserConfig>,

    /// Named routing groups keyed by group id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub groups: HashMap<String, GroupConfig>,

    /// Global routing / smart-routing / OAuth-proxy configuration
    #[serde(default)]
    pub system_config: SystemConfig,

    /// Per-username overrides of the system configuration
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_configs: HashMap<String, SystemConfig>,
}

/// A user account entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// A routing group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

impl GroupConfig {
    /// Member entry for a server, if present
    pub fn member(&self, server: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.server_name() == server)
    }

    /// Ordered member server names
    pub fn server_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.server_name()).collect()
    }
}

/// A group member: a plain server name or a name with a tool filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupMember {
    Name(String),
    Filtered {
        name: String,
        #[serde(default)]
        tools: ToolFilter,
    },
}

impl GroupMember {
    pub fn server_name(&self) -> &str {
        match self {
            GroupMember::Name(name) => name,
            GroupMember::Filtered { name, .. } => name,
        }
    }

    /// Whether this member exposes the given tool
    pub fn allows_tool(&self, tool: &str) -> bool {
        match self {
            GroupMember::Name(_) => true,
            GroupMember::Filtered { tools, .. } => tools.allows(tool),
        }
    }
}

/// Per-member tool allowlist: the literal `"all"` or an explicit list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolFilter {
    Keyword(String),
    List(Vec<String>),
}

impl Default for ToolFilter {
    fn default() -> Self {
        ToolFilter::Keyword("all".to_string())
    }
}

impl ToolFilter {
    pub fn allows(&self, tool: &str) -> bool {
        match self {
            ToolFilter::Keyword(k) => k == "all",
            ToolFilter::List(names) => names.iter().any(|n| n == tool),
        }
    }
}

/// Upstream server definition: a transport variant plus common fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub spec: ServerSpec,

    /// Disabled servers keep their configuration but get no client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ServerOptions>,

    /// Per-tool enable flags and description overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, ItemOverride>,

    /// Per-prompt enable flags and description overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub prompts: HashMap<String, ItemOverride>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,
}

impl ServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Transport-specific server fields, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerSpec {
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    Openapi {
        openapi: OpenApiSpec,
    },
}

/// Per-server call options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_timeout_on_progress: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_timeout_ms: Option<u64>,
}

/// Per-tool / per-prompt override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOverride {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// OpenAPI upstream definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiSpec {
    /// Document URL; mutually exclusive with `schema`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Embedded document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<OpenApiSecurity>,

    /// Downstream request headers forwarded to the API (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passthrough_headers: Vec<String>,
}

/// Security applied to synthesized OpenAPI calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiSecurity {
    /// `apiKey` or `http`
    #[serde(rename = "type")]
    pub kind: String,

    /// apiKey: parameter name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// apiKey: `header` or `query`
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// http: `bearer` or `basic`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// OAuth state for one upstream server
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// RFC 8707 resource indicator sent with authorization requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_registration: Option<DynamicRegistration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_authorization: Option<PendingAuthorization>,
}

// Tokens and client secrets stay out of logs.
impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("scopes", &self.scopes)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("resource", &self.resource)
            .field("dynamic_registration", &self.dynamic_registration)
            .field("pending_authorization", &self.pending_authorization)
            .finish()
    }
}

/// RFC 7591 dynamic client registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRegistration {
    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Client metadata posted to the registration endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_access_token: Option<String>,
}

/// Persisted intermediate state of an authorization-code flow
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthorization {
    pub authorization_url: String,
    pub state: String,
    pub code_verifier: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("authorization_url", &self.authorization_url)
            .field("state", &self.state)
            .field("code_verifier", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Routing, smart routing, and OAuth-proxy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub smart_routing: SmartRoutingConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthProxyConfig>,

    /// Separator in qualified tool names (default `::`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_separator: Option<String>,
}

impl SystemConfig {
    pub fn separator(&self) -> &str {
        self.name_separator
            .as_deref()
            .unwrap_or(constants::NAME_SEPARATOR)
    }
}

/// Downstream routing flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default = "default_true")]
    pub enable_global_route: bool,

    #[serde(default = "default_true")]
    pub enable_group_name_route: bool,

    #[serde(default)]
    pub enable_bearer_auth: bool,

    #[serde(default)]
    pub bearer_auth_key: String,

    #[serde(default)]
    pub skip_auth: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enable_global_route: true,
            enable_group_name_route: true,
            enable_bearer_auth: false,
            bearer_auth_key: String::new(),
            skip_auth: false,
        }
    }
}

/// Smart-routing (vector search) settings
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartRoutingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_embedding_model: Option<String>,
}

impl std::fmt::Debug for SmartRoutingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartRoutingConfig")
            .field("enabled", &self.enabled)
            .field("openai_api_base_url", &self.openai_api_base_url)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_embedding_model", &self.openai_api_embedding_model)
            .finish()
    }
}

/// Authorization-proxy settings (RFC 8414 metadata plus delegated
/// `/authorize` and `/token` endpoints)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

impl Settings {
    /// Resolve the effective system configuration for a user.
    ///
    /// Admins (and anonymous sessions) see the global view; non-admins see
    /// their override when one exists.
    pub fn system_config_for(&self, user: Option<&str>) -> &SystemConfig {
        if let Some(username) = user
            && let Some(account) = self.users.iter().find(|u| u.username == username)
            && !account.is_admin
            && let Some(override_cfg) = self.user_configs.get(username)
        {
            return override_cfg;
        }
        &self.system_config
    }

    /// Resolve a group by id, falling back to name when the route allows it
    pub fn find_group(&self, key: &str) -> Option<&GroupConfig> {
        self.groups.get(key).or_else(|| {
            if self.system_config.routing.enable_group_name_route {
                self.groups.values().find(|g| g.name == key)
            } else {
                None
            }
        })
    }

    /// Seed an initial admin account when no users are configured
    pub fn ensure_seed_admin(&mut self) {
        if self.users.is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(b"admin123");
            self.users.push(UserConfig {
                username: "admin".to_string(),
                password_hash: hex::encode(hasher.finalize()),
                is_admin: true,
            });
        }
    }

    /// Validate the document before persisting or applying it
    pub fn validate(&self) -> Result<()> {
        for (name, server) in &self.mcp_servers {
            if name.is_empty() {
                return Err(McpHubError::config("server name cannot be empty"));
            }
            match &server.spec {
                ServerSpec::Stdio { command, .. } => {
                    if command.is_empty() {
                        return Err(McpHubError::config(format!(
                            "server '{}': command is required for stdio servers",
                            name
                        )));
                    }
                }
                ServerSpec::Sse { url, .. } | ServerSpec::StreamableHttp { url, .. } => {
                    if url.is_empty() {
                        return Err(McpHubError::config(format!(
                            "server '{}': url is required",
                            name
                        )));
                    }
                }
                ServerSpec::Openapi { openapi } => {
                    if openapi.url.is_none() && openapi.schema.is_none() {
                        return Err(McpHubError::config(format!(
                            "server '{}': openapi requires url or schema",
                            name
                        )));
                    }
                }
            }
        }

        for (id, group) in &self.groups {
            if group.id != *id {
                return Err(McpHubError::config(format!(
                    "group '{}': id field '{}' does not match key",
                    id, group.id
                )));
            }
            for member in &group.members {
                if !self.mcp_servers.contains_key(member.server_name()) {
                    tracing::warn!(
                        "group '{}' references unknown server '{}'",
                        id,
                        member.server_name()
                    );
                }
            }
            for member in &group.members {
                if let GroupMember::Filtered {
                    tools: ToolFilter::Keyword(keyword),
                    ..
                } = member
                    && keyword != "all"
                {
                    return Err(McpHubError::config(format!(
                        "group '{}': tools filter keyword must be \"all\" or a list",
                        id
                    )));
                }
            }
        }

        let routing = &self.system_config.routing;
        if routing.enable_bearer_auth && routing.bearer_auth_key.is_empty() {
            return Err(McpHubError::config(
                "routing.bearerAuthKey is required when bearer auth is enabled",
            ));
        }

        if let Some(sep) = &self.system_config.name_separator
            && sep.is_empty()
        {
            return Err(McpHubError::config("nameSeparator cannot be empty"));
        }

        Ok(())
    }
}

// ============================================================================
// ENVIRONMENT EXPANSION
// ============================================================================

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}|\$([A-Z_][A-Z0-9_]*)").unwrap());

/// Expand `${NAME}` and `$NAME` references in a string.
///
/// Unset variables expand to the empty string.
pub fn expand_env_str(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// Recursively expand environment references in every string leaf.
///
/// Non-string leaves (numbers, booleans, null) are preserved byte-for-byte;
/// arrays and nested mappings are expanded in place.
pub fn expand_env_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = expand_env_str(s),
        Value::Array(items) => {
            for item in items {
                expand_env_value(item);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                expand_env_value(item);
            }
        }
        _ => {}
    }
}

// ============================================================================
// SETTINGS STORE
// ============================================================================

/// Owns the settings file: load, expand, validate, persist, notify.
///
/// Readers take cheap `Arc<Settings>` snapshots; writers go through
/// [`SettingsStore::save`] or [`SettingsStore::update`], which serialize
/// writes, persist atomically (temp file + rename), and bump the generation
/// counter observed by subscribers.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Arc<Settings>>,
    write_lock: Mutex<()>,
    generation: watch::Sender<u64>,
}

impl SettingsStore {
    /// Resolve the settings path and load the initial document.
    ///
    /// A missing file is not fatal: an empty default document is
    /// synthesized. A file that exists but fails to parse is fatal.
    pub fn discover(explicit: Option<PathBuf>) -> Result<Self> {
        let path = Self::resolve_path(explicit);
        let settings = Self::read_expanded(&path)?;
        tracing::info!(
            "Loaded settings from {} ({} servers)",
            path.display(),
            settings.mcp_servers.len()
        );
        let (generation, _) = watch::channel(0);
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(settings)),
            write_lock: Mutex::new(()),
            generation,
        })
    }

    /// Settings path resolution: explicit path, `MCPHUB_SETTING_PATH`
    /// (file or directory), current working directory, package root.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        if let Some(path) = explicit {
            return path;
        }

        if let Ok(env_path) = std::env::var(constants::ENV_SETTINGS_PATH) {
            let env_path = PathBuf::from(env_path);
            if env_path.is_dir() {
                return env_path.join(constants::SETTINGS_FILE_NAME);
            }
            return env_path;
        }

        let cwd_path = PathBuf::from(constants::SETTINGS_FILE_NAME);
        if cwd_path.exists() {
            return cwd_path;
        }

        let package_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(constants::SETTINGS_FILE_NAME);
        if package_path.exists() {
            return package_path;
        }

        cwd_path
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current expanded snapshot
    pub fn settings(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Re-read the document from disk with environment expansion and
    /// publish it as the current snapshot.
    pub fn load(&self) -> Result<Arc<Settings>> {
        let settings = Arc::new(Self::read_expanded(&self.path)?);
        *self.current.write() = settings.clone();
        self.bump();
        Ok(settings)
    }

    /// Read the document without environment expansion (export round-trip)
    pub fn load_original(&self) -> Result<Settings> {
        Self::read_raw(&self.path)
    }

    /// Validate and atomically persist the document, then notify
    /// subscribers.
    ///
    /// Failures leave the on-disk file unchanged and are reported to the
    /// caller.
    pub fn save(&self, doc: &Settings) -> Result<()> {
        doc.validate()?;

        let _guard = self.write_lock.lock();

        let content = serde_json::to_string_pretty(doc)?;
        let tmp_path = self.path.with_extension(format!("tmp.{}", std::process::id()));
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;

        // Publish the expanded form to readers.
        let mut expanded_value = serde_json::to_value(doc)?;
        expand_env_value(&mut expanded_value);
        let mut expanded: Settings = serde_json::from_value(expanded_value)?;
        expanded.ensure_seed_admin();
        *self.current.write() = Arc::new(expanded);
        drop(_guard);

        self.bump();
        Ok(())
    }

    /// Load the raw document, apply a mutation, and save.
    ///
    /// This is the single write path used by OAuth persistence and
    /// tool/prompt toggles, so concurrent writers never clobber each other.
    pub fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let mut doc = match Self::read_raw(&self.path) {
            Ok(doc) => doc,
            Err(err) => {
                // A missing file is synthesized; anything else is real.
                if self.path.exists() {
                    return Err(err);
                }
                Settings::default()
            }
        };
        mutate(&mut doc)?;
        self.save(&doc)
    }

    /// Subscribe to settings changes. The receiver observes a generation
    /// counter; dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    fn read_raw(path: &Path) -> Result<Settings> {
        if !path.exists() {
            let mut settings = Settings::default();
            settings.ensure_seed_admin();
            return Ok(settings);
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| McpHubError::config(format!("Failed to parse settings: {}", e)))?;
        Ok(settings)
    }

    fn read_expanded(path: &Path) -> Result<Settings> {
        if !path.exists() {
            let mut settings = Settings::default();
            settings.ensure_seed_admin();
            return Ok(settings);
        }
        let content = std::fs::read_to_string(path)?;
        let mut value: Value = serde_json::from_str(&content)
            .map_err(|e| McpHubError::config(format!("Failed to parse settings: {}", e)))?;
        expand_env_value(&mut value);
        let mut settings: Settings = serde_json::from_value(value)
            .map_err(|e| McpHubError::config(format!("Invalid settings document: {}", e)))?;
        settings.ensure_seed_admin();
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod config_test {
    include!("config_test.rs");
}
