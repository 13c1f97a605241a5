//! Constants used throughout MCPHub
//!
//! This module contains all constant values used in the hub runtime,
//! including configuration paths, routing markers, timeouts, and
//! JSON-RPC error codes.

use std::time::Duration;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Settings file name
pub const SETTINGS_FILE_NAME: &str = "mcp_settings.json";

/// Environment variable: settings path override (file or directory)
pub const ENV_SETTINGS_PATH: &str = "MCPHUB_SETTING_PATH";

/// Environment variable: HTTP port
pub const ENV_PORT: &str = "PORT";

/// Environment variable: base path prefix for all routes
pub const ENV_BASE_PATH: &str = "BASE_PATH";

/// Environment variable: default upstream request timeout (milliseconds)
pub const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

/// Environment variable: development/production flag
pub const ENV_NODE_ENV: &str = "NODE_ENV";

/// Default host to bind to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

// ============================================================================
// ROUTING
// ============================================================================

/// Separator between server name and tool name in qualified names
pub const NAME_SEPARATOR: &str = "::";

/// Path marker selecting a smart-routing scope
pub const SMART_ROUTE_MARKER: &str = "$smart";

/// Meta-tool exposed in smart scopes: vector search over tool descriptions
pub const TOOL_SEARCH_TOOLS: &str = "search_tools";

/// Meta-tool exposed in smart scopes: forwarded invocation
pub const TOOL_CALL_TOOL: &str = "call_tool";

/// Maximum `limit` accepted by `search_tools`
pub const SEARCH_LIMIT_MAX: u64 = 50;

/// Default `limit` for `search_tools`
pub const SEARCH_LIMIT_DEFAULT: u64 = 10;

/// Results below this cosine similarity are dropped (unless k <= 1)
pub const SEARCH_SIMILARITY_THRESHOLD: f32 = 0.25;

// ============================================================================
// TIMEOUTS & LIFECYCLE
// ============================================================================

/// Default per-call upstream timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Reconnect backoff: initial delay
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Reconnect backoff: multiplier applied per attempt
pub const RECONNECT_FACTOR: u32 = 2;

/// Reconnect backoff: delay ceiling
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Downstream session idle timeout
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Keepalive interval on downstream streams
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period between SIGTERM and SIGKILL for stdio subprocesses
pub const SUBPROCESS_KILL_GRACE: Duration = Duration::from_secs(5);

/// Pending OAuth authorizations older than this are garbage-collected
pub const PENDING_AUTHORIZATION_TTL: Duration = Duration::from_secs(30 * 60);

/// Clock skew tolerance when comparing access-token expiry
pub const TOKEN_EXP_SKEW: Duration = Duration::from_secs(60);

// ============================================================================
// WIRE PROTOCOL
// ============================================================================

/// MCP protocol version the hub speaks downstream
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Session id header for the streamable-HTTP transport
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// JSON-RPC error code: deadline exceeded
pub const RPC_TIMEOUT: i64 = -32000;

/// JSON-RPC error code: upstream not connected
pub const RPC_UPSTREAM_UNAVAILABLE: i64 = -32001;

/// JSON-RPC error code: upstream awaiting OAuth authorization
pub const RPC_AUTH_REQUIRED: i64 = -32002;

/// JSON-RPC error code: invalid request
pub const RPC_INVALID_REQUEST: i64 = -32600;

/// JSON-RPC error code: unknown server, group, tool, prompt, or resource
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code: malformed request arguments
pub const RPC_INVALID_PARAMS: i64 = -32602;

/// JSON-RPC error code: unexpected internal failure
pub const RPC_INTERNAL: i64 = -32603;

/// JSON-RPC error code: unparseable frame
pub const RPC_PARSE_ERROR: i64 = -32700;
