//! Shared wire and on-disk types for the hierarchical MCP router.
//!
//! Every other crate in the workspace depends on this one for the node
//! schema, the tool definition shape, and the downstream server-config
//! variants. Nothing here talks to disk or to a transport; it is pure
//! data plus the small amount of path arithmetic both the loader and the
//! dispatcher need.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A transport-tagged reference to a downstream MCP server.
///
/// Deserializes from the `mcp_server` object in a hierarchy file or from
/// an entry in the server-config table, e.g.:
///
/// ```json
/// { "name": "serena", "type": "stdio", "command": "serena", "args": ["mcp"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerConfig {
    Stdio {
        #[serde(default)]
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    #[serde(rename = "streamable-http")]
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl ServerConfig {
    pub fn transport_name(&self) -> &'static str {
        match self {
            ServerConfig::Stdio { .. } => "stdio",
            ServerConfig::Sse { .. } => "sse",
            ServerConfig::StreamableHttp { .. } => "streamable-http",
        }
    }

    /// True for transports that need an explicit `Start` before `Initialize`.
    pub fn needs_manual_start(&self) -> bool {
        !matches!(self, ServerConfig::Stdio { .. })
    }

    /// True for transports whose liveness we track with a background ping loop.
    pub fn needs_ping(&self) -> bool {
        !matches!(self, ServerConfig::Stdio { .. })
    }

    /// Construction-time validation independent of any transport being reachable.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ServerConfig::Stdio { command, .. } if command.trim().is_empty() => {
                Err("stdio server config has an empty command".to_string())
            }
            ServerConfig::Sse { url, .. } | ServerConfig::StreamableHttp { url, .. }
                if url.trim().is_empty() =>
            {
                Err("server config has an empty url".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Named entry in the on-disk `mcp_server` field, carrying both the
/// server's registry key and its transport config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NamedServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub config: ServerConfig,
}

/// A tool as declared inside a hierarchy node file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ToolDefinition {
    #[serde(default)]
    pub description: Option<String>,
    /// Downstream tool name to invoke; defaults to the hierarchy tool name.
    #[serde(default)]
    pub maps_to: Option<String>,
    /// Downstream server key. Populated at load time from an ancestor's
    /// `mcp_server` if the file itself leaves this blank.
    #[serde(default)]
    pub server: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,
}

impl ToolDefinition {
    /// The name actually sent to the downstream server for a tool whose
    /// hierarchy name is `name`.
    pub fn downstream_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.maps_to.as_deref().unwrap_or(name)
    }
}

/// The raw shape of a single `*.json` hierarchy file, as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct NodeFile {
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub mcp_server: Option<NamedServerConfig>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDefinition>,
}

/// Split a dot-path into segments, treating `""` and `"/"` as the root
/// (zero segments).
pub fn path_segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('.');
    if trimmed.is_empty() || trimmed == "/" {
        return Vec::new();
    }
    trimmed.split('.').filter(|s| !s.is_empty()).collect()
}

/// Canonical string form of a path: `""` for the root, dot-joined otherwise.
pub fn canonicalize_path(path: &str) -> String {
    path_segments(path).join(".")
}

pub fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}
