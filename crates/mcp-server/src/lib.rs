//! The meta-tool dispatcher (C3): binds the Hierarchy Store and Server
//! Registry to the two tools an agent actually sees, `get_tools_in_category`
//! and `execute_tool`. Nothing downstream-specific lives here - this crate
//! only translates between the MCP wire shapes and the C1/C2 contracts.

mod error;

use std::sync::Arc;
use std::time::Duration;

use context_hierarchy::HierarchyStore;
use context_registry::{CancellationToken, ServerRegistry};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::service::RequestContext;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

pub use error::DispatchError;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetToolsInCategoryRequest {
    /// Dot-separated category path to browse; "" or "/" means the root.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteToolRequest {
    /// Fully-qualified dot path of the tool to invoke, e.g.
    /// "coding_tools.serena.find_symbol".
    pub tool_path: String,
    /// Arguments passed through to the downstream tool verbatim. A missing
    /// or non-object value is treated as the empty object (§4.3).
    #[serde(default)]
    pub arguments: Value,
}

/// Runs `fut` on its own task so a panicking handler body is caught
/// (§7's "Panic" row) instead of taking down the whole outward-facing MCP
/// server. The registry and hierarchy are never mutated by a tool
/// handler, so a caught panic leaves no partial state behind.
async fn guarded<T, Fut>(fut: Fut) -> Result<T, CallToolResult>
where
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(value) => Ok(value),
        Err(join_err) => {
            log::error!("tool handler panicked: {join_err}");
            Err(CallToolResult::error(vec![Content::text(
                "internal error while handling tool call",
            )]))
        }
    }
}

/// The outward-facing MCP service. Holds the two process-wide objects
/// (§9) the dispatcher borrows from: an immutable [`HierarchyStore`] and
/// the lazy [`ServerRegistry`]. `shutdown` is the registry's long-lived
/// cancellation context - cancelling it (on process shutdown) aborts any
/// in-flight downstream initialization without corrupting registry state.
#[derive(Clone)]
pub struct DispatcherService {
    hierarchy: Arc<HierarchyStore>,
    registry: Arc<ServerRegistry>,
    default_timeout: Duration,
    shutdown: CancellationToken,
    tool_router: ToolRouter<Self>,
}

impl DispatcherService {
    pub fn new(
        hierarchy: Arc<HierarchyStore>,
        registry: Arc<ServerRegistry>,
        default_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hierarchy,
            registry,
            default_timeout,
            shutdown,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl DispatcherService {
    #[tool(
        description = "Browse the tool hierarchy. Pass \"\" or \"/\" for the root, or a dot-separated \
                        category path (e.g. \"coding_tools.serena\") to list its children and the tools \
                        callable from that level. Use this before execute_tool to learn a tool's path."
    )]
    pub async fn get_tools_in_category(
        &self,
        Parameters(req): Parameters<GetToolsInCategoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let hierarchy = self.hierarchy.clone();
        let path = req.path;
        let outcome = match guarded(async move { hierarchy.get_tools_in_category(&path) }).await
        {
            Ok(outcome) => outcome,
            Err(panic_result) => return Ok(panic_result),
        };

        match outcome {
            Ok(view) => {
                let json = serde_json::to_string(&view).map_err(|e| {
                    McpError::internal_error(format!("failed to encode category view: {e}"), None)
                })?;
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            Err(err) => Ok(CallToolResult::error(vec![Content::text(err.to_string())])),
        }
    }

    #[tool(
        description = "Invoke a tool by its fully-qualified dot path, lazily connecting to its \
                        downstream MCP server on first use. `arguments` is passed through verbatim."
    )]
    pub async fn execute_tool(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(req): Parameters<ExecuteToolRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .execute_tool_inner(req.tool_path, req.arguments, context.ct)
            .await)
    }
}

impl DispatcherService {
    /// Body of `execute_tool`, factored out so it can be exercised directly
    /// with a plain [`CancellationToken`] instead of a live `RequestContext`
    /// (constructing one of those outside a real MCP session isn't
    /// practical). The outward `#[tool]` method supplies the caller's own
    /// request-scoped token via `context.ct`; `§5`'s 15 s default is a
    /// ceiling on top of it, not a replacement - whichever fires first wins.
    async fn execute_tool_inner(
        &self,
        tool_path: String,
        arguments: Value,
        request_cancel: CancellationToken,
    ) -> CallToolResult {
        if tool_path.trim().is_empty() {
            let err = DispatchError::InvalidArguments("tool_path must not be empty".to_string());
            return CallToolResult::error(vec![Content::text(err.to_string())]);
        }

        let hierarchy = self.hierarchy.clone();
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let default_timeout = self.default_timeout;

        match guarded(async move {
            execute_resolved(
                &hierarchy,
                &registry,
                &shutdown,
                &request_cancel,
                default_timeout,
                &tool_path,
                arguments,
            )
            .await
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(panic_result) => panic_result,
        }
    }
}

/// The body of `execute_tool` once argument validation has passed:
/// resolve the tool path (C1), obtain or lazily create a downstream
/// client (C2/C4), and relay its `CallTool` result untouched (§4.3).
///
/// `request_cancel` is the caller's own request-scoped cancellation context
/// (§5); it races directly against the downstream call so the caller's
/// cancellation wins even before `default_timeout` (the 15 s ceiling
/// `call_tool` itself enforces) would have elapsed.
async fn execute_resolved(
    hierarchy: &HierarchyStore,
    registry: &Arc<ServerRegistry>,
    shutdown: &CancellationToken,
    request_cancel: &CancellationToken,
    default_timeout: Duration,
    tool_path: &str,
    arguments: Value,
) -> CallToolResult {
    let (tool_def, server_name) = match hierarchy.resolve_tool_path(tool_path) {
        Ok(resolved) => resolved,
        Err(err) => return CallToolResult::error(vec![Content::text(err.to_string())]),
    };

    if server_name.is_empty() {
        return CallToolResult::error(vec![Content::text(format!(
            "tool \"{tool_path}\" has no downstream server configured"
        ))]);
    }

    let client = match registry.get_or_load(shutdown, &server_name).await {
        Ok(client) => client,
        Err(err) => return CallToolResult::error(vec![Content::text(err.to_string())]),
    };

    let fallback_name = tool_path.rsplit('.').next().unwrap_or(tool_path);
    let downstream_name = tool_def.downstream_name(fallback_name).to_string();

    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    tokio::select! {
        biased;
        _ = request_cancel.cancelled() => {
            CallToolResult::error(vec![Content::text(
                DispatchError::Cancelled(tool_path.to_string()).to_string(),
            )])
        }
        result = client.call_tool(&downstream_name, Some(arguments), default_timeout) => {
            match result {
                Ok(result) => result,
                Err(err) => CallToolResult::error(vec![Content::text(err.to_string())]),
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for DispatcherService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "This server exposes a browsable hierarchy of tools instead of a flat list. Call \
                 get_tools_in_category(\"\") to see top-level categories, drill down by dot path, \
                 then call execute_tool(tool_path, arguments) to run a leaf tool."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn dispatcher_over(dir: &std::path::Path) -> DispatcherService {
        let loaded = context_hierarchy::load_hierarchy(dir).unwrap();
        let registry = Arc::new(ServerRegistry::new(HashMap::new()));
        DispatcherService::new(
            Arc::new(loaded.store),
            registry,
            Duration::from_secs(15),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn get_tools_in_category_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.json"), r#"{"overview":"root"}"#).unwrap();
        let service = dispatcher_over(dir.path());

        let result = service
            .get_tools_in_category(Parameters(GetToolsInCategoryRequest {
                path: "nonexistent".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        let text = result.content[0].as_text().unwrap().text.clone();
        assert!(text.contains("nonexistent"));
        assert!(text.contains("not found"));
    }

    #[tokio::test]
    async fn execute_tool_rejects_empty_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.json"), r#"{"overview":"root"}"#).unwrap();
        let service = dispatcher_over(dir.path());

        let result = service
            .execute_tool_inner(String::new(), serde_json::json!({}), CancellationToken::new())
            .await;

        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn execute_tool_reports_missing_server_config_at_call_time() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.json"), r#"{"overview":"root"}"#).unwrap();
        fs::write(
            dir.path().join("echo.json"),
            r#"{"tools": {"echo": {"description": "echoes", "server": "serena"}}}"#,
        )
        .unwrap();
        let service = dispatcher_over(dir.path());

        let result = service
            .execute_tool_inner(
                "echo.echo".to_string(),
                serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.is_error, Some(true));
        let text = result.content[0].as_text().unwrap().text.clone();
        assert!(text.contains("serena"));
    }

}
