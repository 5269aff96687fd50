use std::sync::Arc;
use std::time::Duration;

use context_protocol::ServerConfig;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::sse_client::{SseClientTransport, SseClientTransportConfig};
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use tokio::process::Command;

use crate::error::RegistryError;

/// A live connection to one downstream MCP server (C4), polymorphic over
/// transport. Each variant exclusively owns its transport resource
/// (subprocess handle or HTTP client) and is dropped (closing the
/// transport) when the registry evicts it.
pub struct DownstreamClient {
    name: String,
    service: RunningService<RoleClient, ()>,
}

/// Test-only instrumentation for the registry's concurrency tests, which
/// need to observe how many times `connect` actually ran and to make a
/// single attempt slow enough to cancel mid-flight. Neither static has any
/// effect outside `#[cfg(test)]` builds.
#[cfg(test)]
pub(crate) static CONNECT_ATTEMPTS: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
pub(crate) static CONNECT_DELAY_MS: std::sync::atomic::AtomicU64 =
    std::sync::atomic::AtomicU64::new(0);

impl DownstreamClient {
    /// Constructs and initializes a client for `config`. stdio transports
    /// complete in one step (spawn + `Initialize`); SSE and
    /// streamable-HTTP transports need an explicit start before the
    /// handshake, matching §4.4's `needs_manual_start`.
    pub async fn connect(name: &str, config: &ServerConfig) -> Result<Self, RegistryError> {
        #[cfg(test)]
        {
            CONNECT_ATTEMPTS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let delay = CONNECT_DELAY_MS.load(std::sync::atomic::Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        config
            .validate()
            .map_err(|reason| RegistryError::InvalidConfig {
                name: name.to_string(),
                reason,
            })?;

        let service = match config {
            ServerConfig::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }
                let transport =
                    TokioChildProcess::new(cmd).map_err(|e| RegistryError::ConstructFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                ().serve(transport)
                    .await
                    .map_err(|e| RegistryError::InitFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?
            }
            ServerConfig::Sse { url, headers } => {
                let mut cfg = SseClientTransportConfig::with_uri(url.clone());
                if let Some(token) = bearer_token(headers) {
                    cfg = cfg.auth_header(token);
                }
                let transport = SseClientTransport::start_with_config(cfg)
                    .await
                    .map_err(|e| RegistryError::StartFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                ().serve(transport)
                    .await
                    .map_err(|e| RegistryError::InitFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?
            }
            ServerConfig::StreamableHttp {
                url,
                headers,
                timeout_secs,
            } => {
                let mut cfg = StreamableHttpClientTransportConfig::with_uri(url.clone());
                if let Some(token) = bearer_token(headers) {
                    cfg = cfg.auth_header(token);
                }
                if let Some(secs) = timeout_secs {
                    cfg = cfg.timeout(Duration::from_secs(*secs));
                }
                let transport = StreamableHttpClientTransport::from_config(cfg);
                ().serve(transport)
                    .await
                    .map_err(|e| RegistryError::InitFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        Ok(Self {
            name: name.to_string(),
            service,
        })
    }

    /// Invokes `tool_name` on the downstream server, bounded by
    /// `timeout`. The caller (C3) derives `timeout` from its own
    /// deadline, defaulting to 15 seconds.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        timeout: Duration,
    ) -> Result<rmcp::model::CallToolResult, RegistryError> {
        let request = CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments,
        };
        match tokio::time::timeout(timeout, self.service.call_tool(request)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(RegistryError::CallFailed {
                server: self.name.clone(),
                reason: err.to_string(),
            }),
            Err(_) => Err(RegistryError::Timeout(self.name.clone())),
        }
    }

    /// Liveness probe used by the registry's background ping loop. MCP's
    /// ping is a cheap round trip; listing tools exercises the same path
    /// and additionally catches a downstream tool-set change.
    pub async fn ping(&self) -> Result<(), RegistryError> {
        self.service
            .list_all_tools()
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::CallFailed {
                server: self.name.clone(),
                reason: e.to_string(),
            })
    }

    pub async fn close(self: Arc<Self>) {
        let name = self.name.clone();
        // `close_all` may race an in-flight `execute_tool` call still holding
        // its own clone of the client; that caller's `Arc` keeps the service
        // alive until it finishes, so `try_unwrap` failing is routine, not a
        // bug - but it must still be logged per §4.2's "errors logged".
        let other_refs = Arc::strong_count(&self) - 1;
        match Arc::try_unwrap(self) {
            Ok(this) => {
                if let Err(err) = this.service.cancel().await {
                    log::warn!("error closing downstream client \"{name}\": {err}");
                }
            }
            Err(_) => {
                log::warn!(
                    "could not close downstream client \"{name}\": still held by {other_refs} \
                     in-flight caller(s); transport will close once they finish"
                );
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
