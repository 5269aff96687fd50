//! Ambient configuration for the router binary: where the hierarchy and
//! server-config table live on disk, how verbose to log, and the
//! `execute_tool` timeout override. None of this changes C1-C5's
//! semantics; it exists so the CLI has something to load before
//! constructing a [`context_hierarchy::HierarchyStore`] or
//! [`context_registry::ServerRegistry`].
//!
//! Precedence, lowest to highest: built-in defaults, a TOML config file,
//! environment variables, then whatever the CLI layer merges in from
//! flags (not this crate's concern - see `context-cli`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use context_protocol::ServerConfig;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_EXECUTE_TOOL_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse server-config table {path}: {source}")]
    ParseServers {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse server-config table {path} as toml: {source}")]
    ParseServersToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// A node that only fills in the fields a TOML file actually sets; every
/// field is optional so a config file can override as little or as much
/// as it wants.
#[derive(Debug, Default, Deserialize)]
struct RouterConfigFile {
    hierarchy_dir: Option<PathBuf>,
    servers_file: Option<PathBuf>,
    log_level: Option<String>,
    execute_tool_timeout_secs: Option<u64>,
}

/// Fully-resolved router configuration: where the hierarchy and
/// server-config table live, how verbose to log, and the `execute_tool`
/// deadline applied when the caller's own context carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub hierarchy_dir: PathBuf,
    pub servers_file: PathBuf,
    pub log_level: String,
    pub execute_tool_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            hierarchy_dir: PathBuf::from("hierarchy"),
            servers_file: PathBuf::from("servers.json"),
            log_level: "warn".to_string(),
            execute_tool_timeout_secs: DEFAULT_EXECUTE_TOOL_TIMEOUT_SECS,
        }
    }
}

impl RouterConfig {
    /// Loads defaults, applies `config_path` if given and present, then
    /// applies environment overrides (`MCP_ROUTER_*`). A missing
    /// `config_path` that was never explicitly requested is not an
    /// error - the router runs on env vars and flags alone.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let file: RouterConfigFile =
                    toml::from_str(&text).map_err(|source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                cfg.apply_file(file);
            } else {
                log::warn!("config file {} not found, using defaults", path.display());
            }
        }

        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: RouterConfigFile) {
        if let Some(v) = file.hierarchy_dir {
            self.hierarchy_dir = v;
        }
        if let Some(v) = file.servers_file {
            self.servers_file = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if let Some(v) = file.execute_tool_timeout_secs {
            self.execute_tool_timeout_secs = v;
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("MCP_ROUTER_HIERARCHY_DIR") {
            self.hierarchy_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MCP_ROUTER_SERVERS_FILE") {
            self.servers_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MCP_ROUTER_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("MCP_ROUTER_EXECUTE_TIMEOUT_SECS") {
            self.execute_tool_timeout_secs =
                v.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "MCP_ROUTER_EXECUTE_TIMEOUT_SECS",
                    value: v,
                })?;
        }
        Ok(())
    }
}

/// Loads the `server_name -> ServerConfig` table the registry is
/// constructed with. Format is sniffed from the extension: `.toml` parses
/// as TOML, anything else (including `.json` and extensionless) parses as
/// JSON, matching §6a.
pub fn load_server_configs(path: &Path) -> Result<BTreeMap<String, ServerConfig>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        toml::from_str(&text).map_err(|source| ConfigError::ParseServersToml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseServers {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_used_when_no_file_given() {
        let cfg = RouterConfig::load(None).unwrap();
        assert_eq!(cfg.execute_tool_timeout_secs, DEFAULT_EXECUTE_TOOL_TIMEOUT_SECS);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.toml");
        fs::write(
            &path,
            r#"
            hierarchy_dir = "my-hierarchy"
            execute_tool_timeout_secs = 30
            "#,
        )
        .unwrap();

        let cfg = RouterConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.hierarchy_dir, PathBuf::from("my-hierarchy"));
        assert_eq!(cfg.execute_tool_timeout_secs, 30);
        assert_eq!(cfg.servers_file, PathBuf::from("servers.json"));
    }

    #[test]
    fn missing_explicit_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let cfg = RouterConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg, RouterConfig::default());
    }

    #[test]
    fn server_table_json_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("servers.json");
        fs::write(
            &path,
            r#"{"serena": {"type": "stdio", "command": "serena", "args": ["mcp"]}}"#,
        )
        .unwrap();

        let table = load_server_configs(&path).unwrap();
        assert!(table.contains_key("serena"));
    }

    #[test]
    fn server_table_toml_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("servers.toml");
        fs::write(
            &path,
            r#"
            [serena]
            type = "stdio"
            command = "serena"
            args = ["mcp"]
            "#,
        )
        .unwrap();

        let table = load_server_configs(&path).unwrap();
        assert!(table.contains_key("serena"));
    }
}
