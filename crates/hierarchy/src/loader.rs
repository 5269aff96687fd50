use std::collections::BTreeMap;
use std::path::Path;

use context_protocol::{NodeFile, ServerConfig};
use walkdir::WalkDir;

use crate::error::LoadError;
use crate::store::{HierarchyNode, HierarchyStore};

/// Result of walking a hierarchy directory: the populated store plus any
/// server configs discovered inline via a node's `mcp_server` field. The
/// discovered table is a convenience; the authoritative server-config
/// table is still the one supplied separately to the registry.
pub struct LoadedHierarchy {
    pub store: HierarchyStore,
    pub discovered_servers: BTreeMap<String, ServerConfig>,
}

struct RawEntry {
    key: String,
    file: NodeFile,
    /// Ancestor keys, root-to-immediate-parent, used for `mcp_server`
    /// inheritance once every file has been read.
    ancestors: Vec<String>,
}

/// Walks `root_dir` per the discovery rule (C5) and builds a
/// [`HierarchyStore`]. `root.json` is mandatory; every other malformed
/// file is logged and skipped.
pub fn load_hierarchy(root_dir: &Path) -> Result<LoadedHierarchy, LoadError> {
    let root_json = root_dir.join("root.json");
    if !root_json.is_file() {
        return Err(LoadError::MissingRoot(root_dir.to_path_buf()));
    }

    let mut entries = Vec::new();

    for dirent in WalkDir::new(root_dir).into_iter() {
        let dirent = match dirent {
            Ok(d) => d,
            Err(err) => {
                log::warn!("skipping unreadable hierarchy entry: {err}");
                continue;
            }
        };
        if !dirent.file_type().is_file() {
            continue;
        }
        let path = dirent.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let key = if path == root_json {
            String::new()
        } else {
            match node_key_for(root_dir, path) {
                Some(k) => k,
                None => {
                    log::warn!("skipping hierarchy file outside root: {}", path.display());
                    continue;
                }
            }
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                log::warn!("skipping unreadable hierarchy file {}: {err}", path.display());
                continue;
            }
        };
        let file: NodeFile = match serde_json::from_str(&contents) {
            Ok(f) => f,
            Err(err) => {
                log::warn!("skipping malformed hierarchy file {}: {err}", path.display());
                continue;
            }
        };

        let ancestors = ancestor_keys(&key);
        entries.push(RawEntry {
            key,
            file,
            ancestors,
        });
    }

    if !entries.iter().any(|e| e.key.is_empty()) {
        return Err(LoadError::MissingRoot(root_dir.to_path_buf()));
    }

    let mut mcp_servers: BTreeMap<String, (String, ServerConfig)> = BTreeMap::new();
    for entry in &entries {
        if let Some(named) = &entry.file.mcp_server {
            mcp_servers.insert(entry.key.clone(), (named.name.clone(), named.config.clone()));
        }
    }

    let mut store = HierarchyStore::new();
    let mut discovered_servers = BTreeMap::new();
    for (_, (name, config)) in &mcp_servers {
        discovered_servers.insert(name.clone(), config.clone());
    }

    for entry in entries {
        let inherited_server = std::iter::once(&entry.key)
            .chain(entry.ancestors.iter().rev())
            .find_map(|k| mcp_servers.get(k))
            .map(|(name, _)| name.clone());

        let mut tools = entry.file.tools;
        if let Some(server_name) = &inherited_server {
            for def in tools.values_mut() {
                if def.server.is_empty() {
                    def.server = server_name.clone();
                }
            }
        }

        for (tool_name, def) in &tools {
            if def.server.is_empty() {
                let tool_path = if entry.key.is_empty() {
                    tool_name.clone()
                } else {
                    format!("{}.{tool_name}", entry.key)
                };
                log::warn!(
                    "tool \"{tool_path}\" has no server and no ancestor declares mcp_server; \
                     execute_tool will fail for it until one is configured"
                );
            }
        }

        store.insert(
            entry.key,
            HierarchyNode {
                overview: entry.file.overview,
                tools,
            },
        );
    }

    Ok(LoadedHierarchy {
        store,
        discovered_servers,
    })
}

/// Keys of every strict dot-prefix of `key`, root-to-parent order,
/// e.g. `"a.b.c"` -> `["", "a", "a.b"]`.
fn ancestor_keys(key: &str) -> Vec<String> {
    if key.is_empty() {
        return Vec::new();
    }
    let parts: Vec<&str> = key.split('.').collect();
    let mut out = vec![String::new()];
    for i in 1..parts.len() {
        out.push(parts[0..i].join("."));
    }
    out
}

/// Computes a node's dot-path key from its filesystem location, applying
/// the nested (`dir/dir.json`) vs. flat (`dir/tool.json`) convention.
fn node_key_for(root_dir: &Path, file_path: &Path) -> Option<String> {
    let rel = file_path.strip_prefix(root_dir).ok()?;
    let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
    let stem = rel.file_stem()?.to_str()?;

    let parent_basename = parent_rel
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let dot_parent = dotted(parent_rel);

    if !parent_basename.is_empty() && stem == parent_basename {
        Some(dot_parent)
    } else if dot_parent.is_empty() {
        Some(stem.to_string())
    } else {
        Some(format!("{dot_parent}.{stem}"))
    }
}

fn dotted(rel_dir: &Path) -> String {
    rel_dir
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn ancestor_keys_walks_root_to_parent() {
        assert_eq!(ancestor_keys(""), Vec::<String>::new());
        assert_eq!(ancestor_keys("a"), vec![""]);
        assert_eq!(ancestor_keys("a.b.c"), vec!["", "a", "a.b"]);
    }

    #[test]
    fn nested_convention_uses_directory_name() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("root.json"), r#"{"overview":"root"}"#).unwrap();
        fs::create_dir_all(root.join("serena")).unwrap();
        fs::write(
            root.join("serena/serena.json"),
            r#"{"overview":"serena tools"}"#,
        )
        .unwrap();

        let key = node_key_for(root, &root.join("serena/serena.json")).unwrap();
        assert_eq!(key, "serena");
    }

    #[test]
    fn flat_convention_uses_tool_basename() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("serena")).unwrap();
        let key = node_key_for(root, &root.join("serena/echo.json")).unwrap();
        assert_eq!(key, "serena.echo");
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempdir().unwrap();
        let err = load_hierarchy(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::MissingRoot(_)));
    }

    #[test]
    fn load_populates_store_and_inherits_server() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("root.json"),
            r#"{"overview":"root","tools":{}}"#,
        )
        .unwrap();
        fs::create_dir_all(root.join("coding_tools")).unwrap();
        fs::write(
            root.join("coding_tools/coding_tools.json"),
            r#"{
                "overview": "coding tools",
                "mcp_server": {"name": "serena", "type": "stdio", "command": "serena", "args": ["mcp"]}
            }"#,
        )
        .unwrap();
        fs::write(
            root.join("coding_tools/find_symbol.json"),
            r#"{"tools": {"find_symbol": {"description": "finds a symbol"}}}"#,
        )
        .unwrap();

        let loaded = load_hierarchy(root).unwrap();
        let view = loaded.store.get_tools_in_category("coding_tools").unwrap();
        assert!(view.children.contains_key("find_symbol"));

        let (def, server) = loaded
            .store
            .resolve_tool_path("coding_tools.find_symbol")
            .unwrap();
        assert_eq!(def.description.as_deref(), Some("finds a symbol"));
        assert_eq!(server, "serena");
        assert!(loaded.discovered_servers.contains_key("serena"));
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("root.json"), r#"{"overview":"root"}"#).unwrap();
        fs::create_dir_all(root.join("broken")).unwrap();
        fs::write(root.join("broken/broken.json"), "{not json").unwrap();

        let loaded = load_hierarchy(root).unwrap();
        assert!(!loaded.store.contains("broken"));
    }
}
