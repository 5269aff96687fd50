use std::collections::BTreeMap;

use context_protocol::{canonicalize_path, join_path, path_segments, ToolDefinition};
use serde::Serialize;

use crate::error::HierarchyError;

/// A single node of the tool hierarchy, keyed by its canonical dot-path
/// in [`HierarchyStore`]. A node is a leaf iff `tools` is non-empty; per
/// I3 a node may carry both tools and children.
#[derive(Debug, Clone, Default)]
pub struct HierarchyNode {
    pub overview: Option<String>,
    pub tools: BTreeMap<String, ToolDefinition>,
}

impl HierarchyNode {
    pub fn is_leaf(&self) -> bool {
        !self.tools.is_empty()
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChildSummary {
    Leaf { is_leaf: bool, tool_count: usize },
    Branch { overview: Option<String> },
}

#[derive(Debug, Serialize)]
pub struct ToolView {
    pub description: Option<String>,
    pub tool_path: String,
}

#[derive(Debug, Serialize)]
pub struct CategoryView {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ChildSummary>,
    pub tools: BTreeMap<String, ToolView>,
}

/// Flat `path -> node` map built once at startup and never mutated
/// thereafter (I1, I2). `""` and `"/"` both resolve to the root.
#[derive(Debug, Default)]
pub struct HierarchyStore {
    nodes: BTreeMap<String, HierarchyNode>,
}

impl HierarchyStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), HierarchyNode::default());
        Self { nodes }
    }

    /// Insert a node at `path`, overwriting any previous node at that key.
    pub fn insert(&mut self, path: impl Into<String>, node: HierarchyNode) {
        self.nodes.insert(path.into(), node);
    }

    pub fn get(&self, path: &str) -> Option<&HierarchyNode> {
        self.nodes.get(&canonicalize_path(path))
    }

    pub fn root(&self) -> &HierarchyNode {
        self.nodes
            .get("")
            .expect("root node always present by construction (I2)")
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(&canonicalize_path(path))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Direct child segments of `path`, in the flat map's key order.
    fn direct_children(&self, path: &str) -> Vec<(&str, &HierarchyNode)> {
        fn segment_count(key: &str) -> usize {
            if key.is_empty() {
                0
            } else {
                key.matches('.').count() + 1
            }
        }
        let depth = segment_count(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}.")
        };
        self.nodes
            .iter()
            .filter(|(k, _)| {
                !k.is_empty()
                    && k.starts_with(&prefix)
                    && segment_count(k) == depth + 1
            })
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// `get_tools_in_category` (C1): view of `path` with its overview,
    /// direct children summaries, and the tools callable from this level
    /// (its own, or the aggregated tools of all-leaf children).
    pub fn get_tools_in_category(&self, path: &str) -> Result<CategoryView, HierarchyError> {
        let canon = canonicalize_path(path);
        let node = self
            .nodes
            .get(&canon)
            .ok_or_else(|| HierarchyError::PathNotFound(path.to_string()))?;

        let direct = self.direct_children(&canon);
        let mut children = BTreeMap::new();
        for (child_path, child_node) in &direct {
            let segment = child_path
                .rsplit('.')
                .next()
                .unwrap_or(child_path)
                .to_string();
            let summary = if child_node.is_leaf() {
                ChildSummary::Leaf {
                    is_leaf: true,
                    tool_count: child_node.tools.len(),
                }
            } else {
                ChildSummary::Branch {
                    overview: child_node.overview.clone(),
                }
            };
            children.insert(segment, summary);
        }

        let tools = if !node.tools.is_empty() {
            node.tools
                .iter()
                .map(|(name, def)| {
                    (
                        name.clone(),
                        ToolView {
                            description: def.description.clone(),
                            tool_path: join_path(&canon, name),
                        },
                    )
                })
                .collect()
        } else if !direct.is_empty() && direct.iter().all(|(_, n)| n.is_leaf()) {
            let mut aggregated = BTreeMap::new();
            for (child_path, child_node) in &direct {
                for (name, def) in &child_node.tools {
                    aggregated.insert(
                        name.clone(),
                        ToolView {
                            description: def.description.clone(),
                            tool_path: join_path(child_path, name),
                        },
                    );
                }
            }
            aggregated
        } else {
            BTreeMap::new()
        };

        Ok(CategoryView {
            path: canon,
            overview: node.overview.clone(),
            children,
            tools,
        })
    }

    /// `resolve_tool_path` (C1): direct leaf match first, then a
    /// progressive prefix search walking back toward the root.
    pub fn resolve_tool_path(
        &self,
        tool_path: &str,
    ) -> Result<(ToolDefinition, String), HierarchyError> {
        let parts = path_segments(tool_path);
        if parts.is_empty() {
            return Err(HierarchyError::InvalidPath(tool_path.to_string()));
        }
        let last = *parts.last().unwrap();

        let whole = canonicalize_path(tool_path);
        if let Some(node) = self.nodes.get(&whole) {
            if let Some(def) = node.tools.get(last) {
                return Ok((def.clone(), def.server.clone()));
            }
        }

        for i in (0..parts.len()).rev() {
            let category = parts[0..i].join(".");
            if let Some(node) = self.nodes.get(&category) {
                if let Some(def) = node.tools.get(last) {
                    return Ok((def.clone(), def.server.clone()));
                }
            }
        }

        Err(HierarchyError::ToolNotFound(tool_path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tool(desc: &str) -> ToolDefinition {
        ToolDefinition {
            description: Some(desc.to_string()),
            maps_to: None,
            server: "serena".to_string(),
            input_schema: None,
        }
    }

    fn store_with_branches() -> HierarchyStore {
        let mut store = HierarchyStore::new();
        store.insert(
            "",
            HierarchyNode {
                overview: Some("root overview".to_string()),
                tools: BTreeMap::new(),
            },
        );
        store.insert(
            "coding_tools",
            HierarchyNode {
                overview: Some("coding tools".to_string()),
                tools: BTreeMap::new(),
            },
        );
        store.insert(
            "web_tools",
            HierarchyNode {
                overview: Some("web tools".to_string()),
                tools: BTreeMap::new(),
            },
        );
        store
    }

    #[test]
    fn root_discovery_lists_branch_children() {
        let store = store_with_branches();
        let view = store.get_tools_in_category("").unwrap();
        assert_eq!(view.path, "");
        assert_eq!(view.overview.as_deref(), Some("root overview"));
        assert_eq!(view.children.len(), 2);
        assert!(view.tools.is_empty());
    }

    #[test]
    fn root_aliases_agree() {
        let store = store_with_branches();
        let a = store.get_tools_in_category("").unwrap();
        let b = store.get_tools_in_category("/").unwrap();
        assert_eq!(a.path, b.path);
        assert_eq!(a.children.len(), b.children.len());
    }

    #[test]
    fn all_leaf_children_aggregate_upward() {
        let mut store = HierarchyStore::new();
        store.insert("", HierarchyNode::default());
        store.insert(
            "serena",
            HierarchyNode {
                overview: Some("serena tools".to_string()),
                tools: BTreeMap::new(),
            },
        );
        let mut echo_tools = BTreeMap::new();
        echo_tools.insert("echo".to_string(), tool("echoes input"));
        store.insert(
            "serena.echo",
            HierarchyNode {
                overview: None,
                tools: echo_tools,
            },
        );
        let mut add_tools = BTreeMap::new();
        add_tools.insert("add".to_string(), tool("adds numbers"));
        store.insert(
            "serena.add",
            HierarchyNode {
                overview: None,
                tools: add_tools,
            },
        );

        let view = store.get_tools_in_category("serena").unwrap();
        assert_eq!(view.tools.len(), 2);
        assert_eq!(view.tools["echo"].tool_path, "serena.echo.echo");
        assert_eq!(view.tools["add"].tool_path, "serena.add.add");
    }

    #[test]
    fn mixed_children_do_not_aggregate() {
        let mut store = HierarchyStore::new();
        store.insert("", HierarchyNode::default());
        store.insert("serena", HierarchyNode::default());
        let mut leaf_tools = BTreeMap::new();
        leaf_tools.insert("echo".to_string(), tool("echoes"));
        store.insert(
            "serena.echo",
            HierarchyNode {
                overview: None,
                tools: leaf_tools,
            },
        );
        store.insert(
            "serena.nested",
            HierarchyNode {
                overview: Some("nested branch".to_string()),
                tools: BTreeMap::new(),
            },
        );

        let view = store.get_tools_in_category("serena").unwrap();
        assert!(view.tools.is_empty());
        assert_eq!(view.children.len(), 2);
    }

    #[test]
    fn path_not_found_message_contains_path() {
        let store = store_with_branches();
        let err = store.get_tools_in_category("nonexistent").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("nonexistent"));
        assert!(message.contains("not found"));
    }

    #[test]
    fn resolve_direct_leaf_match() {
        let mut store = HierarchyStore::new();
        store.insert("", HierarchyNode::default());
        store.insert("serena", HierarchyNode::default());
        let mut tools = BTreeMap::new();
        tools.insert("echo".to_string(), tool("echoes"));
        store.insert(
            "serena.echo",
            HierarchyNode {
                overview: None,
                tools,
            },
        );

        let (def, server) = store.resolve_tool_path("serena.echo").unwrap();
        assert_eq!(def.description.as_deref(), Some("echoes"));
        assert_eq!(server, "serena");
    }

    #[test]
    fn resolve_progressive_prefix_search() {
        let mut store = HierarchyStore::new();
        store.insert("", HierarchyNode::default());
        store.insert("coding_tools", HierarchyNode::default());
        store.insert("coding_tools.serena", HierarchyNode::default());
        let mut tools = BTreeMap::new();
        tools.insert("find_symbol".to_string(), tool("finds a symbol"));
        store.insert(
            "coding_tools.serena.search",
            HierarchyNode {
                overview: None,
                tools,
            },
        );

        let (def, _) = store
            .resolve_tool_path("coding_tools.serena.search.search_symbol.find_symbol")
            .unwrap();
        assert_eq!(def.description.as_deref(), Some("finds a symbol"));
    }

    #[test]
    fn resolve_unknown_tool_errors() {
        let store = store_with_branches();
        let err = store.resolve_tool_path("coding_tools.missing").unwrap_err();
        assert!(matches!(err, HierarchyError::ToolNotFound(_)));
    }
}
