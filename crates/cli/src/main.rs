//! Operator CLI for the hierarchical MCP router.
//!
//! `serve` runs the router itself (the two meta-tools, over stdio).
//! `validate` and `tree` are read-only debugging aids that never touch the
//! Server Registry - no downstream process is spawned by either (§9,
//! "Decision: CLI shape").

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use context_config::{load_server_configs, RouterConfig};
use context_hierarchy::{load_hierarchy, HierarchyStore};
use context_mcp::DispatcherService;
use context_protocol::{join_path, ServerConfig};
use context_registry::{CancellationToken, ServerRegistry};
use rmcp::transport::stdio;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "mcp-router")]
#[command(about = "Hierarchical MCP router: a browsable tool tree plus lazy downstream connections", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file; CLI flags still override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router's MCP server over stdio.
    Serve(HierarchyArgs),
    /// Load the hierarchy and server-config table, report problems, exit.
    Validate(HierarchyArgs),
    /// Print the loaded hierarchy as indented text.
    Tree {
        /// Directory holding root.json and the rest of the hierarchy tree.
        #[arg(long)]
        hierarchy: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
struct HierarchyArgs {
    /// Directory holding root.json and the rest of the hierarchy tree.
    #[arg(long)]
    hierarchy: Option<PathBuf>,

    /// JSON or TOML file mapping server name -> transport config.
    #[arg(long)]
    servers: Option<PathBuf>,

    /// execute_tool timeout override, in seconds (default 15, per §4.3).
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn resolve_config(cli_config: Option<&PathBuf>, args: &HierarchyArgs) -> Result<RouterConfig> {
    let mut cfg = RouterConfig::load(cli_config.map(|p| p.as_path()))?;
    if let Some(dir) = &args.hierarchy {
        cfg.hierarchy_dir = dir.clone();
    }
    if let Some(file) = &args.servers {
        cfg.servers_file = file.clone();
    }
    if let Some(secs) = args.timeout_secs {
        cfg.execute_tool_timeout_secs = secs;
    }
    Ok(cfg)
}

/// stdout is reserved for the stdio MCP transport; everything the router
/// logs goes to stderr, matching the teacher's `main.rs` convention.
fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve(args) => {
            let cfg = resolve_config(cli.config.as_ref(), args)?;
            init_logging(&cfg.log_level);
            serve(cfg).await
        }
        Commands::Validate(args) => {
            let cfg = resolve_config(cli.config.as_ref(), args)?;
            init_logging(&cfg.log_level);
            validate(&cfg)
        }
        Commands::Tree { hierarchy } => {
            let dir = hierarchy
                .clone()
                .unwrap_or_else(|| RouterConfig::default().hierarchy_dir);
            print_tree(&dir)
        }
    }
}

/// Merges the loader's inline `mcp_server` discoveries under the
/// explicit server-config table, which wins on conflict (the external
/// table is authoritative; inline declarations are loader-side sugar).
fn merged_servers(
    explicit: BTreeMap<String, ServerConfig>,
    discovered: BTreeMap<String, ServerConfig>,
) -> HashMap<String, ServerConfig> {
    let mut merged: HashMap<String, ServerConfig> = discovered.into_iter().collect();
    merged.extend(explicit);
    merged
}

fn load_servers_file(path: &PathBuf) -> Result<BTreeMap<String, ServerConfig>> {
    if !path.exists() {
        log::warn!("server-config table {} not found, using only inline mcp_server declarations", path.display());
        return Ok(BTreeMap::new());
    }
    load_server_configs(path)
        .with_context(|| format!("loading server config table from {}", path.display()))
}

async fn serve(cfg: RouterConfig) -> Result<()> {
    let loaded = load_hierarchy(&cfg.hierarchy_dir)
        .with_context(|| format!("loading hierarchy from {}", cfg.hierarchy_dir.display()))?;
    let explicit = load_servers_file(&cfg.servers_file)?;
    let servers = merged_servers(explicit, loaded.discovered_servers);

    let hierarchy = Arc::new(loaded.store);
    let registry = Arc::new(ServerRegistry::new(servers));
    let shutdown = CancellationToken::new();

    let service = DispatcherService::new(
        hierarchy,
        registry.clone(),
        Duration::from_secs(cfg.execute_tool_timeout_secs),
        shutdown.clone(),
    );

    log::info!(
        "starting mcp-router over stdio (hierarchy: {}, servers: {})",
        cfg.hierarchy_dir.display(),
        cfg.servers_file.display()
    );
    let server = service.serve(stdio()).await.context("starting stdio MCP transport")?;
    server.waiting().await.context("running MCP server loop")?;

    shutdown.cancel();
    registry.close_all().await;
    log::info!("mcp-router stopped");
    Ok(())
}

fn validate(cfg: &RouterConfig) -> Result<()> {
    let loaded = load_hierarchy(&cfg.hierarchy_dir)
        .with_context(|| format!("loading hierarchy from {}", cfg.hierarchy_dir.display()))?;
    let explicit = load_servers_file(&cfg.servers_file)?;
    let servers = merged_servers(explicit, loaded.discovered_servers.clone());

    let mut problems = Vec::new();
    let mut tool_count = 0usize;
    for key in loaded.store.keys() {
        let node = loaded
            .store
            .get(key)
            .expect("key enumerated from the store must resolve in the store");
        for (name, def) in &node.tools {
            tool_count += 1;
            let tool_path = join_path(key, name);
            if def.server.is_empty() {
                problems.push(format!("tool \"{tool_path}\" has no server configured"));
            } else if !servers.contains_key(&def.server) {
                problems.push(format!(
                    "tool \"{tool_path}\" references unknown server \"{}\"",
                    def.server
                ));
            }
        }
    }

    if problems.is_empty() {
        println!(
            "hierarchy ok: {} node(s), {} tool(s), {} server(s) configured",
            loaded.store.keys().count(),
            tool_count,
            servers.len()
        );
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("error: {problem}");
        }
        anyhow::bail!("{} problem(s) found", problems.len());
    }
}

fn print_tree(hierarchy_dir: &PathBuf) -> Result<()> {
    let loaded = load_hierarchy(hierarchy_dir)
        .with_context(|| format!("loading hierarchy from {}", hierarchy_dir.display()))?;
    print_node(&loaded.store, "", 0);
    Ok(())
}

/// Prints `path`'s own overview and directly-attached tools (not the
/// aggregated view `get_tools_in_category` would return - that would
/// print a leaf child's tools twice, once aggregated and once under the
/// child itself), then recurses into its children.
fn print_node(store: &HierarchyStore, path: &str, depth: usize) {
    let Some(node) = store.get(path) else {
        return;
    };
    let Ok(view) = store.get_tools_in_category(path) else {
        return;
    };

    let indent = "  ".repeat(depth);
    let label = if path.is_empty() {
        "/"
    } else {
        path.rsplit('.').next().unwrap_or(path)
    };
    match &node.overview {
        Some(overview) => println!("{indent}{label} - {overview}"),
        None => println!("{indent}{label}"),
    }
    for name in node.tools.keys() {
        println!("{indent}  [{name}]");
    }

    for child in view.children.keys() {
        let child_path = if path.is_empty() {
            child.clone()
        } else {
            join_path(path, child)
        };
        print_node(store, &child_path, depth + 1);
    }
}
