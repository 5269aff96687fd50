use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

fn write_basic_hierarchy(root: &std::path::Path) {
    fs::write(root.join("root.json"), r#"{"overview":"root"}"#).unwrap();
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
}

#[test]
fn validate_succeeds_when_every_tool_resolves_a_server() {
    let temp = tempdir().unwrap();
    write_basic_hierarchy(temp.path());

    Command::cargo_bin("mcp-router")
        .expect("binary")
        .arg("validate")
        .arg("--hierarchy")
        .arg(temp.path())
        .arg("--servers")
        .arg(temp.path().join("servers.json"))
        .assert()
        .success()
        .stdout(contains("1 tool(s)"));
}

#[test]
fn validate_reports_unresolved_server_without_starting_a_server() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("root.json"), r#"{"overview":"root"}"#).unwrap();
    fs::write(
        temp.path().join("echo.json"),
        r#"{"tools": {"echo": {"description": "echoes", "server": "missing"}}}"#,
    )
    .unwrap();

    Command::cargo_bin("mcp-router")
        .expect("binary")
        .arg("validate")
        .arg("--hierarchy")
        .arg(temp.path())
        .arg("--servers")
        .arg(temp.path().join("servers.json"))
        .assert()
        .failure()
        .stderr(contains("unknown server \"missing\""));
}

#[test]
fn validate_is_fatal_when_root_json_is_missing() {
    let temp = tempdir().unwrap();

    Command::cargo_bin("mcp-router")
        .expect("binary")
        .arg("validate")
        .arg("--hierarchy")
        .arg(temp.path())
        .assert()
        .failure();
}

#[test]
fn tree_prints_overview_and_tool_names() {
    let temp = tempdir().unwrap();
    write_basic_hierarchy(temp.path());

    Command::cargo_bin("mcp-router")
        .expect("binary")
        .arg("tree")
        .arg("--hierarchy")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(contains("coding_tools - coding tools"))
        .stdout(contains("[find_symbol]"));
}
