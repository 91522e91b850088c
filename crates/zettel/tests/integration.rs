use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn zk_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("zk");
    path
}

const ALPHA: &str = "---
id: 1
title: Alpha
type: project
tags: [rust]
---
# Alpha

Parser work.

## Log

- [ ] 2024-01-05 - write tests #next
- [x] 2024-01-04 10:00 - spike ✅ 2024-01-04
";

const BETA: &str = "---
id: 2
title: Beta
type: note
---
# Beta

Reading notes.
";

const GAMMA: &str = "---
id: 3
title: Gamma
type: project
---
# Gamma
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let notes_dir = root.join("notes");
    fs::create_dir_all(&notes_dir).unwrap();
    fs::write(notes_dir.join("alpha.md"), ALPHA).unwrap();
    fs::write(notes_dir.join("beta.md"), BETA).unwrap();
    fs::write(notes_dir.join("gamma.md"), GAMMA).unwrap();

    let config_content = format!(
        r#"[notes]
directory = "{root}/notes"
extensions = ["md"]

[cache]
path = "{root}/cache"

[query]
default_format = "table"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("zk.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_zk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = zk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("ZK_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run zk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

const PROJECTS: &str =
    "{filter: {field: type, op: eq, value: project}, columns: [id, title], sort: [{field: id}]}";

#[test]
fn test_query_json() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_zk(&config, &["query", PROJECTS, "--format", "json"]);
    assert!(success, "query failed: {}", stderr);

    let rows: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["id"], 1);
    assert_eq!(rows[0]["title"], "Alpha");
    assert_eq!(rows[1]["id"], 3);
}

#[test]
fn test_query_table_is_default_format() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_zk(&config, &["query", PROJECTS]);
    assert!(success, "query failed: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "ID  TITLE");
    assert_eq!(lines[2], "1   Alpha");
    assert_eq!(lines[3], "3   Gamma");
}

#[test]
fn test_query_csv_with_limit_override() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_zk(
        &config,
        &["query", PROJECTS, "--format", "csv", "--limit", "1", "--no-cache"],
    );
    assert!(success);
    assert_eq!(stdout, "id,title\r\n1,Alpha\r\n");
}

#[test]
fn test_query_populates_cache_and_stays_consistent() {
    let (tmp, config) = setup_test_env();
    let (first, _, success) = run_zk(&config, &["query", PROJECTS, "--format", "json"]);
    assert!(success);

    let blobs: Vec<_> = fs::read_dir(tmp.path().join("cache"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bin"))
        .collect();
    assert_eq!(blobs.len(), 1, "expected one cache blob for the notes dir");

    let (second, stderr, success) = run_zk(&config, &["query", PROJECTS, "--format", "json"]);
    assert!(success);
    assert_eq!(first, second);
    assert!(!stderr.contains("notes changed"));
}

#[test]
fn test_query_reports_stale_cache() {
    let (tmp, config) = setup_test_env();
    let (_, _, success) = run_zk(&config, &["query", PROJECTS]);
    assert!(success);

    fs::write(
        tmp.path().join("notes/delta.md"),
        "---\nid: 4\ntitle: Delta\ntype: project\n---\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_zk(&config, &["query", PROJECTS, "--format", "csv"]);
    assert!(success);
    assert_eq!(stdout.lines().count(), 3, "served from the old cache");
    assert!(stderr.contains("notes changed"), "stderr: {}", stderr);

    let (stdout, _, _) = run_zk(&config, &["query", PROJECTS, "--format", "csv"]);
    assert_eq!(stdout.lines().count(), 4);
}

#[test]
fn test_query_spec_file_writes_output_file() {
    let (tmp, config) = setup_test_env();
    let out = tmp.path().join("out/projects.md");
    let spec_path = tmp.path().join("projects.yaml");
    fs::write(
        &spec_path,
        format!(
            "filter: {{ field: type, op: eq, value: project }}\ncolumns: [title]\nsort: [{{ field: title }}]\noutput:\n  format: markdown\n  file: {}\n",
            out.display()
        ),
    )
    .unwrap();

    let (stdout, stderr, success) = run_zk(&config, &["query", spec_path.to_str().unwrap()]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Wrote 2 row(s)"));
    assert_eq!(
        fs::read_to_string(out).unwrap(),
        "| title |\n| --- |\n| Alpha |\n| Gamma |\n"
    );
}

#[test]
fn test_query_invalid_spec() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_zk(&config, &["query", "columns: [{}]"]);
    assert!(!success);
    assert!(stderr.contains("Invalid inline query spec"), "stderr: {}", stderr);
}

#[test]
fn test_query_without_directory() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("zk.toml");
    fs::write(&config, "[cache]\nenabled = false\n").unwrap();
    let (_, stderr, success) = run_zk(&config, &["query", "columns: [id]"]);
    assert!(!success);
    assert!(stderr.contains("no source directory"), "stderr: {}", stderr);
}

#[test]
fn test_show_project_note() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/alpha.md");
    let (stdout, stderr, success) = run_zk(&config, &["show", path.to_str().unwrap()]);
    assert!(success, "show failed: {}", stderr);

    let note: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(note["variant"], "project");
    assert_eq!(note["metadata"]["title"], "Alpha");
    assert_eq!(note["metadata"]["id"], 1);
    assert_eq!(note["log"].as_array().unwrap().len(), 2);
    assert_eq!(note["log"][0]["status"], "open");
    let warnings = note["warnings"].as_array().unwrap();
    assert!(warnings
        .iter()
        .any(|w| w.as_str().unwrap().contains("open_no_dates")));
}

#[test]
fn test_show_plain_note_has_no_log() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/beta.md");
    let (stdout, _, success) = run_zk(&config, &["show", path.to_str().unwrap()]);
    assert!(success);
    let note: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(note["variant"], "note");
    assert!(note.get("log").is_none());
}

#[test]
fn test_show_missing_file() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/nope.md");
    let (_, stderr, success) = run_zk(&config, &["show", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_fmt_write_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/messy.md");
    fs::write(&path, "---\ntitle:    Messy\n---\n# Messy\n\nbody\n").unwrap();
    let arg = path.to_str().unwrap();

    let (printed, _, success) = run_zk(&config, &["fmt", arg]);
    assert!(success);
    assert!(printed.contains("title: Messy"));

    let (stdout, _, success) = run_zk(&config, &["fmt", arg, "--write"]);
    assert!(success);
    assert!(stdout.starts_with("formatted"));
    assert_eq!(fs::read_to_string(&path).unwrap(), printed);

    let (stdout, _, success) = run_zk(&config, &["fmt", arg, "--write"]);
    assert!(success);
    assert!(stdout.starts_with("unchanged"));
}

#[test]
fn test_fmt_malformed_front_matter() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/broken.md");
    fs::write(&path, "---\ntitle: x\n").unwrap();
    let (_, _, success) = run_zk(&config, &["fmt", path.to_str().unwrap()]);
    assert!(!success);
}

#[test]
fn test_log_lists_entries_and_warnings() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/alpha.md");
    let (stdout, stderr, success) = run_zk(&config, &["log", path.to_str().unwrap()]);
    assert!(success, "log failed: {}", stderr);

    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].starts_with("2024-01-05"));
    assert!(lines[0].contains("open"));
    assert!(lines[0].contains("write tests"));
    assert!(lines[1].starts_with("2024-01-04 10:00"));
    assert!(lines[1].contains("done"));
    assert!(stdout.contains("Warnings:"));
    assert!(stdout.contains("open_no_dates"));
}

#[test]
fn test_log_rejects_plain_note() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes/beta.md");
    let (_, stderr, success) = run_zk(&config, &["log", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("not a project note"));
}

#[test]
fn test_cache_refresh() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_zk(&config, &["cache", "refresh"]);
    assert!(success, "refresh failed: {}", stderr);
    assert!(stdout.contains("Cached 3 note(s)"));
    assert!(stdout.contains(&tmp.path().join("cache").display().to_string()));

    let other = tmp.path().join("other");
    fs::create_dir_all(&other).unwrap();
    fs::write(other.join("x.md"), "---\nid: 9\n---\n").unwrap();
    let (stdout, _, success) = run_zk(
        &config,
        &["cache", "refresh", "--dir", other.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("Cached 1 note(s)"));
}

#[test]
fn test_bad_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("zk.toml");
    fs::write(&config, "[query]\ndefault_format = \"yaml\"\n").unwrap();
    let (_, _, success) = run_zk(&config, &["query", "columns: [id]"]);
    assert!(!success);
}
