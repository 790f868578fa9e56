//! End-to-end tests for the `bugferry` binary against mocked trackers.

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn bugferry_cmd(config_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bugferry"));
    cmd.arg("--config-dir").arg(config_dir);
    cmd.env("BUGFERRY_LOG", "error");
    cmd.env_remove("GITLAB_TOKEN");
    cmd.env_remove("BUGZILLA_PASSWORD");
    cmd.env_remove("BUGZILLA_API_KEY");
    cmd
}

fn config_dir(defaults: &str) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("defaults.yml"), defaults).expect("write defaults");
    dir
}

fn json_stdout(output: &std::process::Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
}

const BUG_7: &str = r#"{
    "bug_id": 7,
    "title": "Crash on start",
    "reporter": {"login": "alice@example.com", "name": "Alice Doe"},
    "assignee": {"login": "alice@example.com"},
    "status": "NEW",
    "severity": "normal",
    "created_at": "2019-05-01T08:00:00+00:00",
    "modified_at": "2019-05-02T09:00:00+00:00",
    "comments": [
        {"index": 0, "author": {"login": "alice@example.com"}, "created_at": "2019-05-01T08:00:00+00:00", "text": "It crashes on start."},
        {"index": 1, "author": {"login": "alice@example.com"}, "created_at": "2019-05-01T10:00:00+00:00", "text": "Still happens on bug 3."},
        {"index": 2, "author": {"login": "alice@example.com"}, "created_at": "2019-05-01T11:00:00+00:00", "text": ""}
    ]
}"#;

#[test]
fn completions_name_the_binary() {
    let dir = TempDir::new().expect("tempdir");
    bugferry_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bugferry"));
}

#[test]
fn check_config_summarises_without_network() {
    let dir = config_dir(
        "bugzilla_base_url: https://bugs.example.org\n\
         gitlab_base_url: https://gitlab.example.org/api/v4\n\
         gitlab_project_id: 77\n\
         bugzilla_product: Widgets\n\
         bugzilla_bug_status: [NEW, ASSIGNED]\n\
         default_gitlab_labels: [bugzilla]\n",
    );
    fs::write(dir.path().join("component_mappings.yml"), "Editor: editor\nCore:\n")
        .expect("write mappings");

    let output = bugferry_cmd(dir.path())
        .args(["check-config", "--json"])
        .output()
        .expect("check-config should not crash");
    let summary = json_stdout(&output);

    assert_eq!(summary["project"], "77");
    assert_eq!(summary["token"], "missing");
    assert_eq!(summary["bugzilla_auth"], "anonymous");
    assert_eq!(summary["fetch_query"], "product=Widgets status=NEW status=ASSIGNED");
    assert_eq!(summary["component_mappings"], 2);
    assert_eq!(summary["user_mappings"], 0);
    assert_eq!(summary["default_labels"], json!(["bugzilla"]));
    assert!(!dir.path().join("user_mappings.yml").exists());
}

#[test]
fn check_config_reads_token_from_env() {
    let dir = config_dir(
        "bugzilla_base_url: https://bugs.example.org\n\
         gitlab_base_url: https://gitlab.example.org/api/v4\n\
         gitlab_project_name: group/project\n",
    );
    let output = bugferry_cmd(dir.path())
        .env("GITLAB_TOKEN", "glpat-env")
        .args(["check-config", "--json"])
        .output()
        .expect("check-config should not crash");
    let summary = json_stdout(&output);
    assert_eq!(summary["token"], "set");
    assert_eq!(summary["project"], "group/project (looked up at start)");
}

#[test]
fn missing_config_reports_code_and_hint() {
    let dir = TempDir::new().expect("tempdir");
    bugferry_cmd(dir.path())
        .args(["check-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"))
        .stderr(predicate::str::contains("hint: Fix defaults.yml"));
}

#[test]
fn migrate_without_token_fails_before_any_request() {
    let dir = config_dir(
        "bugzilla_base_url: https://bugs.example.org\n\
         gitlab_base_url: http://127.0.0.1:9/api/v4\n\
         gitlab_project_id: 5\n",
    );
    bugferry_cmd(dir.path())
        .args(["migrate", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no GitLab token"));
}

#[test]
fn dry_run_migration_from_exported_records() {
    let server = MockServer::start();
    let search = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v4/users")
            .query_param("search", "alice@example.com")
            .header("private-token", "glpat-test");
        then.status(200)
            .json_body(json!([{ "id": 11, "username": "alice" }]));
    });
    let writes = server.mock(|when, then| {
        when.method(POST);
        then.status(500);
    });

    let dir = config_dir(&format!(
        "bugzilla_base_url: https://bugs.example.org\n\
         gitlab_base_url: {}\n\
         gitlab_project_id: 5\n\
         elevate_permissions: false\n\
         close_bugzilla_bugs: true\n",
        server.url("/api/v4")
    ));
    let records = TempDir::new().expect("tempdir");
    fs::write(records.path().join("7.json"), BUG_7).expect("write record");

    let output = bugferry_cmd(dir.path())
        .env("GITLAB_TOKEN", "glpat-test")
        .args(["migrate", "7", "--dry-run", "--json", "--from-dir"])
        .arg(records.path())
        .output()
        .expect("migrate should not crash");
    let summary = json_stdout(&output);

    assert_eq!(summary["container"], 5);
    assert_eq!(summary["dry_run"], true);
    let bug = &summary["bugs"][0];
    assert_eq!(bug["bug_id"], 7);
    assert_eq!(bug["issue_iid"], 1);
    assert_eq!(bug["comments"], 1);
    assert_eq!(bug["skipped_comments"], 1);
    assert_eq!(bug["closed"], false);
    assert_eq!(bug["source_closed"], false);
    assert_eq!(summary["suppressed_writes"], 2);

    search.assert_calls(1);
    writes.assert_calls(0);

    let mappings = fs::read_to_string(dir.path().join("user_mappings.yml")).expect("mappings");
    assert!(mappings.contains("alice@example.com: alice"));
}

#[test]
fn unknown_bug_aborts_migration() {
    let server = MockServer::start();
    let dir = config_dir(&format!(
        "bugzilla_base_url: https://bugs.example.org\n\
         gitlab_base_url: {}\n\
         gitlab_project_id: 5\n\
         elevate_permissions: false\n",
        server.url("/api/v4")
    ));
    let records = TempDir::new().expect("tempdir");

    bugferry_cmd(dir.path())
        .env("GITLAB_TOKEN", "glpat-test")
        .args(["migrate", "8", "--dry-run", "--from-dir"])
        .arg(records.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("migration aborted"))
        .stderr(predicate::str::contains("bug 8"));
}

#[test]
fn fetch_bugs_saves_the_query_result() {
    let server = MockServer::start();
    let query = server.mock(|when, then| {
        when.method(GET)
            .path("/rest/bug")
            .query_param("product", "Widgets")
            .query_param("component", "Editor")
            .query_param("api_key", "bz-key");
        then.status(200)
            .json_body(json!({ "bugs": [{ "id": 42 }, { "id": 7 }] }));
    });

    let dir = config_dir(&format!(
        "bugzilla_base_url: {}\n\
         gitlab_base_url: https://gitlab.example.org/api/v4\n\
         gitlab_project_id: 5\n\
         bugzilla_product: Widgets\n\
         bugzilla_components: [Editor]\n\
         buglist_file: selected\n",
        server.base_url()
    ));

    let output = bugferry_cmd(dir.path())
        .env("BUGZILLA_API_KEY", "bz-key")
        .args(["fetch-bugs", "--json"])
        .output()
        .expect("fetch-bugs should not crash");
    let report = json_stdout(&output);

    assert_eq!(report["count"], 2);
    assert_eq!(report["bug_ids"], json!([42, 7]));
    assert_eq!(
        fs::read_to_string(dir.path().join("selected")).expect("bug list"),
        "42\n7\n"
    );
    query.assert_calls(1);
}

#[test]
fn fetch_bugs_requires_a_product() {
    let dir = config_dir(
        "bugzilla_base_url: https://bugs.example.org\n\
         gitlab_base_url: https://gitlab.example.org/api/v4\n\
         gitlab_project_id: 5\n",
    );
    bugferry_cmd(dir.path())
        .args(["fetch-bugs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bugzilla_product must be set"));
}
