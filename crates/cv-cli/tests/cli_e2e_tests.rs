//! End-to-end tests for the cvault binary
//!
//! These tests validate:
//! - Export-tree checksum computation and tamper detection
//! - Audit commands against an empty vault
//! - A full extraction against a mock source API

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

/// A cvault command isolated from the caller's configuration
fn cvault(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cvault").unwrap();
    cmd.current_dir(workdir)
        .env_remove("CV_CONFIG")
        .env_remove("CV_CONTENT_TYPES")
        .env("CV_DATABASE_PATH", workdir.join("vault.db"))
        .env("NO_COLOR", "1");
    cmd
}

fn export_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("dashboards")).unwrap();
    fs::write(dir.path().join("dashboards/sales.yaml"), "title: Sales\n").unwrap();
    fs::write(dir.path().join("models.yaml"), "name: sales_model\n").unwrap();
    dir
}

// ============================================================================
// Checksum Tests
// ============================================================================

#[test]
fn test_checksum_compute_prints_hex_digest() {
    let tree = export_tree();

    cvault(tree.path())
        .arg("checksum")
        .arg("compute")
        .arg(tree.path())
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
}

#[test]
fn test_checksum_write_then_verify() {
    let tree = export_tree();

    cvault(tree.path())
        .args(["checksum", "compute", "--write"])
        .arg(tree.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(".checksum"));

    cvault(tree.path())
        .args(["checksum", "verify"])
        .arg(tree.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn test_checksum_verify_detects_tampering() {
    let tree = export_tree();

    cvault(tree.path())
        .args(["checksum", "compute", "--write"])
        .arg(tree.path())
        .assert()
        .success();

    fs::write(tree.path().join("models.yaml"), "name: tampered\n").unwrap();

    cvault(tree.path())
        .args(["checksum", "verify"])
        .arg(tree.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Checksum verification failed"));
}

#[test]
fn test_checksum_verify_against_explicit_digest() {
    let tree = export_tree();

    cvault(tree.path())
        .args(["checksum", "verify", "--expected", "deadbeef"])
        .arg(tree.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("deadbeef"));
}

// ============================================================================
// Audit Tests
// ============================================================================

#[test]
fn test_sessions_on_empty_vault() {
    let workdir = TempDir::new().unwrap();

    cvault(workdir.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No extraction sessions found"));
}

#[test]
fn test_checkpoints_for_unknown_session() {
    let workdir = TempDir::new().unwrap();

    cvault(workdir.path())
        .args(["checkpoints", "no-such-session"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_dead_letter_rejects_unknown_type() {
    let workdir = TempDir::new().unwrap();

    cvault(workdir.path())
        .args(["dead-letter", "list", "--type", "spreadsheet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("spreadsheet"));
}

// ============================================================================
// Extraction Tests
// ============================================================================

#[tokio::test]
async fn test_extract_then_inspect() {
    let mock_server = MockServer::start().await;
    let workdir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/models"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "sales_model", "created_at": "2024-01-15T10:00:00Z"},
            {"id": 2, "name": "finance_model"},
            {"id": 3, "title": "ops_model"}
        ])))
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    cvault(workdir.path())
        .args(["extract", "--types", "model", "--workers", "2"])
        .env("CV_API_BASE_URL", mock_server.uri())
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("3 items"));

    cvault(workdir.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("model"))
        .stdout(predicate::str::contains("Schema version"));

    cvault(workdir.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    cvault(workdir.path())
        .args(["dead-letter", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No dead-letter entries"));
}

#[tokio::test]
async fn test_extract_reports_auth_failure() {
    let mock_server = MockServer::start().await;
    let workdir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&mock_server)
        .await;

    cvault(workdir.path())
        .args(["extract", "--types", "user"])
        .env("CV_API_BASE_URL", mock_server.uri())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Authentication failed"));

    cvault(workdir.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"));
}
