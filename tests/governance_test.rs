//! Integration tests for the governance pipeline.
//!
//! Runs the full pre-check / validate / write / post-verify flow against a
//! temporary vault root, including the blocked and fall-through policies.

use std::path::PathBuf;

use serde_json::json;
use tempfile::tempdir;

use mcp_memory_hub::config::{GovernanceSettings, VaultConfig};
use mcp_memory_hub::error::GovernanceError;
use mcp_memory_hub::governance::{LogRecord, Omega};
use mcp_memory_hub::vault::NotebookVault;

fn vault_in(root: PathBuf) -> NotebookVault {
    NotebookVault::new(&VaultConfig {
        root,
        logs_folder: None,
    })
}

#[tokio::test]
async fn test_pre_action_writes_record_to_daily_log() {
    let dir = tempdir().expect("Failed to create temp dir");
    let vault = vault_in(dir.path().to_path_buf());
    let omega = Omega::new(vault.clone(), GovernanceSettings::default());

    let record = LogRecord::tool_call("graph-memory", "create_entity", json!({"label": "Person"}));
    let logged = omega.pre_action(&record).await.unwrap();
    assert!(logged);

    let text = tokio::fs::read_to_string(vault.daily_log_path()).await.unwrap();
    assert!(text.contains("GRAPH-MEMORY :: CREATE_ENTITY"));
    assert!(text.contains("- Action: create_entity"));
}

#[tokio::test]
async fn test_post_action_appends_result_record() {
    let dir = tempdir().expect("Failed to create temp dir");
    let vault = vault_in(dir.path().to_path_buf());
    let omega = Omega::new(vault.clone(), GovernanceSettings::default());

    let record = LogRecord::tool_call("tasks", "create_task", json!({"title": "P"}));
    omega.pre_action(&record).await.unwrap();
    omega
        .post_action(&record, json!({"result": {"is_error": false}}))
        .await
        .unwrap();

    let text = tokio::fs::read_to_string(vault.daily_log_path()).await.unwrap();
    assert!(text.contains("- Action: create_task\n"));
    assert!(text.contains("- Action: create_task_result"));

    // pre-record precedes post-record in the file
    let pre = text.find(":: CREATE_TASK\n").unwrap();
    let post = text.find(":: CREATE_TASK_RESULT").unwrap();
    assert!(pre < post);
}

#[tokio::test]
async fn test_unwritable_root_blocks_when_policy_on() {
    let dir = tempdir().expect("Failed to create temp dir");
    // a regular file where the vault root should be makes ensure_root fail
    let bogus_root = dir.path().join("occupied");
    std::fs::write(&bogus_root, b"not a directory").unwrap();

    let vault = vault_in(bogus_root);
    let omega = Omega::new(vault, GovernanceSettings::default());

    let record = LogRecord::tool_call("model", "chat", json!({}));
    let err = omega.pre_action(&record).await.unwrap_err();
    assert!(matches!(err, GovernanceError::Blocked { .. }));
}

#[tokio::test]
async fn test_unwritable_root_falls_through_when_policy_off() {
    let dir = tempdir().expect("Failed to create temp dir");
    let bogus_root = dir.path().join("occupied");
    std::fs::write(&bogus_root, b"not a directory").unwrap();

    let vault = vault_in(bogus_root);
    let omega = Omega::new(
        vault,
        GovernanceSettings {
            block_on_failure: false,
            enforce_logging: false,
            ..GovernanceSettings::default()
        },
    );

    let record = LogRecord::tool_call("model", "chat", json!({}));
    // pre-check warns, write fails, but nothing blocks
    let logged = omega.pre_action(&record).await.unwrap();
    assert!(!logged);
}

#[tokio::test]
async fn test_invalid_record_rejected_before_write() {
    let dir = tempdir().expect("Failed to create temp dir");
    let vault = vault_in(dir.path().to_path_buf());
    let omega = Omega::new(vault.clone(), GovernanceSettings::default());

    let mut record = LogRecord::tool_call("model", "chat", json!({}));
    record.timestamp = "2026-08-02 12:00:00".to_string();

    let err = omega.pre_action(&record).await.unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidFormat { .. }));

    // nothing was written
    assert!(tokio::fs::metadata(vault.daily_log_path()).await.is_err());
}

#[tokio::test]
async fn test_every_written_record_validates() {
    // property: validate(record) holds for every record the hub writes
    let dir = tempdir().expect("Failed to create temp dir");
    let vault = vault_in(dir.path().to_path_buf());
    let omega = Omega::new(vault, GovernanceSettings::default());

    for (source, action) in [
        ("graph-memory", "create_entity"),
        ("reasoning-chains", "start_thinking"),
        ("stdio", "tools/list"),
    ] {
        let record = LogRecord::tool_call(source, action, json!({}));
        assert!(omega.validate(&record).is_ok());
        assert!(omega.validate(&record.result_record(json!({}))).is_ok());
    }
}

#[tokio::test]
async fn test_transport_hook_writes_http_record() {
    let dir = tempdir().expect("Failed to create temp dir");
    let vault = vault_in(dir.path().to_path_buf());
    let omega = Omega::new(vault.clone(), GovernanceSettings::default());

    omega
        .log_transport("http", "GET /health", json!({"status": 200}))
        .await;

    let text = tokio::fs::read_to_string(vault.daily_log_path()).await.unwrap();
    assert!(text.contains("- Type: http_request"));
    assert!(text.contains("GET /HEALTH"));
}
