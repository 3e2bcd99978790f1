//! Integration tests for the maintenance CLI
//!
//! These tests run the maintenance operations against a real file store.
//! Unit tests for argument parsing and discovery live in the module files.

use clap::Parser;
use serde_json::json;
use sessionwarden::cli::{Args, ConfigDiscovery, ExecutionMode, Maintenance};
use sessionwarden::{RequestContext, SessionConfig, SessionId, SessionManager};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(temp_dir: &TempDir) -> std::path::PathBuf {
    let store = temp_dir.path().join("store");
    let config_path = temp_dir.path().join("sessionwarden.toml");
    fs::write(
        &config_path,
        format!(
            "driver = \"file\"\nsave_path = {:?}\nexpiration = 600\ntime_to_update = 60\n",
            store.display().to_string()
        ),
    )
    .unwrap();
    config_path
}

async fn seed_session(config: &SessionConfig) -> SessionId {
    let mut session = SessionManager::from_config(config.clone()).unwrap();
    let outcome = session.start(&RequestContext::new()).await.unwrap();
    session.set("user_id", 7);
    session.set_tempdata("otp", "123456", 120);
    session.close().await.unwrap();
    outcome.session_id
}

#[tokio::test]
async fn test_explicit_config_drives_maintenance() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(&temp_dir);

    let config = ConfigDiscovery::load(Some(&config_path)).unwrap();
    assert_eq!(config.expiration, 600);
    assert_eq!(
        config.save_path.as_deref(),
        Some(temp_dir.path().join("store").as_path())
    );

    let first = seed_session(&config).await;
    let second = seed_session(&config).await;

    let maintenance = Maintenance::from_config(config).unwrap();

    let mut expected = vec![first.clone(), second.clone()];
    expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(maintenance.list().await.unwrap(), expected);

    let report = maintenance.inspect(&first).await.unwrap().unwrap();
    assert_eq!(report.data.get("user_id"), Some(&json!(7)));
    assert_eq!(report.summary.temp_keys, vec!["otp".to_string()]);

    assert!(maintenance.destroy(&first).await.unwrap());
    assert_eq!(maintenance.list().await.unwrap(), vec![second.clone()]);

    // Fresh records survive gc with the configured lifetime
    assert_eq!(maintenance.gc(None).await.unwrap(), 0);
    assert_eq!(maintenance.list().await.unwrap(), vec![second]);
}

#[tokio::test]
async fn test_gc_zero_lifetime_purges_everything() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigDiscovery::load(Some(&write_config(&temp_dir))).unwrap();

    seed_session(&config).await;
    seed_session(&config).await;

    // Give the file timestamps a chance to fall behind the cutoff
    tokio::time::sleep(Duration::from_millis(20)).await;

    let maintenance = Maintenance::from_config(config).unwrap();
    assert_eq!(maintenance.gc(Some(Duration::ZERO)).await.unwrap(), 2);
    assert!(maintenance.list().await.unwrap().is_empty());
}

#[test]
fn test_args_resolve_execution_modes() {
    let id = SessionId::generate();

    let args = Args::try_parse_from(["sessionwarden", "inspect", id.as_str()]).unwrap();
    assert_eq!(args.mode().unwrap(), ExecutionMode::Inspect(id.clone()));

    let args = Args::try_parse_from(["sessionwarden", "-v", "gc", "--max-lifetime", "30"]).unwrap();
    assert!(args.verbose);
    assert_eq!(
        args.mode().unwrap(),
        ExecutionMode::Gc {
            max_lifetime_secs: Some(30)
        }
    );

    let args = Args::try_parse_from(["sessionwarden", "destroy", "not-an-id"]).unwrap();
    assert!(args.mode().is_err());
}

#[tokio::test]
async fn test_gc_leaves_sessions_open_in_another_handler() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigDiscovery::load(Some(&write_config(&temp_dir))).unwrap();
    let id = seed_session(&config).await;

    // A server cycle keeps the session open while maintenance runs
    let mut server = SessionManager::from_config(config.clone()).unwrap();
    server
        .start(&RequestContext::new().with_cookie(id.as_str()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let maintenance = Maintenance::from_config(config).unwrap();
    assert_eq!(maintenance.gc(Some(Duration::ZERO)).await.unwrap(), 0);
    assert_eq!(maintenance.list().await.unwrap(), vec![id.clone()]);

    server.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(maintenance.gc(Some(Duration::ZERO)).await.unwrap(), 1);
}
