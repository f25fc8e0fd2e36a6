//! Server assembly from configuration: host key, ban list, bind, shutdown.

use std::{fs, path::PathBuf, time::Duration};

use devchat_server::{ServerConfig, ServerError, start};

fn fixture_key() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/host_ed25519")
}

fn local_config(dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        port: 0,
        bind: "127.0.0.1".to_string(),
        ban_filename: dir.path().join("bans.json"),
        key_filename: fixture_key(),
        shutdown_grace_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_and_shutdown_saves_bans() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(&dir);

    let running = start(&config).await.unwrap();
    assert_ne!(running.local_addr.port(), 0);
    assert!(running.handle.roster().is_empty());

    tokio::time::timeout(Duration::from_secs(5), running.handle.shutdown()).await.unwrap();

    let saved = fs::read_to_string(dir.path().join("bans.json")).unwrap();
    assert_eq!(saved, "[]\n");
}

#[tokio::test]
async fn test_existing_bans_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(&dir);
    let bans = "[\n   \"abc123\"\n]\n";
    fs::write(&config.ban_filename, bans).unwrap();

    let running = start(&config).await.unwrap();
    running.handle.shutdown().await;

    assert_eq!(fs::read_to_string(&config.ban_filename).unwrap(), bans);
}

#[tokio::test]
async fn test_missing_host_key_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig { key_filename: dir.path().join("no_such_key"), ..local_config(&dir) };

    let err = start(&config).await.err().unwrap();
    assert!(matches!(err, ServerError::HostKey(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_malformed_ban_list_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(&dir);
    fs::write(&config.ban_filename, "{ not json").unwrap();

    let err = start(&config).await.err().unwrap();
    assert!(matches!(err, ServerError::BanStore(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_invalid_scrollback_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig { scrollback: 0, ..local_config(&dir) };

    let err = start(&config).await.err().unwrap();
    assert!(matches!(err, ServerError::Config(_)), "unexpected error: {err}");
}
