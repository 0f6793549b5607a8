//! Settings file + environment layering feeding a live session

mod support;

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use portway_core::ConfigError;
use portway_settings::{Mode, Settings, SettingsError};
use portway_tunnel::TunnelSession;

use support::{echo_server, free_port};

fn settings_file(name: &str, json: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("portway-it-{}-{}", std::process::id(), name));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("settings.json");
    std::fs::write(&path, json).unwrap();
    path
}

fn vars(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::test]
async fn test_file_and_env_drive_a_listen_tunnel() {
    let echo = echo_server().await;
    let local_port = free_port().await;

    // File points at the wrong destination; the environment fixes it
    let path = settings_file(
        "listen",
        &format!(
            r#"{{"mode": "listen", "local_port": {}, "remote_port": 1, "poll_interval_ms": 50}}"#,
            local_port
        ),
    );
    let mut settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.mode, Mode::Listen);
    settings
        .apply_env(vars(&[("PORTWAY_REMOTE_PORT", echo.port.to_string())]))
        .unwrap();

    let mut session = TunnelSession::with_ssh();
    session.start(settings.tunnel_config().unwrap()).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    client.write_all(b"layered").await.unwrap();
    let mut buf = [0u8; 7];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"layered");

    session.stop().await;
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_out_of_range_port_in_file_rejected() {
    let path = settings_file("range", r#"{"mode": "listen", "remote_port": 65536}"#);
    let settings = Settings::load_from(&path).unwrap();
    let err = settings.tunnel_config().unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Config(ConfigError::PortOutOfRange {
            field: "remote_port",
            value: 65536
        })
    ));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_malformed_file_rejected() {
    let path = settings_file("malformed", "{ not json");
    assert!(matches!(
        Settings::load_from(&path),
        Err(SettingsError::ParseError(_))
    ));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_unparsable_env_rejected() {
    let mut settings = Settings::default();
    let err = settings
        .apply_env(vars(&[("PORTWAY_TIMEOUT", "soon".to_string())]))
        .unwrap_err();
    assert!(matches!(err, SettingsError::InvalidEnv { .. }));
}
