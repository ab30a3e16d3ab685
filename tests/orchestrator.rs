//! Integration tests for the orchestrator and the headless runner
//!
//! The packager is played by a `sh` script, the tunnel by an in-memory
//! connector.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;
use tokio::sync::watch;

use xdl::headless::runner::run_until_shutdown;
use xdl_app::{Orchestrator, ShutdownState};
use xdl_core::test_utils::MockEnvironment;
use xdl_core::{PackagerConfig, PackagerEvent};
use xdl_daemon::test_utils::{
    fake_packager_config, write_fake_packager, FakeTunnelConnector, FOREVER_SCRIPT,
};

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

/// Fake packager config with an ephemeral server port
fn project_config(dir: &TempDir, script: &str) -> PackagerConfig {
    let script = write_fake_packager(dir.path(), script);
    let mut config = fake_packager_config(dir.path(), &script);
    config.port = Some(0);
    config
}

fn event_labels(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("invalid NDJSON line");
            value["event"].as_str().unwrap_or_default().to_string()
        })
        .collect()
}

/// Live and not a zombie
fn is_process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_some_and(|(_, rest)| !rest.starts_with('Z')),
        Err(_) => false,
    }
}

async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..40 {
        if !is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ─────────────────────────────────────────────────────────
// Orchestrator lifecycle
// ─────────────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn test_start_brings_up_all_resources() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnvironment::new());
    let connector = FakeTunnelConnector::new();
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        env.clone(),
        connector.clone(),
    );

    orchestrator.start().await.unwrap();

    let addr = orchestrator.local_addr().expect("server listening");
    assert_ne!(addr.port(), 0);
    assert!(orchestrator.is_packager_running());
    assert!(orchestrator.packager_pid().is_some());

    let tunnel_url = orchestrator.tunnel_url().expect("tunnel connected");
    assert!(tunnel_url.starts_with("http://"));
    assert!(tunnel_url.ends_with(".exp.direct"));

    let info = env.packager_info();
    assert_eq!(info.packager_port, Some(19001));
    // Recorded without assuming TLS
    assert_eq!(info.ngrok.as_deref(), Some(tunnel_url.as_str()));
    assert_eq!(orchestrator.config().entry_point.as_deref(), Some("index.js"));

    let report = orchestrator.stop().await;
    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.tunnel_url, None);
    assert!(orchestrator.local_addr().is_none());
    assert!(!orchestrator.is_packager_running());
    assert_eq!(connector.disconnects().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_start_without_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnvironment::new());
    let connector = FakeTunnelConnector::new();
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        env.clone(),
        connector.clone(),
    )
    .without_tunnel();

    orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.tunnel_url(), None);
    assert!(connector.connects().is_empty());
    assert_eq!(env.packager_info().ngrok, None);

    assert!(orchestrator.stop().await.is_clean());
}

#[tokio::test]
#[serial]
async fn test_tunnel_failure_does_not_abort_start() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeTunnelConnector::new();
    connector.fail_connect("agent offline");
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        Arc::new(MockEnvironment::new()),
        connector,
    );

    orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.tunnel_url(), None);
    assert!(orchestrator.local_addr().is_some());
    assert!(orchestrator.is_packager_running());

    orchestrator.stop().await;
}

#[tokio::test]
#[serial]
async fn test_missing_launcher_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnvironment::new());
    let connector = FakeTunnelConnector::new();
    let config =
        project_config(&dir, FOREVER_SCRIPT).with_launcher("definitely-not-a-launcher-xyz");
    let mut orchestrator = Orchestrator::new(config, env.clone(), connector.clone());

    let err = orchestrator.start().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(orchestrator.local_addr().is_none());
    assert_eq!(orchestrator.tunnel_url(), None);
    assert_eq!(connector.connects().len(), connector.disconnects().len());
    assert_eq!(env.packager_info(), Default::default());
}

#[tokio::test]
#[serial]
async fn test_taken_server_port_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind("0.0.0.0:0").unwrap();
    let mut config = project_config(&dir, FOREVER_SCRIPT);
    config.port = Some(taken.local_addr().unwrap().port());

    let env = Arc::new(MockEnvironment::new());
    let connector = FakeTunnelConnector::new();
    let mut orchestrator = Orchestrator::new(config, env.clone(), connector.clone());
    let mut events = orchestrator.subscribe();

    let err = orchestrator.start().await.unwrap_err();

    assert!(matches!(err, xdl_core::Error::Server { .. }), "{:?}", err);
    assert!(orchestrator.local_addr().is_none());
    assert!(!orchestrator.is_packager_running());
    assert_eq!(orchestrator.tunnel_url(), None);
    assert_eq!(connector.connects().len(), connector.disconnects().len());
    assert_eq!(env.packager_info(), Default::default());

    // The packager that did start was stopped again
    let mut pid = None;
    while let Ok(event) = events.try_recv() {
        if let PackagerEvent::PackagerReady { pid: ready } = event {
            pid = ready;
        }
    }
    if let Some(pid) = pid {
        assert!(wait_until_dead(pid).await);
    }
}

#[tokio::test]
#[serial]
async fn test_restart_packager_replaces_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        Arc::new(MockEnvironment::new()),
        FakeTunnelConnector::new(),
    )
    .without_tunnel();

    orchestrator.start().await.unwrap();
    let first = orchestrator.packager_pid().unwrap();
    let addr = orchestrator.local_addr();

    orchestrator.restart_packager(true).await.unwrap();
    let second = orchestrator.packager_pid().unwrap();

    assert_ne!(first, second);
    // The server is untouched by a packager restart
    assert_eq!(orchestrator.local_addr(), addr);

    orchestrator.stop().await;
    assert!(!is_process_alive(second));
}

#[tokio::test]
#[serial]
async fn test_restart_tunnel_updates_packager_info() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnvironment::new());
    let connector = FakeTunnelConnector::new();
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        env.clone(),
        connector.clone(),
    );
    orchestrator.start().await.unwrap();

    let url = orchestrator.restart_tunnel().await.unwrap();

    assert!(url.is_some());
    assert_eq!(env.packager_info().ngrok, orchestrator.tunnel_url());
    assert!(env
        .packager_info()
        .ngrok
        .is_some_and(|ngrok| ngrok.starts_with("http://")));
    assert_eq!(connector.connects().len(), 2);
    assert_eq!(connector.disconnects().len(), 1);

    orchestrator.stop().await;
}

// ─────────────────────────────────────────────────────────
// Headless runner
// ─────────────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn test_headless_streams_events_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        Arc::new(MockEnvironment::new()),
        FakeTunnelConnector::new(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownState::Running);
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, PackagerEvent::PackagerReady { .. }) {
                let _ = shutdown_tx.send(ShutdownState::Graceful);
                break;
            }
        }
    });

    let mut out = Vec::new();
    let report = run_until_shutdown(&mut orchestrator, shutdown_rx, &mut out)
        .await
        .unwrap();

    assert!(report.is_clean());
    let labels = event_labels(&out);
    assert!(labels.contains(&"packager-ready".to_string()));
    assert!(labels.contains(&"ngrok-ready".to_string()));
    assert!(labels.contains(&"packager-will-stop".to_string()));
    assert!(labels.contains(&"ngrok-disconnected".to_string()));
    assert_eq!(labels.last().map(String::as_str), Some("stopped"));

    let started = labels.iter().position(|l| l == "started").unwrap();
    let will_stop = labels.iter().position(|l| l == "packager-will-stop").unwrap();
    assert!(started < will_stop);
}

#[tokio::test]
#[serial]
async fn test_headless_started_line() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::new(
        project_config(&dir, FOREVER_SCRIPT),
        Arc::new(MockEnvironment::new()),
        FakeTunnelConnector::new(),
    )
    .without_tunnel();

    // Already signalled: start, report, stop
    let (_shutdown_tx, shutdown_rx) = watch::channel(ShutdownState::Graceful);
    let mut out = Vec::new();
    run_until_shutdown(&mut orchestrator, shutdown_rx, &mut out)
        .await
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    let started = text
        .lines()
        .find(|line| line.contains(r#""event":"started""#))
        .unwrap();

    insta::with_settings!({filters => vec![
        (r"0\.0\.0\.0:\d+", "0.0.0.0:[PORT]"),
        (r#""timestamp":\d+"#, r#""timestamp":[TIMESTAMP]"#),
    ]}, {
        insta::assert_snapshot!(started, @r#"{"event":"started","server_url":"http://0.0.0.0:[PORT]","packager_port":19001,"tunnel_url":null,"timestamp":[TIMESTAMP]}"#);
    });
}

#[tokio::test]
#[serial]
async fn test_headless_reports_fatal_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let config =
        project_config(&dir, FOREVER_SCRIPT).with_launcher("definitely-not-a-launcher-xyz");
    let mut orchestrator = Orchestrator::new(
        config,
        Arc::new(MockEnvironment::new()),
        FakeTunnelConnector::new(),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(ShutdownState::Running);
    let mut out = Vec::new();
    let result = run_until_shutdown(&mut orchestrator, shutdown_rx, &mut out).await;

    assert!(result.is_err());
    let text = String::from_utf8(out).unwrap();
    let last: serde_json::Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
    assert_eq!(last["event"], "error");
    assert_eq!(last["fatal"], true);
    assert!(last["message"]
        .as_str()
        .unwrap()
        .contains("definitely-not-a-launcher-xyz"));
}

#[tokio::test]
#[serial]
async fn test_headless_forced_shutdown_kills_packager() {
    let dir = tempfile::tempdir().unwrap();
    // Ignores SIGTERM, so the graceful stop hangs
    let config = project_config(
        &dir,
        "trap '' TERM\necho 'React packager ready.'\nexec sleep 30\n",
    );
    let mut orchestrator = Orchestrator::new(
        config,
        Arc::new(MockEnvironment::new()),
        FakeTunnelConnector::new(),
    )
    .without_tunnel()
    .with_stop_timeout(Duration::from_secs(30));

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownState::Running);
    let mut events = orchestrator.subscribe();
    let watcher = tokio::spawn(async move {
        let mut pid = None;
        while let Ok(event) = events.recv().await {
            match event {
                PackagerEvent::PackagerReady { pid: ready } => {
                    pid = ready;
                    let _ = shutdown_tx.send(ShutdownState::Graceful);
                }
                PackagerEvent::PackagerWillStop => {
                    let _ = shutdown_tx.send(ShutdownState::Forced);
                    break;
                }
                _ => {}
            }
        }
        pid
    });

    let mut out = Vec::new();
    let result = run_until_shutdown(&mut orchestrator, shutdown_rx, &mut out).await;
    assert!(result.is_err());

    let pid = watcher.await.unwrap().expect("packager pid");
    assert!(is_process_alive(pid), "graceful stop was still pending");

    drop(orchestrator);
    assert!(wait_until_dead(pid).await, "packager outlived the forced shutdown");

    let labels = event_labels(&out);
    assert_eq!(labels.last().map(String::as_str), Some("error"));
    assert!(!labels.contains(&"stopped".to_string()));
}
