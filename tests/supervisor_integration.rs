//! End-to-end supervisor lifecycle tests against real child processes.
//! Unix-only: the helpers lean on `/bin/sh` built-ins.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use warden_core::console::ConsoleBuffer;
use warden_core::supervisor::{error::SupervisorError, ServerEvent, ServerSupervisor};

fn new_supervisor() -> Arc<ServerSupervisor> {
    let console = ConsoleBuffer::new(200);
    ServerSupervisor::new(console, None, 3)
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let sup = new_supervisor();
    let err = sup.start("   ").await.unwrap_err();
    assert!(matches!(err, SupervisorError::EmptyCommand));
    assert!(!sup.is_running());
    assert_eq!(sup.start_time_ms(), 0);
}

#[tokio::test]
async fn double_start_is_rejected() {
    let sup = new_supervisor();
    sup.start("sleep 30").await.unwrap();
    let err = sup.start("sleep 30").await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    sup.stop().await;
}

#[tokio::test]
async fn output_is_pumped_into_the_console() {
    let sup = new_supervisor();
    let mut events = sup.subscribe();
    sup.start("echo hello from the server; sleep 30").await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ServerEvent::Console { content, .. }) = events.recv().await {
                if content == "hello from the server" {
                    break;
                }
            }
        }
    })
    .await;
    assert!(seen.is_ok(), "expected the process output as a console event");
    assert!(sup.console().snapshot().contains("hello from the server"));
    sup.stop().await;
}

#[tokio::test]
async fn graceful_stop_when_the_process_obeys() {
    let sup = new_supervisor();
    // `read` returns once the supervisor writes its `stop` command.
    sup.start("read _line; exit 0").await.unwrap();
    assert!(sup.is_running());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(4), sup.stop()).await;
    assert!(stopped.is_ok(), "graceful stop should finish well inside the grace period");
    assert!(!sup.is_running());
}

#[tokio::test]
async fn forced_kill_when_the_process_ignores_stop() {
    let sup = new_supervisor();
    sup.start("sleep 30").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // `sleep` never reads stdin, so stop() has to take the kill path, still
    // bounded by the 5 s grace period.
    let stopped = tokio::time::timeout(Duration::from_secs(8), sup.stop()).await;
    assert!(stopped.is_ok());
    assert!(!sup.is_running());

    // Manual stop must not trigger an auto-restart.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!sup.is_running());
}

#[tokio::test]
async fn crash_emits_events_and_schedules_restart() {
    let sup = new_supervisor();
    let mut events = sup.subscribe();
    sup.start("sleep 0.2").await.unwrap();

    let mut saw_crashed = false;
    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(ServerEvent::Crashed) => saw_crashed = true,
                Ok(ServerEvent::Restarting) => break,
                Ok(_) => {}
                Err(_) => panic!("event channel closed before a restart was scheduled"),
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "expected Crashed and Restarting events");
    assert!(saw_crashed);

    // A manual stop during the backoff window cancels the restart loop.
    sup.stop().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!sup.is_running());
}

#[tokio::test]
async fn auto_restart_reinvokes_the_original_command() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs.log");
    let command = format!("echo run >> {}", marker.display());

    let sup = new_supervisor();
    sup.start(&command).await.unwrap();

    // The command exits immediately; the monitor should relaunch it with
    // the same command line after the first backoff step.
    tokio::time::sleep(Duration::from_secs(6)).await;
    sup.stop().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let runs = std::fs::read_to_string(&marker)
        .unwrap_or_default()
        .lines()
        .count();
    assert!(runs >= 2, "expected at least one relaunch, saw {} runs", runs);
}

#[tokio::test]
async fn send_command_echoes_into_the_console() {
    let sup = new_supervisor();
    // `cat` keeps reading stdin so the session stays alive.
    sup.start("cat > /dev/null").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    sup.send_command("list").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sup.console().snapshot().contains("> list"));
    sup.stop().await;
}

#[tokio::test]
async fn stats_request_completes_without_a_relay() {
    let sup = new_supervisor();
    sup.start("cat > /dev/null").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Never raises, even with no Telegram relay configured; the diagnostic
    // commands are echoed into the console right away.
    sup.request_stats().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = sup.console().snapshot();
    assert!(snapshot.contains("Requesting server stats..."));
    assert!(snapshot.contains("> list"));
    assert!(snapshot.contains("> tps"));
    sup.stop().await;
}

#[tokio::test]
async fn poll_interval_zero_is_ignored() {
    let sup = new_supervisor();
    // Must not panic or kill the scheduler.
    sup.set_poll_interval(0);
    sup.set_poll_interval(6);
}
