//! Process supervisor — owns the lifecycle of the one supervised server
//! process: launch through the platform shell, output pumping into the
//! console buffer, stdin command injection, liveness monitoring with an
//! auto-restart policy, and graceful-then-forced stop.
//!
//! Restart policy: a crash is always retried unless the last stop was
//! requested manually. `manual_stop` is the single source of truth for that
//! race — `stop()` sets it before doing anything else, and the monitor
//! re-checks it right before relaunching. Consecutive crashes back off
//! exponentially so a process that dies on launch cannot hot-loop.

pub mod error;

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::console::{ConsoleBuffer, LogLevel};
use crate::stats;
use crate::telegram::TelegramNotifier;
use error::SupervisorError;

/// Grace period between the `stop` command and a forced kill.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Liveness poll cadence.
const MONITOR_POLL: Duration = Duration::from_secs(1);
/// Cadence of the exit checks inside `stop()`.
const STOP_POLL: Duration = Duration::from_millis(100);
/// A session that stays up this long resets the crash-loop backoff.
const BACKOFF_RESET_UPTIME: Duration = Duration::from_secs(60);
/// Upper bound on the delay between restart attempts.
const BACKOFF_CAP_SECS: u64 = 60;

/// Lifecycle and output events published to the hosting shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Console { content: String, level: LogLevel },
    Started,
    Stopped,
    Crashed,
    Restarting,
}

/// Live process state: the child itself, the stdin command channel, and the
/// cancellation token shared by this session's background tasks.
struct ProcessHandle {
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    session: CancellationToken,
}

pub struct ServerSupervisor {
    console: Arc<ConsoleBuffer>,
    notifier: Option<Arc<TelegramNotifier>>,
    events: broadcast::Sender<ServerEvent>,
    running: AtomicBool,
    manual_stop: AtomicBool,
    start_time_ms: Arc<AtomicU64>,
    consecutive_crashes: AtomicU32,
    last_command: std::sync::Mutex<Option<String>>,
    proc: Mutex<Option<ProcessHandle>>,
    poll_hours: watch::Sender<u64>,
    /// Handle to ourselves for the background workers spawned per session.
    me: Weak<ServerSupervisor>,
}

impl ServerSupervisor {
    pub fn new(
        console: Arc<ConsoleBuffer>,
        notifier: Option<Arc<TelegramNotifier>>,
        poll_interval_hours: u64,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(2048);
        let (poll_hours, _) = watch::channel(poll_interval_hours.max(1));
        Arc::new_cyclic(|me| Self {
            console,
            notifier,
            events,
            running: AtomicBool::new(false),
            manual_stop: AtomicBool::new(false),
            start_time_ms: Arc::new(AtomicU64::new(0)),
            consecutive_crashes: AtomicU32::new(0),
            last_command: std::sync::Mutex::new(None),
            proc: Mutex::new(None),
            poll_hours,
            me: me.clone(),
        })
    }

    /// Launch the server process and this session's background workers.
    ///
    /// The command runs through the platform shell (`cmd /c` on Windows,
    /// `/bin/sh -c` elsewhere) with stdout and stderr both pumped into the
    /// console buffer and stdin piped for commands.
    pub async fn start(&self, command: &str) -> Result<(), SupervisorError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }

        // Holding the handle slot for the whole critical section serializes
        // concurrent starts (user start racing an auto-restart).
        let mut proc = self.proc.lock().await;
        if proc.is_some() || self.running.load(Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }

        self.manual_stop.store(false, Ordering::SeqCst);

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = TokioCommand::new("cmd");
            c.args(["/c", command]);
            c
        } else {
            let mut c = TokioCommand::new("/bin/sh");
            c.args(["-c", command]);
            c
        };
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("JAVA_TOOL_OPTIONS", "-Dfile.encoding=UTF-8");
        crate::utils::apply_creation_flags(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id().unwrap_or(0);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let session = CancellationToken::new();
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(256);

        if let Some(stdout) = stdout {
            self.spawn_pump(stdout, session.clone());
        }
        if let Some(stderr) = stderr {
            self.spawn_pump(stderr, session.clone());
        }
        if let Some(stdin_handle) = stdin {
            spawn_stdin_writer(stdin_handle, stdin_rx, session.clone());
        }

        self.start_time_ms.store(now_ms(), Ordering::SeqCst);
        *self.last_command.lock().unwrap_or_else(|e| e.into_inner()) = Some(command.to_string());
        *proc = Some(ProcessHandle {
            child,
            stdin_tx,
            session: session.clone(),
        });
        self.running.store(true, Ordering::SeqCst);
        drop(proc);

        tracing::info!("Server process started with PID {}", pid);
        self.emit_console(&format!("Starting server: {}", command));
        let _ = self.events.send(ServerEvent::Started);
        if let Some(relay) = &self.notifier {
            relay.send("✅ Сервер запущен");
        }

        if let Some(sup) = self.me.upgrade() {
            tokio::spawn(async move { sup.monitor_loop().await });
        }
        if let Some(sup) = self.me.upgrade() {
            let hours_rx = self.poll_hours.subscribe();
            tokio::spawn(stats::poll_loop(sup, hours_rx, session));
        }

        Ok(())
    }

    /// Boxed indirection around [`start`] used by the auto-restart path.
    /// Erasing the opaque future to a concrete `Send` trait object breaks the
    /// `start` → `monitor_loop` → `start` opaque-type cycle, which otherwise
    /// prevents the compiler from proving `monitor_loop`'s future is `Send`.
    fn start_boxed<'a>(
        &'a self,
        command: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), SupervisorError>> + Send + 'a>> {
        Box::pin(self.start(command))
    }

    /// Stop the server at the user's request: ask it to shut down via its
    /// own `stop` command, give it [`STOP_GRACE`] to comply, then force-kill.
    /// Guarantees the supervisor is Stopped afterwards; a no-op when nothing
    /// is running (beyond recording that the stop was manual, which also
    /// cancels a pending auto-restart).
    pub async fn stop(&self) {
        // Manual flag first — it is the tie-breaker against a racing
        // auto-restart.
        self.manual_stop.store(true, Ordering::SeqCst);
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        self.emit_console("Stopping server...");
        self.send_command("stop").await;

        let deadline = Instant::now() + STOP_GRACE;
        loop {
            let exited = match self.proc.lock().await.as_mut() {
                Some(handle) => handle.child.try_wait().ok().flatten().is_some(),
                None => true,
            };
            if exited {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Server ignored the stop command, killing the process");
                if let Some(handle) = self.proc.lock().await.as_mut() {
                    let _ = handle.child.kill().await;
                }
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        self.cleanup().await;
        self.emit_console("Server stopped");
        let _ = self.events.send(ServerEvent::Stopped);
        if let Some(relay) = &self.notifier {
            relay.send("⛔ Сервер остановлен");
        }
    }

    /// Write a command line to the server's stdin and echo it into the
    /// console. A no-op when the server is not running or its stdin is gone.
    pub async fn send_command(&self, text: &str) {
        if !self.running.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring command '{}': server is not running", text);
            return;
        }
        let stdin_tx = self.proc.lock().await.as_ref().map(|h| h.stdin_tx.clone());
        let Some(stdin_tx) = stdin_tx else {
            tracing::debug!("Ignoring command '{}': no process handle", text);
            return;
        };
        if stdin_tx.send(text.to_string()).await.is_err() {
            self.emit_console("Failed to send command: server stdin is closed");
            return;
        }
        self.emit_console(&format!("> {}", text));
    }

    /// Trigger one stats collection cycle: issue the diagnostic commands,
    /// then scrape and report after the settle delay. Never fails; with no
    /// relay configured the report is logged only.
    pub async fn request_stats(&self) {
        self.emit_console("Requesting server stats...");
        self.send_command(stats::PLAYER_LIST_COMMAND).await;
        self.send_command(stats::PERFORMANCE_COMMAND).await;
        tokio::spawn(stats::run_collection(
            Arc::clone(&self.console),
            self.notifier.clone(),
            Arc::clone(&self.start_time_ms),
        ));
    }

    /// Change the periodic stats interval. The running scheduler reschedules
    /// with the new period; in-flight collection cycles are unaffected.
    pub fn set_poll_interval(&self, hours: u64) {
        if hours == 0 {
            tracing::warn!("Ignoring poll interval of 0 hours");
            return;
        }
        self.poll_hours.send_replace(hours);
    }

    /// Tear down the current session: flip to Stopped, cancel the output
    /// pumps, stdin writer and poll scheduler, and release the process
    /// handle. Idempotent and safe under concurrent invocation.
    pub async fn cleanup(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let handle = self.proc.lock().await.take();
        if let Some(handle) = handle {
            handle.session.cancel();
            drop(handle.stdin_tx);
            // Reap in the background so an exited child never lingers as a
            // zombie.
            let mut child = handle.child;
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        if was_running {
            tracing::info!("Server session cleaned up");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to console lines and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn console(&self) -> &Arc<ConsoleBuffer> {
        &self.console
    }

    /// Epoch milliseconds of the last successful start, 0 if never started.
    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms.load(Ordering::SeqCst)
    }

    fn emit_console(&self, line: &str) {
        self.console.append(line);
        let _ = self.events.send(ServerEvent::Console {
            content: line.to_string(),
            level: self.console.classify(line),
        });
    }

    fn spawn_pump(
        &self,
        stream: impl AsyncRead + Unpin + Send + 'static,
        session: CancellationToken,
    ) {
        let Some(sup) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                tokio::select! {
                    _ = session.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => sup.emit_console(&line),
                        Ok(None) => break,
                        Err(e) => {
                            // Expected when the pipe closes during a planned
                            // shutdown; only worth reporting otherwise.
                            if !sup.manual_stop.load(Ordering::SeqCst) {
                                sup.emit_console(&format!("Error reading server output: {}", e));
                            }
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Liveness monitor for one session. Polls the child at a fixed cadence;
    /// on unexpected exit performs cleanup and, unless the stop was manual,
    /// relaunches the last-used command after the crash-loop backoff.
    async fn monitor_loop(self: Arc<Self>) {
        let session_started = Instant::now();
        loop {
            tokio::time::sleep(MONITOR_POLL).await;
            if !self.running.load(Ordering::SeqCst) {
                // Session ended through stop()/cleanup().
                return;
            }
            let exited = match self.proc.lock().await.as_mut() {
                Some(handle) => handle.child.try_wait().ok().flatten().is_some(),
                None => true,
            };
            if exited {
                break;
            }
        }

        if self.manual_stop.load(Ordering::SeqCst) {
            // stop() is mid-flight and saw the same exit; let it finish.
            self.cleanup().await;
            return;
        }

        self.emit_console("Server process exited unexpectedly");
        let _ = self.events.send(ServerEvent::Crashed);
        self.cleanup().await;

        if session_started.elapsed() >= BACKOFF_RESET_UPTIME {
            self.consecutive_crashes.store(0, Ordering::SeqCst);
        }
        let crashes = self.consecutive_crashes.fetch_add(1, Ordering::SeqCst) + 1;
        let backoff = Duration::from_secs((1u64 << (crashes.min(7) - 1)).min(BACKOFF_CAP_SECS));

        self.emit_console(&format!(
            "Attempting to restart server in {}s...",
            backoff.as_secs()
        ));
        let _ = self.events.send(ServerEvent::Restarting);
        tokio::time::sleep(backoff).await;

        if self.manual_stop.load(Ordering::SeqCst) {
            self.emit_console("Server was stopped manually, auto-restart skipped");
            let _ = self.events.send(ServerEvent::Stopped);
            return;
        }

        let command = self
            .last_command
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(command) = command {
            if let Err(e) = self.start_boxed(&command).await {
                self.emit_console(&format!("Restart failed: {}", e));
                let _ = self.events.send(ServerEvent::Stopped);
            }
        }
    }
}

fn spawn_stdin_writer(
    mut stdin_handle: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<String>,
    session: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = session.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            let data = if command.ends_with('\n') {
                command
            } else {
                format!("{}\n", command)
            };
            if stdin_handle.write_all(data.as_bytes()).await.is_err() {
                break;
            }
            if stdin_handle.flush().await.is_err() {
                break;
            }
        }
    });
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
