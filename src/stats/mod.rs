//! Stats collection — diagnostic commands, settle delay, extraction,
//! report assembly, periodic polling.

pub mod extract;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::console::ConsoleBuffer;
use crate::supervisor::ServerSupervisor;
use crate::telegram::TelegramNotifier;
use crate::utils::format_duration;

/// Commands written to the server before scraping its output.
pub const PLAYER_LIST_COMMAND: &str = "list";
pub const PERFORMANCE_COMMAND: &str = "tps";

/// Wait between issuing the diagnostic commands and scraping their output,
/// giving the server time to respond.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_POLL_INTERVAL_HOURS: u64 = 3;

/// One collection cycle's worth of server metrics. Built fresh per cycle;
/// extraction misses leave the sentinel in place, so the report is always
/// sendable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub online_players: String,
    pub tps: String,
    pub memory: String,
    pub uptime: String,
    pub timestamp: String,
}

impl StatsReport {
    /// Assemble a report from a console snapshot and the recorded server
    /// start time (epoch milliseconds, 0 when the server never started).
    pub fn collect(snapshot: &str, start_time_ms: u64) -> Self {
        let uptime = if start_time_ms == 0 {
            "N/A".to_string()
        } else {
            format_duration(now_ms().saturating_sub(start_time_ms))
        };
        Self {
            online_players: extract::parse_online_players(snapshot),
            tps: extract::parse_tps(snapshot),
            memory: extract::parse_memory(snapshot),
            uptime,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Telegram message text for this report.
    pub fn render(&self) -> String {
        format!(
            "📊 Статистика сервера ({})\n\
             🔄 Состояние: работает\n\
             🧮 Память: {}\n\
             👥 Онлайн: {} игроков\n\
             ⏱ TPS: {}\n\
             ⏳ Время работы: {}",
            self.timestamp, self.memory, self.online_players, self.tps, self.uptime
        )
    }
}

/// One-shot collection cycle: wait out the settle delay, scrape the console
/// snapshot, assemble the report, log it, and hand it to the relay. Failure
/// to deliver never propagates; the report is always logged locally.
pub(crate) async fn run_collection(
    console: Arc<ConsoleBuffer>,
    notifier: Option<Arc<TelegramNotifier>>,
    start_time_ms: Arc<AtomicU64>,
) {
    tokio::time::sleep(SETTLE_DELAY).await;
    let snapshot = console.snapshot();
    let report = StatsReport::collect(&snapshot, start_time_ms.load(Ordering::SeqCst));
    let text = report.render();
    tracing::info!("Server stats report:\n{}", text);
    match notifier {
        Some(relay) => relay.send(&text),
        None => tracing::debug!("No Telegram relay configured, report logged only"),
    }
}

/// Periodic poll loop. Fires a stats request once per interval, first fire
/// after one full interval. An interval change through the watch channel
/// reschedules the timer with the new period; in-flight collection cycles
/// are unaffected.
pub(crate) async fn poll_loop(
    supervisor: Arc<ServerSupervisor>,
    mut hours_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
) {
    loop {
        let hours = (*hours_rx.borrow_and_update()).max(1);
        let period = Duration::from_secs(hours * 3_600);
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = hours_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                tracing::info!("Stats poll interval changed to {}h, rescheduling", *hours_rx.borrow());
            }
            _ = tokio::time::sleep(period) => {
                supervisor.request_stats().await;
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "\
[12:00:00] [Server thread/INFO]: Done (5.123s)! For help, type \"help\"
[12:03:01] [Server thread/INFO]: There are 3/20 players online:
[12:03:01] [Server thread/INFO]: Current Memory Usage: 2048/8192 MB
[12:03:02] [Server thread/INFO]: TPS from last 1m, 5m, 15m: 19.99, 20.00, 20.00
";

    #[test]
    fn report_fields_come_from_snapshot() {
        let report = StatsReport::collect(SNAPSHOT, 0);
        assert_eq!(report.online_players, "3/20");
        assert_eq!(report.tps, "19.99");
        assert_eq!(report.memory, "2048/8192 MB");
        assert_eq!(report.uptime, "N/A");
        assert!(!report.timestamp.is_empty());
    }

    #[test]
    fn report_uptime_from_start_timestamp() {
        let start = now_ms() - 65_000;
        let report = StatsReport::collect(SNAPSHOT, start);
        assert_eq!(report.uptime, "1м 5с");
    }

    #[test]
    fn report_is_well_formed_on_empty_console() {
        let report = StatsReport::collect("", 0);
        assert_eq!(report.online_players, extract::UNKNOWN);
        assert_eq!(report.tps, extract::UNKNOWN);
        assert_eq!(report.memory, extract::UNKNOWN);
        assert_eq!(report.uptime, "N/A");
    }

    #[test]
    fn rendered_report_contains_all_fields() {
        let report = StatsReport::collect(SNAPSHOT, 0);
        let text = report.render();
        assert!(text.contains("📊 Статистика сервера"));
        assert!(text.contains("🧮 Память: 2048/8192 MB"));
        assert!(text.contains("👥 Онлайн: 3/20 игроков"));
        assert!(text.contains("⏱ TPS: 19.99"));
        assert!(text.contains("⏳ Время работы: N/A"));
    }

    #[tokio::test]
    async fn collection_without_relay_just_logs() {
        // Must complete (and not panic) with no relay configured; the settle
        // delay is the only wait involved.
        tokio::time::pause();
        let console = ConsoleBuffer::new(50);
        console.append("[12:03:01] [Server thread/INFO]: There are 0/20 players online:");
        let start = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run_collection(Arc::clone(&console), None, start));
        tokio::time::advance(SETTLE_DELAY + Duration::from_millis(100)).await;
        handle.await.unwrap();
    }
}
