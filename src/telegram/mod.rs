//! Telegram notification relay.
//!
//! Delivery is best-effort and fire-and-forget: messages go onto a bounded
//! queue consumed by a single sender task, failures are logged and never
//! surfaced to callers, nothing is retried. [`TelegramNotifier::shutdown`]
//! cancels the sender so no network call outlives daemon teardown.

use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bot API host; tests point this at a local endpoint instead.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const PROBE_MESSAGE: &str = "✅ Проверка соединения: бот успешно подключен!";
const QUEUE_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("telegram bot token is empty")]
    MissingToken,
    #[error("telegram chat id is empty")]
    MissingChatId,
}

struct Outbound {
    text: String,
    /// Present only for reachability probes.
    delivered: Option<oneshot::Sender<bool>>,
}

pub struct TelegramNotifier {
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TelegramNotifier {
    /// Build a relay for the given bot credentials and spawn its sender
    /// task. Empty credentials are a configuration error: construction is
    /// refused instead of producing a relay that issues doomed requests.
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, NotifyError> {
        Self::with_api_base(bot_token, chat_id, TELEGRAM_API_BASE)
    }

    pub fn with_api_base(bot_token: &str, chat_id: &str, api_base: &str) -> Result<Self, NotifyError> {
        if bot_token.trim().is_empty() {
            return Err(NotifyError::MissingToken);
        }
        if chat_id.trim().is_empty() {
            return Err(NotifyError::MissingChatId);
        }

        let (tx, mut rx) = mpsc::channel::<Outbound>(QUEUE_CAPACITY);
        let url = format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), bot_token.trim());
        let chat_id = chat_id.trim().to_string();
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let worker = tokio::spawn(async move {
            let client = reqwest::Client::new();
            loop {
                let msg = tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let ok = deliver(&client, &url, &chat_id, &msg.text).await;
                if let Some(reply) = msg.delivered {
                    let _ = reply.send(ok);
                }
            }
        });

        Ok(Self {
            tx,
            cancel,
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    /// Queue a message for delivery. Never blocks and never fails the
    /// caller; a full queue drops the message with a warning.
    pub fn send(&self, text: &str) {
        let out = Outbound {
            text: text.to_string(),
            delivered: None,
        };
        if self.tx.try_send(out).is_err() {
            tracing::warn!("Telegram queue full or closed, dropping message");
        }
    }

    /// Send the canned probe message and report whether delivery succeeded.
    pub async fn is_reachable(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let out = Outbound {
            text: PROBE_MESSAGE.to_string(),
            delivered: Some(reply_tx),
        };
        if self.tx.send(out).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Stop the sender task. Queued and in-flight messages are abandoned.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn deliver(client: &reqwest::Client, url: &str, chat_id: &str, text: &str) -> bool {
    let body = json!({ "chat_id": chat_id, "text": text });
    match client.post(url).json(&body).send().await {
        Ok(resp) => {
            let status = resp.status();
            // Response body is consumed and discarded either way.
            let _ = resp.bytes().await;
            if status.is_success() {
                true
            } else {
                tracing::warn!("Telegram sendMessage returned {}", status);
                false
            }
        }
        Err(e) => {
            tracing::warn!("Telegram sendMessage failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_empty_credentials() {
        assert!(matches!(TelegramNotifier::new("", "42"), Err(NotifyError::MissingToken)));
        assert!(matches!(TelegramNotifier::new("  ", "42"), Err(NotifyError::MissingToken)));
        assert!(matches!(TelegramNotifier::new("123:abc", ""), Err(NotifyError::MissingChatId)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_failure() {
        // Port 9 (discard) is not listening; no external network involved.
        let relay = TelegramNotifier::with_api_base("123:abc", "42", "http://127.0.0.1:9").unwrap();
        assert!(!relay.is_reachable().await);
        // Failures never surface to callers.
        relay.send("lost message");
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_prompt_and_repeat_safe() {
        let relay = TelegramNotifier::with_api_base("123:abc", "42", "http://127.0.0.1:9").unwrap();
        relay.shutdown().await;
        relay.shutdown().await;
        // Sends after shutdown are dropped, not panics.
        relay.send("into the void");
    }
}
