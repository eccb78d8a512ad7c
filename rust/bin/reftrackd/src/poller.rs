use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::InboundEvent;
use crate::dispatch::Dispatcher;
use crate::telegram::{TelegramError, Update};

/// Where updates come from.
#[async_trait::async_trait]
pub trait UpdateSource: Send + Sync {
    async fn next_batch(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError>;
}

/// Where replies go.
#[async_trait::async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError>;
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Long-poll timeout passed to the update source (seconds).
    pub timeout_secs: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Long-poll loop. Events are handled one at a time, in delivery order,
/// until `cancel` fires.
pub async fn run(
    source: Arc<dyn UpdateSource>,
    sink: Arc<dyn ChatSink>,
    dispatcher: Arc<Dispatcher>,
    config: PollConfig,
    cancel: CancellationToken,
) {
    info!("update poller started (timeout={}s)", config.timeout_secs);
    let mut offset = 0;
    let mut backoff = config.initial_backoff;

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = source.next_batch(offset, config.timeout_secs) => batch,
        };

        match batch {
            Ok(updates) => {
                backoff = config.initial_backoff;
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(ev) = update.message.as_ref().and_then(InboundEvent::from_message)
                    else {
                        debug!(update = update.update_id, "skipping update");
                        continue;
                    };
                    let reply = dispatcher.handle(&ev).await;
                    if let Err(e) = sink.send_text(ev.chat_id, &reply).await {
                        warn!(chat = ev.chat_id, visitor = ev.visitor_id, "failed to send reply: {e}");
                    }
                }
            }
            Err(e) => {
                warn!("getUpdates failed, retrying in {backoff:?}: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }

    info!("update poller stopped");
}
