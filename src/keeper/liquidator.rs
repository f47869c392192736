//! Delayed liquidation (consumer side)
//!
//! Holds the queue head until its deadline has passed, sells the full
//! position, then advances the durable watermark before dropping the
//! entry. A failing head is retried on the next iteration with no backoff
//! and no pop: later entries wait, even past their own deadlines, until
//! the head sells or the process restarts.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use super::PendingSell;
use crate::dbotx::TradeSource;
use crate::store::WatermarkStore;

pub struct Liquidator {
    source: Arc<dyn TradeSource>,
    store: Arc<dyn WatermarkStore>,
    queue: mpsc::UnboundedReceiver<PendingSell>,
    /// Head entry held across failed attempts; dropped only after a
    /// successful sell
    head: Option<PendingSell>,
    /// Highest createAt successfully liquidated
    watermark: i64,
    idle_interval: Duration,
}

impl Liquidator {
    pub fn new(
        source: Arc<dyn TradeSource>,
        store: Arc<dyn WatermarkStore>,
        queue: mpsc::UnboundedReceiver<PendingSell>,
        watermark: i64,
        idle_interval_ms: u64,
    ) -> Self {
        Self {
            source,
            store,
            queue,
            head: None,
            watermark,
            idle_interval: Duration::from_millis(idle_interval_ms),
        }
    }

    /// Run until the shutdown signal fires. Shutdown is honored between
    /// attempts, never mid-request.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Liquidation loop started at watermark {}", self.watermark);

        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }

            self.step().await;
        }

        info!("Liquidation loop stopped");
    }

    /// One iteration: idle while the queue is empty or the head's deadline
    /// has not passed, otherwise attempt the sale. A failed attempt leaves
    /// the head in place for an immediate retry.
    pub async fn step(&mut self) {
        if self.head.is_none() {
            match self.queue.try_recv() {
                Ok(entry) => self.head = Some(entry),
                Err(_) => {
                    sleep(self.idle_interval).await;
                    return;
                }
            }
        }

        let Some(entry) = self.head.as_ref() else {
            return;
        };

        // Coarse-grained wait: the sale lands at deadline + up to one idle
        // interval
        if now_ms() <= entry.deadline_ms {
            sleep(self.idle_interval).await;
            return;
        }

        let token = entry.trade.token_contract().to_string();
        let create_at = entry.trade.create_at;

        match self.source.sell_all(&token).await {
            Ok(order) => {
                self.watermark = create_at;
                if let Err(e) = self.store.save(create_at).await {
                    // The sell already executed; a crash before the next
                    // successful save replays this trade after restart
                    error!("Failed to persist watermark {}: {}", create_at, e);
                }
                self.head = None;
                info!(
                    "Sold {} (order {}), watermark now {}",
                    token, order.id, create_at
                );
            }
            Err(e) => {
                // Head stays put: later entries wait until this one sells
                error!("Failed to sell {}: {}", token, e);
            }
        }
    }

    /// Highest createAt successfully liquidated so far
    pub fn watermark(&self) -> i64 {
        self.watermark
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
