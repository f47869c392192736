//! Follow-trade discovery (producer side)
//!
//! Polls the feed and admits unseen fills into the delay queue in
//! ascending createAt order. The cursor only ever moves forward within a
//! run; it restarts from the durable watermark, so trades enqueued but
//! not liquidated before a crash are re-admitted on the next run.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use super::PendingSell;
use crate::dbotx::TradeSource;
use crate::error::Result;

pub struct DiscoveryLoop {
    source: Arc<dyn TradeSource>,
    queue: mpsc::UnboundedSender<PendingSell>,
    /// Highest createAt already enqueued this run
    cursor: i64,
    sell_delay_seconds: u64,
    poll_interval: Duration,
}

impl DiscoveryLoop {
    pub fn new(
        source: Arc<dyn TradeSource>,
        queue: mpsc::UnboundedSender<PendingSell>,
        cursor: i64,
        sell_delay_seconds: u64,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            source,
            queue,
            cursor,
            sell_delay_seconds,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }

    /// Run until the shutdown signal fires. Feed errors are logged and
    /// retried after the poll interval; they never terminate the loop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Discovery loop started at cursor {}", self.cursor);

        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!("Failed to fetch follow trades: {}", e);
            }

            sleep(self.poll_interval).await;
        }

        info!("Discovery loop stopped");
    }

    /// One poll of the feed; returns how many trades were admitted
    pub async fn poll_once(&mut self) -> Result<usize> {
        let mut trades = self.source.follow_trades().await?;

        // The feed is newest-first; admit oldest-first so queue order
        // matches createAt order
        trades.retain(|t| !t.state.is_failed());
        trades.sort_by_key(|t| t.create_at);

        let mut admitted = 0;
        for trade in trades {
            if trade.create_at <= self.cursor {
                continue;
            }

            self.cursor = trade.create_at;
            info!(
                "New follow trade {} for {} at {}",
                trade.id,
                trade.token_contract(),
                trade.create_at
            );

            if self
                .queue
                .send(PendingSell::new(trade, self.sell_delay_seconds))
                .is_err()
            {
                // Consumer is gone; nothing left to admit to
                break;
            }
            admitted += 1;
        }

        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbotx::TradeState;
    use crate::keeper::fakes::{trade, FakeSource};

    fn drain(rx: &mut mpsc::UnboundedReceiver<PendingSell>) -> Vec<PendingSell> {
        let mut out = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            out.push(entry);
        }
        out
    }

    #[tokio::test]
    async fn test_admits_new_trades_oldest_first() {
        let source = Arc::new(FakeSource::new());
        source.push_page(vec![
            trade("c", 3000, TradeState::Filled, "0xC"),
            trade("b", 2000, TradeState::Fail, "0xB"),
            trade("a", 1000, TradeState::Filled, "0xA"),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut discovery = DiscoveryLoop::new(source, tx, 0, 5, 500);

        let admitted = discovery.poll_once().await.unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(discovery.cursor, 3000);

        let entries = drain(&mut rx);
        let ids: Vec<_> = entries.iter().map(|e| e.trade.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(entries[0].deadline_ms, 1000 + 5 * 1000);
    }

    #[tokio::test]
    async fn test_skips_trades_at_or_below_cursor() {
        let source = Arc::new(FakeSource::new());
        source.push_page(vec![
            trade("c", 1500, TradeState::Filled, "0xC"),
            trade("b", 1000, TradeState::Filled, "0xB"),
            trade("a", 999, TradeState::Filled, "0xA"),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut discovery = DiscoveryLoop::new(source, tx, 1000, 5, 500);

        let admitted = discovery.poll_once().await.unwrap();
        assert_eq!(admitted, 1);

        let entries = drain(&mut rx);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trade.id, "c");
        assert_eq!(discovery.cursor, 1500);
    }

    #[tokio::test]
    async fn test_repeated_pages_do_not_duplicate() {
        let source = Arc::new(FakeSource::new());
        source.push_page(vec![trade("a", 1000, TradeState::Filled, "0xA")]);
        source.push_page(vec![
            trade("b", 2000, TradeState::Filled, "0xB"),
            trade("a", 1000, TradeState::Filled, "0xA"),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut discovery = DiscoveryLoop::new(source, tx, 0, 5, 500);

        assert_eq!(discovery.poll_once().await.unwrap(), 1);
        assert_eq!(discovery.poll_once().await.unwrap(), 1);

        let entries = drain(&mut rx);
        let ids: Vec<_> = entries.iter().map(|e| e.trade.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_feed_error_is_surfaced_then_recovers() {
        let source = Arc::new(FakeSource::new());
        source.fail_feeds(1);
        source.push_page(vec![trade("a", 1000, TradeState::Filled, "0xA")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut discovery = DiscoveryLoop::new(source, tx, 0, 5, 500);

        assert!(discovery.poll_once().await.is_err());
        assert_eq!(discovery.poll_once().await.unwrap(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
