//! The discovery/liquidation pipeline
//!
//! Two tasks share one unbounded channel: discovery appends newly observed
//! follow trades at the tail, the liquidator drains the head once each
//! entry's sell delay has elapsed. The volatile cursor lives inside the
//! discovery task and the durable watermark inside the liquidator, so
//! every mutable field has exactly one writer and nothing needs a lock.

pub mod discovery;
pub mod liquidator;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::config::KeeperConfig;
use crate::dbotx::{FollowTrade, TradeSource};
use crate::error::Result;
use crate::store::WatermarkStore;

pub use discovery::DiscoveryLoop;
pub use liquidator::Liquidator;

/// A follow trade waiting out its sell delay
#[derive(Debug, Clone)]
pub struct PendingSell {
    pub trade: FollowTrade,
    /// createAt + sell delay, milliseconds since epoch
    pub deadline_ms: i64,
}

impl PendingSell {
    pub fn new(trade: FollowTrade, sell_delay_seconds: u64) -> Self {
        let deadline_ms = trade.create_at + sell_delay_seconds as i64 * 1000;
        Self { trade, deadline_ms }
    }
}

/// Lifecycle controller for the two pipeline loops
pub struct Keeper {
    source: Arc<dyn TradeSource>,
    store: Arc<dyn WatermarkStore>,
    config: KeeperConfig,
    shutdown: broadcast::Sender<()>,
}

impl Keeper {
    pub fn new(
        source: Arc<dyn TradeSource>,
        store: Arc<dyn WatermarkStore>,
        config: KeeperConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            source,
            store,
            config,
            shutdown,
        }
    }

    /// Signal both loops to stop at their next iteration boundary. An
    /// in-flight request always completes first.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Load the watermark, start both loops and run until shutdown
    pub async fn run(&self) -> Result<()> {
        // Ensure storage exists and is well-formed before the loops start
        let watermark = self.store.load().await?;
        self.store.save(watermark).await?;

        info!("Resuming from watermark {}", watermark);

        let (tx, rx) = mpsc::unbounded_channel::<PendingSell>();

        let discovery = DiscoveryLoop::new(
            self.source.clone(),
            tx,
            watermark,
            self.config.sell_delay_seconds,
            self.config.poll_interval_ms,
        );
        let liquidator = Liquidator::new(
            self.source.clone(),
            self.store.clone(),
            rx,
            watermark,
            self.config.idle_interval_ms,
        );

        let discovery_handle = tokio::spawn(discovery.run(self.shutdown.subscribe()));
        let liquidator_handle = tokio::spawn(liquidator.run(self.shutdown.subscribe()));

        let _ = discovery_handle.await;
        let _ = liquidator_handle.await;

        info!("Keeper stopped");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{trade, FakeSource, MemoryStore};
    use super::*;
    use crate::dbotx::TradeState;
    use std::time::{Duration, Instant};

    #[test]
    fn test_pending_sell_deadline() {
        let pending = PendingSell::new(trade("a", 1000, TradeState::Filled, "0xA"), 5);
        assert_eq!(pending.deadline_ms, 6000);
    }

    #[tokio::test]
    async fn test_pipeline_resumes_from_watermark() {
        let source = Arc::new(FakeSource::new());
        source.push_page(vec![
            // Newest-first, as the feed returns them. The older entry sits
            // at or below the stored watermark and must not be re-sold.
            trade("new", 200, TradeState::Filled, "0xNEW"),
            trade("old", 50, TradeState::Filled, "0xOLD"),
        ]);
        let store = Arc::new(MemoryStore::new(100));

        let config = KeeperConfig {
            sell_delay_seconds: 1,
            poll_interval_ms: 1,
            idle_interval_ms: 1,
            watermark_path: String::new(),
        };
        let keeper = Arc::new(Keeper::new(source.clone(), store.clone(), config));

        let run_keeper = keeper.clone();
        let handle = tokio::spawn(async move { run_keeper.run().await });

        let deadline = Instant::now() + Duration::from_secs(5);
        while source.sold().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        keeper.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(source.sold(), vec!["0xNEW".to_string()]);
        // Startup re-persist, then the liquidation advance
        assert_eq!(store.saves.lock().unwrap().clone(), vec![100, 200]);
        assert_eq!(*store.value.lock().unwrap(), 200);
    }

    #[tokio::test]
    async fn test_liquidates_in_create_at_order() {
        let source = Arc::new(FakeSource::new());
        // One page carrying two fills, newest-first as the feed returns them
        source.push_page(vec![
            trade("b", 2000, TradeState::Filled, "0xB"),
            trade("a", 1000, TradeState::Filled, "0xA"),
        ]);
        let store = Arc::new(MemoryStore::new(0));

        let config = KeeperConfig {
            sell_delay_seconds: 1,
            poll_interval_ms: 1,
            idle_interval_ms: 1,
            watermark_path: String::new(),
        };
        let keeper = Arc::new(Keeper::new(source.clone(), store.clone(), config));

        let run_keeper = keeper.clone();
        let handle = tokio::spawn(async move { run_keeper.run().await });

        let deadline = Instant::now() + Duration::from_secs(5);
        while source.sold().len() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        keeper.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(source.sold(), vec!["0xA".to_string(), "0xB".to_string()]);
        // Watermark only ever moves forward
        assert_eq!(store.saves.lock().unwrap().clone(), vec![0, 1000, 2000]);
    }

    #[tokio::test]
    async fn test_restart_skips_already_liquidated_trades() {
        let source = Arc::new(FakeSource::new());
        let store = Arc::new(MemoryStore::new(0));

        let config = KeeperConfig {
            sell_delay_seconds: 1,
            poll_interval_ms: 1,
            idle_interval_ms: 1,
            watermark_path: String::new(),
        };

        // First run: one fill, liquidated normally
        source.push_page(vec![trade("a", 1000, TradeState::Filled, "0xA")]);
        let keeper = Arc::new(Keeper::new(source.clone(), store.clone(), config.clone()));
        let run_keeper = keeper.clone();
        let handle = tokio::spawn(async move { run_keeper.run().await });

        let deadline = Instant::now() + Duration::from_secs(5);
        while source.sold().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        keeper.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(source.sold(), vec!["0xA".to_string()]);

        // Second run: the feed still returns the same trade; the restored
        // watermark keeps it out of the queue
        source.push_page(vec![trade("a", 1000, TradeState::Filled, "0xA")]);
        let keeper = Arc::new(Keeper::new(source.clone(), store.clone(), config));
        let run_keeper = keeper.clone();
        let handle = tokio::spawn(async move { run_keeper.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        keeper.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(source.sold(), vec!["0xA".to_string()]);
        assert_eq!(*store.value.lock().unwrap(), 1000);
    }
}
