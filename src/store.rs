//! Durable liquidation watermark
//!
//! The watermark records the `createAt` of the last successfully
//! liquidated follow trade. It is the only state that survives restarts:
//! discovery resumes from it, so a trade that was observed but not yet
//! sold before a crash is re-admitted on the next run, while anything at
//! or below the watermark is never sold twice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Milliseconds since epoch of the last liquidated trade
pub type Watermark = i64;

/// Persisted record layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkRecord {
    last_liquidated_at: Watermark,
}

/// Stable storage for the liquidation watermark
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Returns the persisted watermark. If no storage exists yet it is
    /// created seeded with the current wall-clock time, so trades that
    /// predate the first run are never replayed.
    async fn load(&self) -> Result<Watermark>;

    /// Overwrites the persisted watermark in full
    async fn save(&self, watermark: Watermark) -> Result<()>;
}

/// JSON-file backend
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self) -> Result<Watermark> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::WatermarkPersistence(e.to_string()))?;
            }
        }

        if !self.path.exists() {
            let seeded = chrono::Utc::now().timestamp_millis();
            self.save(seeded).await?;
            info!(
                "Created watermark storage at {}, seeded with current time",
                self.path.display()
            );
            return Ok(seeded);
        }

        let data = fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::WatermarkPersistence(e.to_string()))?;

        let record: WatermarkRecord = serde_json::from_str(&data)
            .map_err(|e| Error::WatermarkPersistence(e.to_string()))?;

        debug!(
            "Loaded watermark {} from {}",
            record.last_liquidated_at,
            self.path.display()
        );
        Ok(record.last_liquidated_at)
    }

    async fn save(&self, watermark: Watermark) -> Result<()> {
        let record = WatermarkRecord {
            last_liquidated_at: watermark,
        };
        let data = serde_json::to_string(&record)
            .map_err(|e| Error::WatermarkPersistence(e.to_string()))?;

        fs::write(&self.path, data)
            .await
            .map_err(|e| Error::WatermarkPersistence(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeds_missing_storage_with_now() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("watermark.json");
        let store = FileWatermarkStore::new(&path);

        let before = chrono::Utc::now().timestamp_millis();
        let loaded = store.load().await.unwrap();
        let after = chrono::Utc::now().timestamp_millis();

        assert!(loaded >= before && loaded <= after);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermark.json");
        let store = FileWatermarkStore::new(&path);

        store.save(1000).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 1000);

        store.save(2000).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 2000);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"lastLiquidatedAt":2000}"#);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermark.json");

        FileWatermarkStore::new(&path).save(4242).await.unwrap();
        assert_eq!(
            FileWatermarkStore::new(&path).load().await.unwrap(),
            4242
        );
    }

    #[tokio::test]
    async fn test_rejects_malformed_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermark.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileWatermarkStore::new(&path);
        assert!(store.load().await.is_err());
    }
}
