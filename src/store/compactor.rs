use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{MemoryStore, StoreError};

/// Compact the store's WAL once it has grown past `threshold` appends.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &MemoryStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task that periodically compacts the WAL.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Item, Store, TableSchema};

    fn item(id: &str) -> Item {
        let mut item = Item::new();
        item.insert("id".into(), id.into());
        item
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("c.wal"), [TableSchema::new("t", "id")])
            .unwrap();

        for i in 0..3 {
            store.put("t", item(&i.to_string()), None).await.unwrap();
        }
        assert!(!compact_if_needed(&store, 5).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 3);

        for i in 3..6 {
            store.put("t", item(&i.to_string()), None).await.unwrap();
        }
        assert!(compact_if_needed(&store, 5).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(store.len("t").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn volatile_store_never_compacts() {
        let store = MemoryStore::new([TableSchema::new("t", "id")]);
        store.put("t", item("a"), None).await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
        assert!(!compact_if_needed(&store, 1).await.unwrap());
    }
}
