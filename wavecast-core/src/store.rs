//! Shared state store surface.
//!
//! The store is an external collaborator: a remote record with change
//! notifications. The engine only needs read, partial write, and a stream
//! of "something changed" notices per table. Delivery is at-least-once;
//! duplicates and reordering are tolerated downstream by timestamp
//! comparison, and a dropped notice stream means "stale state", never
//! "nothing is playing".

use crate::error::Result;
use crate::state::{StationDelta, StationState};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Tables the station subscribes to. Only `station_state` carries sync
/// semantics; the rest are invalidation triggers for dependent lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTable {
    StationState,
    NewsItems,
    Messages,
    MediaFiles,
}

impl StoreTable {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StationState => "station_state",
            Self::NewsItems => "news_items",
            Self::Messages => "messages",
            Self::MediaFiles => "media_files",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "station_state" => Some(Self::StationState),
            "news_items" => Some(Self::NewsItems),
            "messages" => Some(Self::Messages),
            "media_files" => Some(Self::MediaFiles),
            _ => None,
        }
    }

    /// Every subscribable table.
    pub const ALL: [Self; 4] = [
        Self::StationState,
        Self::NewsItems,
        Self::Messages,
        Self::MediaFiles,
    ];
}

impl std::fmt::Display for StoreTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change notification: which table changed and when.
#[derive(Debug, Clone, Copy)]
pub struct ChangeNotice {
    pub table: StoreTable,
    pub timestamp: i64,
}

/// The consumed store surface.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the current station record.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable; callers treat that
    /// as stale state and keep whatever they last applied.
    async fn read(&self) -> Result<StationState>;

    /// Merge a partial update into the station record. Fire-and-forget at
    /// the call sites: a failure is logged and the next heartbeat
    /// re-establishes consistency.
    ///
    /// # Errors
    ///
    /// Returns an error when the store rejects or cannot receive the write.
    async fn write(&self, delta: &StationDelta) -> Result<()>;

    /// Subscribe to change notices for all tables.
    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice>;
}

/// In-process store used by tests and offline operation.
pub struct MemoryStore {
    state: RwLock<StationState>,
    notice_tx: broadcast::Sender<ChangeNotice>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (notice_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: RwLock::new(StationState::default()),
            notice_tx,
        })
    }

    /// Replace the record wholesale and notify, bypassing delta merge.
    /// Lets tests inject snapshots exactly as a remote writer would have
    /// produced them.
    pub async fn inject(&self, state: StationState) {
        let timestamp = state.timestamp;
        *self.state.write().await = state;
        let _ = self.notice_tx.send(ChangeNotice {
            table: StoreTable::StationState,
            timestamp,
        });
    }

    /// Emit a bare invalidation notice for a non-state table.
    pub fn notify(&self, table: StoreTable, timestamp: i64) {
        let _ = self.notice_tx.send(ChangeNotice { table, timestamp });
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self) -> Result<StationState> {
        Ok(self.state.read().await.clone())
    }

    async fn write(&self, delta: &StationDelta) -> Result<()> {
        let timestamp = delta.timestamp;
        {
            let mut state = self.state.write().await;
            delta.apply_to(&mut state);
        }
        let _ = self.notice_tx.send(ChangeNotice {
            table: StoreTable::StationState,
            timestamp,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.notice_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_write_notifies() {
        let store = MemoryStore::new();
        let mut notices = store.subscribe();

        let delta = StationDelta::stamped(1_000, "admin-1").with_playing(true);
        store.write(&delta).await.unwrap();

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.table, StoreTable::StationState);
        assert_eq!(notice.timestamp, 1_000);
        assert!(store.read().await.unwrap().is_playing);
    }

    #[test]
    fn test_table_names_round_trip() {
        for table in StoreTable::ALL {
            assert_eq!(StoreTable::from_name(table.as_str()), Some(table));
        }
        assert!(StoreTable::from_name("unknown").is_none());
    }
}
