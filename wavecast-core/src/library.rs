//! Media library accessor.
//!
//! Upload and catalog management live elsewhere; the sync engine only needs
//! to list tracks and resolve an id to a playable URL, and to be told when
//! the catalog changed so deferred resolutions can complete.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One entry of the station's media catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub id: String,
    pub name: String,
    /// Playable URL; may be absent while the asset is still syncing.
    pub url: Option<String>,
}

#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn tracks(&self) -> Vec<TrackRef>;

    async fn resolve(&self, id: &str) -> Option<TrackRef>;

    /// Whether the catalog has been fetched at least once. Track
    /// resolution is deferred until this is true.
    async fn is_loaded(&self) -> bool;

    /// Re-fetch the catalog after an invalidation notice.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing catalog cannot be fetched.
    async fn refresh(&self) -> Result<()>;
}

/// In-process library seeded from config or tests.
pub struct MemoryLibrary {
    // None until the first load, so "library not loaded yet" and
    // "library is empty" stay distinguishable.
    inner: RwLock<Option<Vec<TrackRef>>>,
}

impl MemoryLibrary {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn with_tracks(tracks: Vec<TrackRef>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Some(tracks)),
        })
    }

    pub async fn set_tracks(&self, tracks: Vec<TrackRef>) {
        *self.inner.write().await = Some(tracks);
    }
}

#[async_trait]
impl MediaLibrary for MemoryLibrary {
    async fn tracks(&self) -> Vec<TrackRef> {
        self.inner.read().await.clone().unwrap_or_default()
    }

    async fn resolve(&self, id: &str) -> Option<TrackRef> {
        self.inner
            .read()
            .await
            .as_ref()
            .and_then(|tracks| tracks.iter().find(|t| t.id == id).cloned())
    }

    async fn is_loaded(&self) -> bool {
        self.inner.read().await.is_some()
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}
