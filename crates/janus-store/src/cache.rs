//! Read-only in-memory gallery snapshot.
//!
//! The recognition loop matches against this snapshot on every cycle, so
//! reads must be cheap and internally consistent. The snapshot is an
//! `Arc<Vec<_>>` swapped atomically on refresh; readers may be at most
//! one refresh stale, which is acceptable for enrollment changes.

use crate::gallery::GalleryStore;
use crate::StoreError;
use janus_core::EnrolledFace;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct GalleryCache {
    store: GalleryStore,
    snapshot: Arc<RwLock<Arc<Vec<EnrolledFace>>>>,
}

impl GalleryCache {
    /// Build the cache with an initial load from the store.
    pub async fn load(store: GalleryStore) -> Result<Self, StoreError> {
        let faces = store.list().await?;
        tracing::info!(enrolled = faces.len(), "gallery snapshot loaded");
        Ok(Self {
            store,
            snapshot: Arc::new(RwLock::new(Arc::new(faces))),
        })
    }

    /// Current snapshot. Never blocks on the database.
    pub fn snapshot(&self) -> Arc<Vec<EnrolledFace>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the gallery from the store; called after every
    /// enrollment write.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let faces = Arc::new(self.store.list().await?);
        let count = faces.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = faces;
        tracing::debug!(enrolled = count, "gallery snapshot refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EmbeddingSealer;
    use crate::Store;
    use janus_core::Embedding;

    #[tokio::test]
    async fn test_snapshot_tracks_refresh() {
        let store = Store::open_in_memory(Arc::new(EmbeddingSealer::new(&[1u8; 32])))
            .await
            .unwrap();
        let cache = GalleryCache::load(store.gallery().clone()).await.unwrap();
        assert!(cache.snapshot().is_empty());

        store
            .gallery()
            .append("alice", &Embedding { values: vec![1.0, 0.0] })
            .await
            .unwrap();

        // Not visible until the explicit refresh.
        assert!(cache.snapshot().is_empty());
        cache.refresh().await.unwrap();

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "alice");
    }
}
