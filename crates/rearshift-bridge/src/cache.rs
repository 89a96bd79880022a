//! One-shot cache for the rear display's metadata.
//!
//! The first successful fetch is canonical for the life of the process;
//! panel geometry does not change under us. While the channel is down
//! the hard-coded defaults are served immediately, never awaited on.

use crate::connection::BridgeHandle;
use crate::display::DisplayMetadata;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct DisplayCache {
    cached: Arc<RwLock<Option<DisplayMetadata>>>,
}

impl DisplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached metadata, fetching once on a miss. A miss with no bound
    /// channel yields the defaults without populating the cache, so a
    /// later call retries the fetch.
    pub async fn get(&self, handle: &BridgeHandle) -> DisplayMetadata {
        if let Some(meta) = *self.cached.read().await {
            return meta;
        }
        match self.fetch(handle).await {
            Some(meta) => meta,
            None => {
                tracing::debug!("display metadata unavailable, serving defaults");
                DisplayMetadata::default()
            }
        }
    }

    /// Drop the cache and refetch. Never invoked automatically.
    pub async fn refresh(&self, handle: &BridgeHandle) -> DisplayMetadata {
        *self.cached.write().await = None;
        self.get(handle).await
    }

    async fn fetch(&self, handle: &BridgeHandle) -> Option<DisplayMetadata> {
        let bridge = handle.current().await?;
        match bridge.fetch_display_metadata().await {
            Ok(meta) => {
                let mut slot = self.cached.write().await;
                // A concurrent fetch may have won; first write stays.
                Some(*slot.get_or_insert(meta))
            }
            Err(e) => {
                tracing::warn!(error = %e, "display metadata fetch failed");
                None
            }
        }
    }
}
