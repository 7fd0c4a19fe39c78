//! Per-media transcode resource tracking.
//!
//! Several sessions may use the same media item at once (two windows, a
//! session being rebuilt while the next one starts). Server-side transcode
//! work for an item is released only when the last session using it lets go,
//! and releasing one item never touches another.

use dashmap::DashMap;
use sceneforged_common::MediaId;
use std::sync::Arc;

use crate::gateway::TranscodeControl;

/// Thread-safe reference counter of active leases per media item.
#[derive(Clone)]
pub struct ResourceManager {
    leases: Arc<DashMap<MediaId, usize>>,
    control: Arc<dyn TranscodeControl>,
}

impl ResourceManager {
    /// Create a manager that releases through `control`.
    pub fn new(control: Arc<dyn TranscodeControl>) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            control,
        }
    }

    /// Take a lease on `media_id`. The transcode stays alive while any lease
    /// for the item exists.
    pub fn acquire(&self, media_id: MediaId) -> ResourceLease {
        let mut count = self.leases.entry(media_id).or_insert(0);
        *count += 1;
        tracing::debug!(media_id = %media_id, leases = *count, "Acquired transcode lease");

        ResourceLease {
            media_id,
            manager: self.clone(),
        }
    }

    /// Number of live leases for `media_id`.
    pub fn lease_count(&self, media_id: MediaId) -> usize {
        self.leases.get(&media_id).map(|c| *c).unwrap_or(0)
    }

    fn release(&self, media_id: MediaId) {
        let remaining = match self.leases.get_mut(&media_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };

        if remaining > 0 {
            tracing::debug!(media_id = %media_id, leases = remaining, "Released transcode lease");
            return;
        }

        // Re-check under the entry lock; a new acquire may have raced in.
        if self.leases.remove_if(&media_id, |_, c| *c == 0).is_none() {
            return;
        }

        let control = self.control.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match control.release(media_id).await {
                        Ok(()) => {
                            tracing::info!(media_id = %media_id, "Released server transcode")
                        }
                        Err(e) => tracing::warn!(
                            media_id = %media_id,
                            error = %e,
                            "Failed to release server transcode"
                        ),
                    }
                });
            }
            Err(_) => {
                tracing::warn!(media_id = %media_id, "No runtime to release server transcode");
            }
        }
    }
}

/// A held reference on a media item's transcode. Dropping it releases.
pub struct ResourceLease {
    media_id: MediaId,
    manager: ResourceManager,
}

impl ResourceLease {
    pub fn media_id(&self) -> MediaId {
        self.media_id
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.manager.release(self.media_id);
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("media_id", &self.media_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sceneforged_common::Result;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingControl {
        released: Mutex<Vec<MediaId>>,
    }

    #[async_trait]
    impl TranscodeControl for RecordingControl {
        async fn release(&self, media_id: MediaId) -> Result<()> {
            self.released.lock().push(media_id);
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_last_lease_releases() {
        let control = Arc::new(RecordingControl::default());
        let manager = ResourceManager::new(control.clone());
        let media = MediaId::new();

        let a = manager.acquire(media);
        let b = manager.acquire(media);
        assert_eq!(manager.lease_count(media), 2);

        drop(a);
        settle().await;
        assert!(control.released.lock().is_empty());

        drop(b);
        settle().await;
        assert_eq!(*control.released.lock(), vec![media]);
        assert_eq!(manager.lease_count(media), 0);
    }

    #[tokio::test]
    async fn test_other_media_unaffected() {
        let control = Arc::new(RecordingControl::default());
        let manager = ResourceManager::new(control.clone());
        let first = MediaId::new();
        let second = MediaId::new();

        let a = manager.acquire(first);
        let _b = manager.acquire(second);

        drop(a);
        settle().await;
        assert_eq!(*control.released.lock(), vec![first]);
        assert_eq!(manager.lease_count(second), 1);
    }

    #[tokio::test]
    async fn test_reacquire_after_release() {
        let control = Arc::new(RecordingControl::default());
        let manager = ResourceManager::new(control.clone());
        let media = MediaId::new();

        drop(manager.acquire(media));
        let _again = manager.acquire(media);
        settle().await;
        assert_eq!(manager.lease_count(media), 1);
        assert_eq!(control.released.lock().len(), 1);
    }
}
