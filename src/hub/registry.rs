//! Hub registry
//!
//! Holds one [`StreamHub`] per source. Hubs are created lazily by whichever
//! comes first, a subscriber or the encoder's output pump, and are replaced
//! wholesale when an encoder restarts: units cached from a previous process
//! are not guaranteed to decode with the new stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::stream::{HubStats, StreamHub, Subscription};

fn hub_key(source_id: &str) -> String {
    source_id.to_ascii_lowercase()
}

/// Registry of per-source hubs
pub struct HubRegistry {
    hubs: RwLock<HashMap<String, Arc<StreamHub>>>,
    capacity: usize,
}

impl HubRegistry {
    /// Create a registry whose hubs buffer `capacity` units per subscriber
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn get(&self, source_id: &str) -> Option<Arc<StreamHub>> {
        self.hubs.read().await.get(&hub_key(source_id)).cloned()
    }

    /// Get the source's hub, creating an empty one if needed
    pub async fn get_or_create(&self, source_id: &str) -> Arc<StreamHub> {
        let key = hub_key(source_id);
        if let Some(hub) = self.hubs.read().await.get(&key) {
            return Arc::clone(hub);
        }

        let mut hubs = self.hubs.write().await;
        Arc::clone(hubs.entry(key).or_insert_with(|| {
            tracing::info!(source = %source_id, "Stream hub created");
            Arc::new(StreamHub::new(source_id, self.capacity))
        }))
    }

    /// Replace the source's hub with an empty one
    ///
    /// Subscribers of the old hub drain what they have queued and then see
    /// the subscription close.
    pub async fn reset(&self, source_id: &str) -> Arc<StreamHub> {
        let hub = Arc::new(StreamHub::new(source_id, self.capacity));
        let previous = self
            .hubs
            .write()
            .await
            .insert(hub_key(source_id), Arc::clone(&hub));

        tracing::info!(
            source = %source_id,
            dropped_subscribers = previous.map(|h| h.subscriber_count()).unwrap_or(0),
            "Stream hub reset"
        );
        hub
    }

    /// Drop the source's hub
    ///
    /// Once the publisher is gone too, subscribers drain what they have
    /// queued and then see the subscription close.
    pub async fn remove(&self, source_id: &str) -> Option<Arc<StreamHub>> {
        let removed = self.hubs.write().await.remove(&hub_key(source_id));
        if let Some(ref hub) = removed {
            tracing::info!(
                source = %source_id,
                dropped_subscribers = hub.subscriber_count(),
                "Stream hub removed"
            );
        }
        removed
    }

    /// Subscribe to a source's live stream
    pub async fn subscribe(&self, source_id: &str) -> Subscription {
        self.get_or_create(source_id).await.subscribe()
    }

    pub async fn stats(&self, source_id: &str) -> Option<HubStats> {
        self.get(source_id).await.map(|hub| hub.stats())
    }

    /// Stats for every hub, ordered by source id
    pub async fn all_stats(&self) -> Vec<HubStats> {
        let mut stats: Vec<HubStats> = self
            .hubs
            .read()
            .await
            .values()
            .map(|hub| hub.stats())
            .collect();
        stats.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        stats
    }

    pub async fn hub_count(&self) -> usize {
        self.hubs.read().await.len()
    }
}

impl Default for HubRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::hub::unit::StreamUnit;

    #[tokio::test]
    async fn test_lazy_creation_case_insensitive() {
        let registry = HubRegistry::new(16);
        assert!(registry.get("Cam").await.is_none());

        let a = registry.get_or_create("Cam").await;
        let b = registry.get_or_create("cam").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.hub_count().await, 1);
    }

    #[tokio::test]
    async fn test_reset_starts_empty_and_closes_old_subscribers() {
        let registry = HubRegistry::new(16);
        let hub = registry.get_or_create("cam").await;
        hub.publish(StreamUnit::header(Bytes::from_static(b"H")));
        let mut old = registry.subscribe("cam").await;
        drop(hub);

        let fresh = registry.reset("cam").await;
        assert!(!fresh.stats().has_header);
        assert!(!registry.stats("cam").await.unwrap().has_header);

        // Catch-up is still delivered, then the old hub is gone
        assert_eq!(old.recv().await.unwrap().kind, crate::hub::UnitKind::Header);
        assert!(matches!(old.recv().await, Err(Error::HubClosed)));
    }

    #[tokio::test]
    async fn test_remove_forgets_cached_units() {
        let registry = HubRegistry::new(16);
        registry
            .get_or_create("cam")
            .await
            .publish(StreamUnit::header(Bytes::from_static(b"H")));
        let mut old = registry.subscribe("cam").await;

        assert!(registry.remove("CAM").await.is_some());
        assert!(registry.remove("cam").await.is_none());
        assert!(registry.stats("cam").await.is_none());

        assert_eq!(old.recv().await.unwrap().kind, crate::hub::UnitKind::Header);
        assert!(matches!(old.recv().await, Err(Error::HubClosed)));

        // A later subscriber starts from an empty hub
        let fresh = registry.subscribe("cam").await;
        assert_eq!(fresh.pending_catchup(), 0);
    }

    #[tokio::test]
    async fn test_all_stats_sorted() {
        let registry = HubRegistry::new(16);
        registry.get_or_create("b").await;
        registry.get_or_create("a").await;

        let ids: Vec<String> = registry
            .all_stats()
            .await
            .into_iter()
            .map(|s| s.source_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
