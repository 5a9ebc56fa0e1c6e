//! Per-source stream hub
//!
//! The hub keeps the latest header, decoder configuration and keyframe, and
//! fans every published unit out over a `tokio::sync::broadcast` channel.
//! Publishing holds the cache write lock while it sends, and subscribing holds
//! the read lock while it snapshots the cache and registers its receiver, so a
//! subscriber sees each unit exactly once: either inside its catch-up or live.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::unit::{StreamUnit, UnitKind};
use crate::error::{Error, Result};

/// Snapshot of a hub's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub source_id: String,
    pub has_header: bool,
    pub has_video_config: bool,
    pub has_keyframe: bool,
    pub subscribers_active: usize,
    pub last_tag_at_utc: Option<DateTime<Utc>>,
    pub units_published: u64,
}

#[derive(Debug, Default)]
struct CatchupCache {
    header: Option<StreamUnit>,
    video_config: Option<StreamUnit>,
    keyframe: Option<StreamUnit>,
    last_unit_at: Option<DateTime<Utc>>,
}

impl CatchupCache {
    fn update(&mut self, unit: &StreamUnit) {
        match unit.kind {
            UnitKind::Header => self.header = Some(unit.clone()),
            UnitKind::VideoConfig => self.video_config = Some(unit.clone()),
            UnitKind::Frame if unit.is_keyframe => self.keyframe = Some(unit.clone()),
            UnitKind::Frame => {}
        }
        self.last_unit_at = Some(Utc::now());
    }

    fn catchup(&self) -> VecDeque<StreamUnit> {
        [&self.header, &self.video_config, &self.keyframe]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Broadcast hub for one source's live stream
pub struct StreamHub {
    source_id: String,
    cache: RwLock<CatchupCache>,
    tx: broadcast::Sender<StreamUnit>,
    published: AtomicU64,
    next_subscriber_id: AtomicU64,
}

impl StreamHub {
    /// Create an empty hub buffering up to `capacity` units per subscriber
    pub fn new(source_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            source_id: source_id.into(),
            cache: RwLock::new(CatchupCache::default()),
            tx,
            published: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Cache the unit if relevant and send it to every subscriber
    ///
    /// Never waits on subscribers. Returns how many receivers were sent to.
    pub fn publish(&self, unit: StreamUnit) -> usize {
        let mut cache = self.cache.write();
        cache.update(&unit);
        self.published.fetch_add(1, Ordering::Relaxed);
        // Err only means nobody is listening
        self.tx.send(unit).unwrap_or(0)
    }

    /// Subscribe, receiving cached header, config and keyframe first
    pub fn subscribe(&self) -> Subscription {
        let cache = self.cache.read();
        let rx = self.tx.subscribe();
        let catchup = cache.catchup();
        drop(cache);

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            source = %self.source_id,
            subscriber = id,
            catchup_units = catchup.len(),
            subscribers = self.tx.receiver_count(),
            "Subscriber added"
        );

        Subscription {
            id,
            source_id: self.source_id.clone(),
            catchup,
            rx: Some(rx),
        }
    }

    /// Remove a subscriber; cached state is untouched
    pub fn unsubscribe(&self, subscription: Subscription) {
        tracing::debug!(
            source = %self.source_id,
            subscriber = subscription.id,
            "Subscriber removed"
        );
        drop(subscription);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn stats(&self) -> HubStats {
        let cache = self.cache.read();
        HubStats {
            source_id: self.source_id.clone(),
            has_header: cache.header.is_some(),
            has_video_config: cache.video_config.is_some(),
            has_keyframe: cache.keyframe.is_some(),
            subscribers_active: self.tx.receiver_count(),
            last_tag_at_utc: cache.last_unit_at,
            units_published: self.published.load(Ordering::Relaxed),
        }
    }
}

/// A subscriber's view of a hub
///
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    source_id: String,
    catchup: VecDeque<StreamUnit>,
    rx: Option<broadcast::Receiver<StreamUnit>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Catch-up units not yet received
    pub fn pending_catchup(&self) -> usize {
        self.catchup.len()
    }

    /// Whether the subscription has ended (overrun or hub gone)
    pub fn is_closed(&self) -> bool {
        self.rx.is_none() && self.catchup.is_empty()
    }

    /// Next unit: catch-up first, then live
    ///
    /// A subscriber that fell more than the hub capacity behind gets
    /// [`Error::SubscriberOverrun`] once and is disconnected; afterwards and
    /// once the hub is gone, [`Error::HubClosed`] is returned.
    pub async fn recv(&mut self) -> Result<StreamUnit> {
        if let Some(unit) = self.catchup.pop_front() {
            return Ok(unit);
        }

        let rx = self.rx.as_mut().ok_or(Error::HubClosed)?;
        match rx.recv().await {
            Ok(unit) => Ok(unit),
            Err(RecvError::Lagged(skipped)) => Err(self.overrun(skipped)),
            Err(RecvError::Closed) => {
                self.rx = None;
                Err(Error::HubClosed)
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `Ok(None)` when nothing is queued
    pub fn try_recv(&mut self) -> Result<Option<StreamUnit>> {
        if let Some(unit) = self.catchup.pop_front() {
            return Ok(Some(unit));
        }

        let rx = self.rx.as_mut().ok_or(Error::HubClosed)?;
        match rx.try_recv() {
            Ok(unit) => Ok(Some(unit)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Lagged(skipped)) => Err(self.overrun(skipped)),
            Err(TryRecvError::Closed) => {
                self.rx = None;
                Err(Error::HubClosed)
            }
        }
    }

    fn overrun(&mut self, skipped: u64) -> Error {
        self.rx = None;
        tracing::warn!(
            source = %self.source_id,
            subscriber = self.id,
            skipped = skipped,
            "Slow subscriber dropped"
        );
        Error::SubscriberOverrun { skipped }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn header() -> StreamUnit {
        StreamUnit::header(Bytes::from_static(b"H"))
    }

    fn config() -> StreamUnit {
        StreamUnit::video_config(0, Bytes::from_static(b"C"))
    }

    fn key(tag: &'static [u8]) -> StreamUnit {
        StreamUnit::frame(0, Bytes::from_static(tag), true)
    }

    fn inter(tag: &'static [u8]) -> StreamUnit {
        StreamUnit::frame(0, Bytes::from_static(tag), false)
    }

    #[tokio::test]
    async fn test_catchup_order_precedes_live() {
        let hub = StreamHub::new("cam", 16);
        hub.publish(header());
        hub.publish(config());
        hub.publish(key(b"K1"));
        hub.publish(inter(b"P1"));

        let mut sub = hub.subscribe();
        assert_eq!(sub.pending_catchup(), 3);
        hub.publish(inter(b"P2"));

        assert_eq!(sub.recv().await.unwrap(), header());
        assert_eq!(sub.recv().await.unwrap(), config());
        assert_eq!(sub.recv().await.unwrap(), key(b"K1"));
        assert_eq!(sub.recv().await.unwrap(), inter(b"P2"));
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyframe_cache_overwritten() {
        let hub = StreamHub::new("cam", 16);
        hub.publish(key(b"K1"));
        hub.publish(key(b"K2"));

        assert!(hub.stats().has_keyframe);

        let mut sub = hub.subscribe();
        assert_eq!(sub.pending_catchup(), 1);
        assert_eq!(sub.recv().await.unwrap(), key(b"K2"));
    }

    #[tokio::test]
    async fn test_empty_hub_subscribes_live_only() {
        let hub = StreamHub::new("cam", 16);
        let mut sub = hub.subscribe();
        assert_eq!(sub.pending_catchup(), 0);

        assert_eq!(hub.publish(inter(b"P1")), 1);
        assert_eq!(sub.recv().await.unwrap(), inter(b"P1"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_without_blocking() {
        let hub = StreamHub::new("cam", 4);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for i in 0..10u8 {
            hub.publish(StreamUnit::frame(i as u32, Bytes::from(vec![i]), false));
            let unit = fast.recv().await.unwrap();
            assert_eq!(unit.timestamp, i as u32);
        }

        let err = slow.recv().await.unwrap_err();
        assert!(matches!(err, Error::SubscriberOverrun { skipped: 6 }));
        assert!(slow.is_closed());
        assert!(matches!(slow.recv().await, Err(Error::HubClosed)));

        // The dropped subscriber no longer counts
        drop(slow);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stats_and_unsubscribe() {
        let hub = StreamHub::new("cam", 16);
        let stats = hub.stats();
        assert!(!stats.has_header && !stats.has_video_config && !stats.has_keyframe);
        assert!(stats.last_tag_at_utc.is_none());

        let sub = hub.subscribe();
        hub.publish(header());
        hub.publish(config());

        let stats = hub.stats();
        assert!(stats.has_header);
        assert!(stats.has_video_config);
        assert!(!stats.has_keyframe);
        assert_eq!(stats.subscribers_active, 1);
        assert_eq!(stats.units_published, 2);
        assert!(stats.last_tag_at_utc.is_some());

        hub.unsubscribe(sub);
        let stats = hub.stats();
        assert_eq!(stats.subscribers_active, 0);
        assert!(stats.has_header);
    }

    #[tokio::test]
    async fn test_hub_dropped_closes_subscription() {
        let hub = StreamHub::new("cam", 16);
        let mut sub = hub.subscribe();
        hub.publish(inter(b"P1"));
        drop(hub);

        assert_eq!(sub.recv().await.unwrap(), inter(b"P1"));
        assert!(matches!(sub.recv().await, Err(Error::HubClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_never_misses_units() {
        use std::sync::Arc;

        let hub = Arc::new(StreamHub::new("cam", 1024));
        hub.publish(header());

        let publisher = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for i in 0..200u32 {
                    hub.publish(StreamUnit::frame(i, Bytes::new(), i % 10 == 0));
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut subs = Vec::new();
        for _ in 0..20 {
            subs.push(hub.subscribe());
            tokio::task::yield_now().await;
        }
        publisher.await.unwrap();

        for mut sub in subs {
            assert_eq!(sub.recv().await.unwrap().kind, UnitKind::Header);
            while sub.pending_catchup() > 0 {
                assert!(sub.recv().await.unwrap().is_keyframe);
            }

            // Live units arrive without gaps up to the last one published
            let mut last: Option<u32> = None;
            while let Some(unit) = sub.try_recv().unwrap() {
                if let Some(prev) = last {
                    assert_eq!(unit.timestamp, prev + 1);
                }
                last = Some(unit.timestamp);
            }
            assert!(last.map_or(true, |t| t == 199));
        }
    }
}
