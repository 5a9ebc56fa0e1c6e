//! Live stream fan-out
//!
//! Each source with piped encoder output gets a [`StreamHub`]. The output pump
//! publishes units into it and any number of viewers subscribe.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<HubRegistry>
//!                     ┌─────────────────────────┐
//!                     │ hubs: HashMap<SourceId, │
//!                     │   StreamHub {           │
//!                     │     header, config,     │
//!                     │     keyframe,           │
//!                     │     tx: broadcast::Tx,  │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!   [Output pump]           [Subscription]          [Subscription]
//!   hub.publish()           catch-up, then          catch-up, then
//!         │                 rx.recv()               rx.recv()
//!         └──► broadcast ──────────┴──► viewer ─────────────┘
//! ```
//!
//! # Slow subscribers
//!
//! The broadcast channel never blocks the sender. A subscriber that falls
//! more than the channel capacity behind receives
//! [`Error::SubscriberOverrun`](crate::Error::SubscriberOverrun) and is
//! disconnected; other subscribers and the encoder are unaffected.

pub mod registry;
pub mod stream;
pub mod unit;

pub use registry::HubRegistry;
pub use stream::{HubStats, StreamHub, Subscription};
pub use unit::{StreamUnit, UnitKind};
