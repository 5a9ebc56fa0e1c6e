//! Capture pipeline supervision and live stream fan-out
//!
//! `capture-relay` drives external encoder processes (ffmpeg) that read from
//! capture devices or cameras, and fans their output out to any number of
//! viewers.
//!
//! - [`pipeline::ProcessSupervisor`] starts, tracks and stops one encoder per
//!   source, guarding the physical device with a [`capture::CaptureLock`] and
//!   killing leftover encoders through [`capture::OrphanReconciler`].
//! - [`hub::StreamHub`] broadcasts decoded output units, replaying the latest
//!   header, decoder configuration and keyframe to late subscribers.
//! - [`config`] holds profiles, sources and output flags;
//!   [`service::CaptureService`] ties everything into a request surface.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use capture_relay::config::{
//!     ConfigDocument, MemoryConfigStore, OutputState, Platform, SourceConfig, SourceKind,
//! };
//! use capture_relay::pipeline::{SupervisorConfig, SystemLauncher};
//! use capture_relay::CaptureService;
//!
//! # async fn run() -> capture_relay::Result<()> {
//! let document = ConfigDocument {
//!     sources: vec![SourceConfig::new("cam1", SourceKind::Device, "/dev/video0")],
//!     ..Default::default()
//! };
//!
//! let service = CaptureService::from_document(
//!     SupervisorConfig::default(),
//!     Platform::current(),
//!     document,
//!     Arc::new(SystemLauncher::new()),
//!     Arc::new(MemoryConfigStore::new()),
//! );
//! service.set_output_state(OutputState { flv: true, ..Default::default() });
//!
//! for report in service.start_pipeline(None, false, true).await {
//!     println!("{}: {:?}", report.source_id, report.error);
//! }
//!
//! let mut viewer = service.subscribe("cam1").await?;
//! while let Ok(unit) = viewer.recv().await {
//!     println!("{:?} {} bytes", unit.kind, unit.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod hub;
pub mod media;
pub mod pipeline;
pub mod service;

pub use error::{Error, ErrorResponse, Result};
pub use hub::{HubStats, StreamHub, StreamUnit, Subscription, UnitKind};
pub use pipeline::{ProcessSupervisor, SupervisorConfig};
pub use service::CaptureService;
