//! Configuration model
//!
//! In-memory stores for everything a pipeline start consults:
//!
//! - [`ProfileStore`]: encoder argument presets and the active selection
//! - [`SourceRegistry`]: configured capture sources
//! - [`OutputState`]: transport flags, reduced to one [`OutputMode`]
//! - [`ConfigStore`]: the persistence collaborator the stores are saved through
//!
//! Stores are plain objects passed in at construction; nothing here is a
//! process-wide singleton.

pub mod output;
pub mod platform;
pub mod profile;
pub mod source;
pub mod store;

pub use output::{resolve_mode, OutputMode, OutputState};
pub use platform::Platform;
pub use profile::{ProfileConfig, ProfileStore, AUTO_PROFILE, FALLBACK_ARGS, LOW_LATENCY_PROFILE};
pub use source::{SourceConfig, SourceKind, SourceRegistry};
pub use store::{ConfigDocument, ConfigStore, JsonConfigStore, MemoryConfigStore, SaveOutcome};
