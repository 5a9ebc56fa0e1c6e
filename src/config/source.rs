//! Capture sources
//!
//! The registry is a small ordered list; every operation is a linear scan under
//! one lock, which is fine for the handful of cameras a host drives.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How the encoder reaches a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Local capture device (`/dev/video0`, a DirectShow name, an AVFoundation index)
    Device,
    /// RTSP camera
    Rtsp,
    /// Any other network URL ffmpeg can open
    Url,
    /// Local media file, read at native rate
    File,
}

/// A configured capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique id (compared case-insensitively)
    pub id: String,
    pub kind: SourceKind,
    /// Device path or URL
    pub locator: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Replaces the generated input arguments verbatim when set
    #[serde(default)]
    pub input_override: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, kind: SourceKind, locator: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            locator: locator.into(),
            enabled: true,
            input_override: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_input_override(mut self, input: impl Into<String>) -> Self {
        self.input_override = Some(input.into());
        self
    }

    /// Whether this source has the given id
    pub fn has_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }
}

/// Thread-safe list of configured sources
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<Vec<SourceConfig>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<SourceConfig>) -> Self {
        let registry = Self::new();
        registry.replace_all(sources);
        registry
    }

    /// All sources in configuration order
    pub fn get_all(&self) -> Vec<SourceConfig> {
        self.sources.read().clone()
    }

    /// Enabled sources in configuration order
    pub fn enabled(&self) -> Vec<SourceConfig> {
        self.sources
            .read()
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<SourceConfig> {
        self.sources.read().iter().find(|s| s.has_id(id)).cloned()
    }

    /// Swap the whole source list
    ///
    /// Later entries with an id already seen are dropped so ids stay unique.
    pub fn replace_all(&self, sources: Vec<SourceConfig>) {
        let mut unique: Vec<SourceConfig> = Vec::with_capacity(sources.len());
        for source in sources {
            if unique.iter().any(|s| s.has_id(&source.id)) {
                tracing::warn!(source = %source.id, "Duplicate source id ignored");
                continue;
            }
            unique.push(source);
        }
        *self.sources.write() = unique;
    }

    /// Replace the source with a matching id, or append it
    ///
    /// Returns `true` when an existing entry was replaced.
    pub fn upsert(&self, source: SourceConfig) -> bool {
        let mut sources = self.sources.write();
        match sources.iter_mut().find(|s| s.has_id(&source.id)) {
            Some(existing) => {
                *existing = source;
                true
            }
            None => {
                sources.push(source);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}
