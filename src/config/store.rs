//! Configuration persistence
//!
//! The core never owns the configuration file. It calls a [`ConfigStore`]
//! after successful in-memory mutations and reports the outcome; a failed save
//! does not roll anything back.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::profile::{ProfileConfig, AUTO_PROFILE};
use super::source::SourceConfig;
use crate::error::Result;

/// Result of a save call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub ok: bool,
    /// Where the document was written, if anywhere
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl SaveOutcome {
    pub fn saved(path: Option<PathBuf>) -> Self {
        Self {
            ok: true,
            path,
            error: None,
        }
    }

    pub fn failed(path: Option<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            path,
            error: Some(error.into()),
        }
    }
}

/// Persistence collaborator
pub trait ConfigStore: Send + Sync {
    fn save_sources(&self, sources: &[SourceConfig]) -> SaveOutcome;

    fn save_active_profile(&self, name: &str) -> SaveOutcome;
}

/// Persisted configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
    #[serde(default = "default_active")]
    pub active_profile: String,
}

fn default_active() -> String {
    AUTO_PROFILE.to_string()
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            profiles: Vec::new(),
            active_profile: default_active(),
        }
    }
}

/// JSON file backed store
///
/// Each save reads the current document, replaces one section and writes the
/// whole document back through a temporary file.
pub struct JsonConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or an empty one if the file does not exist yet
    pub fn load(&self) -> Result<ConfigDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, doc: &ConfigDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut ConfigDocument)) -> SaveOutcome {
        let _guard = self.write_lock.lock();
        let result = self.load().and_then(|mut doc| {
            apply(&mut doc);
            self.write(&doc)
        });

        match result {
            Ok(()) => SaveOutcome::saved(Some(self.path.clone())),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to save configuration");
                SaveOutcome::failed(Some(self.path.clone()), e.to_string())
            }
        }
    }
}

impl ConfigStore for JsonConfigStore {
    fn save_sources(&self, sources: &[SourceConfig]) -> SaveOutcome {
        self.update(|doc| doc.sources = sources.to_vec())
    }

    fn save_active_profile(&self, name: &str) -> SaveOutcome {
        self.update(|doc| doc.active_profile = name.to_string())
    }
}

/// In-memory store, for embedding without a file and for tests
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    doc: Mutex<ConfigDocument>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> ConfigDocument {
        self.doc.lock().clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn save_sources(&self, sources: &[SourceConfig]) -> SaveOutcome {
        self.doc.lock().sources = sources.to_vec();
        SaveOutcome::saved(None)
    }

    fn save_active_profile(&self, name: &str) -> SaveOutcome {
        self.doc.lock().active_profile = name.to_string();
        SaveOutcome::saved(None)
    }
}
