//! Encoding profiles
//!
//! A profile is a named string of encoder arguments. The store always starts
//! with a built-in set so that a usable profile exists even when the external
//! configuration is empty or partial. Exactly one profile is active; it is
//! chosen by name or by the `auto` sentinel, which picks a preset suited to the
//! host platform.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::platform::Platform;
use crate::error::{Error, Result};

/// Sentinel profile name requesting platform-aware selection
pub const AUTO_PROFILE: &str = "auto";

/// Generic profile every platform falls back to
pub const LOW_LATENCY_PROFILE: &str = "low-latency";

/// Arguments used when no profile matches the active name
pub const FALLBACK_ARGS: &str = "-c:v libx264 -preset ultrafast -tune zerolatency";

/// A named set of encoder arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Unique name (compared case-insensitively)
    pub name: String,
    /// Encoder arguments inserted between input and output
    pub args: String,
    /// Free-text description
    #[serde(default)]
    pub note: String,
}

impl ProfileConfig {
    pub fn new(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Profiles that are seeded into every store
pub fn builtin_profiles() -> Vec<ProfileConfig> {
    vec![
        ProfileConfig::new(
            LOW_LATENCY_PROFILE,
            "-c:v libx264 -preset ultrafast -tune zerolatency -g 30 -bf 0 -pix_fmt yuv420p",
        )
        .with_note("Software H.264, lowest latency"),
        ProfileConfig::new(
            "quality",
            "-c:v libx264 -preset veryfast -crf 23 -g 60 -pix_fmt yuv420p",
        )
        .with_note("Software H.264, better quality at higher latency"),
        ProfileConfig::new(
            "windows-nvenc",
            "-c:v h264_nvenc -preset p1 -tune ll -zerolatency 1 -g 30 -bf 0",
        )
        .with_note("NVIDIA hardware encoder"),
        ProfileConfig::new(
            "windows-qsv",
            "-c:v h264_qsv -preset veryfast -look_ahead 0 -g 30 -bf 0",
        )
        .with_note("Intel Quick Sync encoder"),
        ProfileConfig::new(
            "linux-x264",
            "-c:v libx264 -preset ultrafast -tune zerolatency -g 30 -bf 0 -threads 2 -pix_fmt yuv420p",
        )
        .with_note("Software H.264 limited to two threads"),
        ProfileConfig::new(
            "macos-videotoolbox",
            "-c:v h264_videotoolbox -realtime 1 -g 30 -bf 0",
        )
        .with_note("Apple VideoToolbox encoder"),
    ]
}

/// Built-in names preferred on each platform, most preferred first
pub fn preferred_profiles(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Windows => &["windows-nvenc", "windows-qsv"],
        Platform::Linux => &["linux-x264"],
        Platform::MacOs => &["macos-videotoolbox"],
        Platform::Other => &[],
    }
}

/// Pick a profile for `platform` from `profiles`
///
/// Tries the platform's preferred names in order, then the generic low-latency
/// profile, then the first configured profile.
pub fn resolve_auto(profiles: &[ProfileConfig], platform: Platform) -> Option<String> {
    preferred_profiles(platform)
        .iter()
        .copied()
        .chain(std::iter::once(LOW_LATENCY_PROFILE))
        .find_map(|wanted| profiles.iter().find(|p| p.is_named(wanted)))
        .or_else(|| profiles.first())
        .map(|p| p.name.clone())
}

#[derive(Debug)]
struct ProfileSet {
    profiles: Vec<ProfileConfig>,
    /// Name as requested (may be the auto sentinel)
    selection: String,
    /// Resolved active profile name
    active: Option<String>,
}

impl ProfileSet {
    fn find(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.is_named(name))
    }

    fn seed(&mut self, builtins: Vec<ProfileConfig>) {
        for builtin in builtins {
            match self.profiles.iter_mut().find(|p| p.is_named(&builtin.name)) {
                Some(existing) if *existing == builtin => {}
                Some(existing) => *existing = builtin,
                None => self.profiles.push(builtin),
            }
        }
    }
}

/// Thread-safe store of encoding profiles
pub struct ProfileStore {
    inner: RwLock<ProfileSet>,
    platform: Platform,
}

impl ProfileStore {
    /// Create a store holding only the built-in profiles, active set to `auto`
    pub fn new(platform: Platform) -> Self {
        Self::with_profiles(platform, Vec::new(), AUTO_PROFILE)
    }

    /// Create a store from configured profiles
    ///
    /// Built-ins are seeded on top of `profiles`. An unknown `active` name
    /// falls back to auto selection.
    pub fn with_profiles(
        platform: Platform,
        profiles: Vec<ProfileConfig>,
        active: impl Into<String>,
    ) -> Self {
        let mut set = ProfileSet {
            profiles,
            selection: AUTO_PROFILE.to_string(),
            active: None,
        };
        set.seed(builtin_profiles());
        set.active = resolve_auto(&set.profiles, platform);

        let store = Self {
            inner: RwLock::new(set),
            platform,
        };

        let active = active.into();
        if let Err(e) = store.set_active(&active) {
            tracing::warn!(profile = %active, error = %e, "Configured profile missing, using auto");
        }
        store
    }

    /// Platform used for auto selection
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// All profiles in insertion order
    pub fn get_all(&self) -> Vec<ProfileConfig> {
        self.inner.read().profiles.clone()
    }

    /// Look up a profile by name
    pub fn get(&self, name: &str) -> Option<ProfileConfig> {
        self.inner.read().find(name).cloned()
    }

    /// Swap the whole profile set
    ///
    /// Built-ins are seeded again on top of `profiles`, so they survive any
    /// replacement. If the active profile disappears, the active profile is
    /// re-resolved with auto selection.
    pub fn replace_all(&self, profiles: Vec<ProfileConfig>) {
        let mut set = self.inner.write();
        set.profiles = profiles;
        set.seed(builtin_profiles());

        let still_present = set
            .active
            .as_deref()
            .map(|name| set.find(name).is_some())
            .unwrap_or(false);

        if !still_present {
            set.active = resolve_auto(&set.profiles, self.platform);
            set.selection = AUTO_PROFILE.to_string();
            tracing::info!(active = ?set.active, "Active profile re-resolved after replace");
        }
    }

    /// Select the active profile
    ///
    /// Returns the resolved profile name.
    pub fn set_active(&self, name: &str) -> Result<String> {
        let mut set = self.inner.write();

        if name.eq_ignore_ascii_case(AUTO_PROFILE) {
            set.active = resolve_auto(&set.profiles, self.platform);
            set.selection = AUTO_PROFILE.to_string();
            tracing::info!(
                platform = %self.platform,
                active = ?set.active,
                "Active profile resolved automatically"
            );
            return Ok(set.active.clone().unwrap_or_default());
        }

        let resolved = if set.profiles.is_empty() {
            name.to_string()
        } else {
            set.find(name)
                .map(|p| p.name.clone())
                .ok_or_else(|| Error::profile_not_found(name))?
        };

        set.active = Some(resolved.clone());
        set.selection = resolved.clone();
        tracing::info!(active = %resolved, "Active profile set");
        Ok(resolved)
    }

    /// Resolved active profile name
    pub fn active_name(&self) -> Option<String> {
        self.inner.read().active.clone()
    }

    /// Active selection as requested, `auto` or a profile name
    pub fn selection(&self) -> String {
        self.inner.read().selection.clone()
    }

    /// Arguments of the active profile, or [`FALLBACK_ARGS`]
    pub fn get_active_args(&self) -> String {
        let set = self.inner.read();
        set.active
            .as_deref()
            .and_then(|name| set.find(name))
            .map(|p| p.args.clone())
            .unwrap_or_else(|| FALLBACK_ARGS.to_string())
    }
}
