//! Output transport selection
//!
//! Several transports can be switched on at once, but only one drives the
//! encoder. The flags form a priority list, not a set.

use serde::{Deserialize, Serialize};

/// Output enablement flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputState {
    pub hls: bool,
    pub mjpeg: bool,
    pub flv: bool,
    /// Forward the source's own MJPEG without re-encoding
    pub mjpeg_passthrough: bool,
    /// Frame rate for re-encoded MJPEG
    pub mjpeg_fps: u32,
    /// Frame size for re-encoded MJPEG, e.g. `1280x720` (empty keeps the source size)
    pub mjpeg_size: String,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            hls: true,
            mjpeg: false,
            flv: false,
            mjpeg_passthrough: false,
            mjpeg_fps: 15,
            mjpeg_size: String::new(),
        }
    }
}

impl OutputState {
    /// The single transport these flags select
    pub fn mode(&self) -> OutputMode {
        resolve_mode(self)
    }
}

/// Active consumer-facing transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputMode {
    #[serde(rename = "hls")]
    Hls,
    #[serde(rename = "mjpeg")]
    Mjpeg,
    #[serde(rename = "mjpeg-passthrough")]
    MjpegPassthrough,
    #[serde(rename = "flv")]
    Flv,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Hls => "hls",
            OutputMode::Mjpeg => "mjpeg",
            OutputMode::MjpegPassthrough => "mjpeg-passthrough",
            OutputMode::Flv => "flv",
        }
    }

    /// Whether the encoder output is piped back and published to a hub
    pub fn is_piped(&self) -> bool {
        !matches!(self, OutputMode::Hls)
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// FLV wins over MJPEG passthrough, which wins over MJPEG; HLS otherwise
pub fn resolve_mode(state: &OutputState) -> OutputMode {
    if state.flv {
        OutputMode::Flv
    } else if state.mjpeg_passthrough {
        OutputMode::MjpegPassthrough
    } else if state.mjpeg {
        OutputMode::Mjpeg
    } else {
        OutputMode::Hls
    }
}
