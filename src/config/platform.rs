//! Host platform capability
//!
//! Profile auto-selection and device input arguments depend on the operating
//! system. The platform is injected rather than read from `cfg!` at the call
//! site so that resolution logic can be exercised for any OS.

use serde::{Deserialize, Serialize};

/// Operating system family the encoder runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Other,
}

impl Platform {
    /// Platform of the running host
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Other
        }
    }

    /// FFmpeg input format used for local capture devices
    pub fn device_input_format(&self) -> &'static str {
        match self {
            Platform::Windows => "dshow",
            Platform::MacOs => "avfoundation",
            Platform::Linux | Platform::Other => "v4l2",
        }
    }

    /// Name of the encoder executable as it appears in the process table
    pub fn executable_name(&self, program: &str) -> String {
        let base = program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(program)
            .to_string();
        match self {
            Platform::Windows if !base.to_ascii_lowercase().ends_with(".exe") => {
                format!("{}.exe", base)
            }
            _ => base,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Other => "other",
        };
        write!(f, "{}", name)
    }
}
