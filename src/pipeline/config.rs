//! Supervisor configuration

use std::path::PathBuf;
use std::time::Duration;

/// Supervisor configuration options
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Encoder executable (path or name on `PATH`)
    pub encoder_path: String,

    /// Number of sources allowed to hold the capture device at once
    pub capture_capacity: usize,

    /// How long a start waits for the capture device
    pub lock_timeout: Duration,

    /// How long a stop waits for the killed encoder to be reaped
    pub stop_timeout: Duration,

    /// Kill leftover encoders for a source before starting it
    pub kill_orphans: bool,

    /// Directory receiving per-source HLS output
    pub hls_root: PathBuf,

    /// Target HLS segment duration in seconds
    pub hls_segment_secs: u32,

    /// Number of segments kept in the HLS playlist
    pub hls_list_size: u32,

    /// Units buffered per hub before a lagging subscriber is dropped
    pub hub_capacity: usize,

    /// Read size for piped encoder output
    pub read_chunk_size: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            encoder_path: "ffmpeg".to_string(),
            capture_capacity: 1,
            lock_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            kill_orphans: true,
            hls_root: PathBuf::from("hls"),
            hls_segment_secs: 1,
            hls_list_size: 6,
            hub_capacity: 256,
            read_chunk_size: 64 * 1024, // 64KB
        }
    }
}

impl SupervisorConfig {
    /// Set the encoder executable
    pub fn encoder_path(mut self, path: impl Into<String>) -> Self {
        self.encoder_path = path.into();
        self
    }

    /// Set how many sources may capture concurrently
    pub fn capture_capacity(mut self, capacity: usize) -> Self {
        self.capture_capacity = capacity.max(1);
        self
    }

    /// Set the capture lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Enable or disable orphan reconciliation
    pub fn kill_orphans(mut self, enabled: bool) -> Self {
        self.kill_orphans = enabled;
        self
    }

    /// Set the HLS output root
    pub fn hls_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.hls_root = root.into();
        self
    }

    /// Set the hub buffer capacity
    pub fn hub_capacity(mut self, capacity: usize) -> Self {
        self.hub_capacity = capacity.max(1);
        self
    }

    /// Set HLS segment duration and playlist length
    pub fn hls_segments(mut self, segment_secs: u32, list_size: u32) -> Self {
        self.hls_segment_secs = segment_secs.max(1);
        self.hls_list_size = list_size;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1024);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();

        assert_eq!(config.encoder_path, "ffmpeg");
        assert_eq!(config.capture_capacity, 1);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(config.kill_orphans);
        assert_eq!(config.hls_root, PathBuf::from("hls"));
    }

    #[test]
    fn test_builder_floors() {
        let config = SupervisorConfig::default().capture_capacity(0).hub_capacity(0);

        assert_eq!(config.capture_capacity, 1);
        assert_eq!(config.hub_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = SupervisorConfig::default()
            .encoder_path("/opt/ffmpeg/bin/ffmpeg")
            .capture_capacity(2)
            .lock_timeout(Duration::from_millis(250))
            .stop_timeout(Duration::from_secs(1))
            .kill_orphans(false)
            .hls_root("/var/lib/hls")
            .hub_capacity(64)
            .hls_segments(2, 10)
            .read_chunk_size(16);

        assert_eq!(config.encoder_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.capture_capacity, 2);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
        assert!(!config.kill_orphans);
        assert_eq!(config.hls_root, PathBuf::from("/var/lib/hls"));
        assert_eq!(config.hub_capacity, 64);
        assert_eq!(config.hls_segment_secs, 2);
        assert_eq!(config.hls_list_size, 10);
        assert_eq!(config.read_chunk_size, 1024);
    }
}
