//! Per-source process state

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::capture::CapturePermit;
use crate::config::OutputMode;

use super::command::EncoderCommand;

/// Lifecycle of one source's encoder
///
/// ```text
/// NotStarted ──► Starting ──► Running ──► Stopping ──► Stopped
///                                │
///                                └─(exit without stop)──► Crashed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "notStarted",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The encoder a source is currently running
pub(crate) struct TrackedProcess {
    pub pid: Option<u32>,
    pub generation: u64,
    pub command: EncoderCommand,
    /// Asks the exit watcher to kill the process
    pub kill_tx: Option<oneshot::Sender<()>>,
    /// Receives the exit code once the watcher has reaped the process
    pub exit_rx: Option<oneshot::Receiver<Option<i32>>>,
    /// Output pump for piped modes
    pub pump: Option<JoinHandle<()>>,
}

/// Everything the supervisor knows about one source
///
/// Kept after the process is gone so status queries keep working.
pub(crate) struct ProcessState {
    pub source_id: String,
    pub lifecycle: LifecycleState,
    pub tracked: Option<TrackedProcess>,
    pub permit: Option<CapturePermit>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub manual_stop: bool,
    /// Incremented on every spawn; lets a late exit watcher detect it is stale
    pub generation: u64,
    /// Bumped by stop requests so pending starts give up
    pub stop_signal: watch::Sender<u64>,
}

impl ProcessState {
    pub fn new(source_id: &str) -> Self {
        let (stop_signal, _) = watch::channel(0);
        Self {
            source_id: source_id.to_string(),
            lifecycle: LifecycleState::NotStarted,
            tracked: None,
            permit: None,
            started_at: None,
            last_exit_at: None,
            last_exit_code: None,
            manual_stop: false,
            generation: 0,
            stop_signal,
        }
    }

    pub fn is_running(&self) -> bool {
        self.tracked.is_some() && self.lifecycle == LifecycleState::Running
    }

    /// Record that the tracked process has gone away
    pub fn record_exit(&mut self, code: Option<i32>) {
        self.last_exit_at = Some(Utc::now());
        self.last_exit_code = code;
    }

    pub fn status(&self) -> ProcessStatus {
        let tracked = self.tracked.as_ref();
        ProcessStatus {
            source_id: self.source_id.clone(),
            state: self.lifecycle,
            pid: tracked.and_then(|t| t.pid),
            mode: tracked.map(|t| t.command.mode),
            command: tracked.map(|t| t.command.display()),
            started_at: self.started_at,
            last_exit_at: self.last_exit_at,
            last_exit_code: self.last_exit_code,
            capture_lock_held: self.permit.is_some(),
            manual_stop: self.manual_stop,
        }
    }
}

/// Point-in-time view of a source's process state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub source_id: String,
    pub state: LifecycleState,
    pub pid: Option<u32>,
    pub mode: Option<OutputMode>,
    pub command: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub capture_lock_held: bool,
    pub manual_stop: bool,
}
