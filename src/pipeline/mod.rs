//! Encoder pipeline supervision
//!
//! # Start sequence
//!
//! ```text
//! start(source)
//!   │
//!   ├─ already running? ──────────────► Ok(started: false)
//!   ├─ restart/force: stop tracked process
//!   ├─ build EncoderCommand (active profile + source + output mode)
//!   ├─ OrphanReconciler: kill untracked encoders with our signature
//!   ├─ CaptureLock::acquire(lock_timeout) ──► Err(CaptureBusy)
//!   ├─ EncoderLauncher::launch ─────────────► Err(SpawnFailed), permit dropped
//!   └─ Running
//!        ├─ output pump: stdout ─► FlvDemuxer/JpegSplitter ─► StreamHub
//!        └─ exit watcher: unexpected exit ─► Crashed, permit dropped
//! ```
//!
//! The supervisor has no restart policy. An outer loop decides whether to
//! restart crashed sources, consulting the manual-stop flag.

pub mod command;
pub mod config;
pub mod launcher;
mod pump;
pub mod state;
pub mod supervisor;

pub use command::{build_command, source_signature, split_args, EncoderCommand, OutputTarget};
pub use config::SupervisorConfig;
pub use launcher::{EncoderChild, EncoderLauncher, EncoderOutput, SystemLauncher};
pub use state::{LifecycleState, ProcessStatus};
pub use supervisor::{ProcessSupervisor, StartOutcome, StartReport};
