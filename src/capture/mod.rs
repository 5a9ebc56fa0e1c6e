//! Physical capture device ownership
//!
//! Two things decide whether an encoder may open the device:
//!
//! ```text
//!   start(source)
//!        │
//!        ▼
//!   OrphanReconciler ── kill leftover encoders with this source's signature
//!        │
//!        ▼
//!   CaptureLock.acquire(timeout) ── CaptureBusy on timeout
//!        │
//!        ▼
//!   spawn encoder (permit held until stop or exit)
//! ```

pub mod lock;
pub mod orphan;

pub use lock::{CaptureLock, CapturePermit};
pub use orphan::{OrphanReconciler, OrphanReport, ProcessInfo, ProcessTable, SystemProcessTable};
