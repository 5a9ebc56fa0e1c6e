//! Capture device admission gate
//!
//! A counting semaphore shared by every source. Holding a [`CapturePermit`]
//! is what "holding the capture lock" means; dropping the permit releases it.
//! Because a permit can only be dropped once, a double release that would
//! inflate the count cannot happen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Shared gate over the physical capture device
#[derive(Debug, Clone)]
pub struct CaptureLock {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Proof of capture device ownership for one source
#[derive(Debug)]
pub struct CapturePermit {
    source_id: String,
    _permit: OwnedSemaphorePermit,
}

impl CapturePermit {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Give the device back
    pub fn release(self) {
        tracing::debug!(source = %self.source_id, "Capture lock released");
    }
}

impl CaptureLock {
    /// Create a gate admitting `capacity` concurrent holders (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait up to `timeout` for the device
    ///
    /// Fails with [`Error::CaptureBusy`] when the wait times out.
    pub async fn acquire(&self, source_id: &str, timeout: Duration) -> Result<CapturePermit> {
        let busy = || Error::CaptureBusy {
            source_id: source_id.to_string(),
        };

        let permit = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| busy())?
            .map_err(|_| busy())?;

        tracing::debug!(
            source = %source_id,
            available = self.semaphore.available_permits(),
            "Capture lock acquired"
        );

        Ok(CapturePermit {
            source_id: source_id.to_string(),
            _permit: permit,
        })
    }

    /// Take the device only if it is free right now
    pub fn try_acquire(&self, source_id: &str) -> Result<CapturePermit> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::CaptureBusy {
                source_id: source_id.to_string(),
            })?;

        Ok(CapturePermit {
            source_id: source_id.to_string(),
            _permit: permit,
        })
    }

    /// Number of holders that could acquire right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CaptureLock {
    fn default() -> Self {
        Self::new(1)
    }
}
