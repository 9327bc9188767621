use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}

/// One in-flight slot. The slot returns to the gate exactly once, when the permit is
/// released or dropped, whichever comes first.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Explicit release; equivalent to dropping the permit.
    pub fn release(self) {}
}

/// Caps simultaneous in-flight calls for one provider.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyGate {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Suspend until a slot is free. Fails only once the gate has been closed.
    pub async fn acquire(&self) -> Result<GatePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(|p| GatePermit { _permit: p })
            .map_err(|_| Error::Closed)
    }

    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|p| GatePermit { _permit: p })
    }

    /// Wake every waiter with `Error::Closed` and refuse new acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let available = self.semaphore.available_permits();
        GateSnapshot {
            max: self.max,
            available,
            in_use: self.max.saturating_sub(available),
        }
    }
}
