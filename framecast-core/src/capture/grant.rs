//! Exchange points between the session and its outside collaborators
//!
//! - [`GrantSlot`]: the picker publishes a grant, the session takes it once
//! - [`ServiceReadyGate`]: the companion service opens the gate the session
//!   waits on before touching the capture API

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::types::CaptureGrant;

/// Single-slot grant exchange
#[derive(Debug, Default)]
pub struct GrantSlot {
    slot: Mutex<Option<CaptureGrant>>,
}

impl GrantSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a grant, replacing one nobody took
    pub fn publish(&self, grant: CaptureGrant) {
        if let Some(stale) = self.slot.lock().replace(grant) {
            warn!("Replacing unused capture grant {}", stale.token);
        }
    }

    /// Take the grant, leaving the slot empty
    pub fn take(&self) -> Option<CaptureGrant> {
        self.slot.lock().take()
    }

    /// Whether a grant is waiting to be taken
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Boolean gate with blocking waiters
#[derive(Debug, Default)]
pub struct ServiceReadyGate {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl ServiceReadyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate and wake every waiter
    pub fn set_ready(&self) {
        *self.ready.lock() = true;
        self.cond.notify_all();
        debug!("Capture service ready");
    }

    /// Close the gate again (service stopped)
    pub fn clear(&self) {
        *self.ready.lock() = false;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Block until the gate is open
    pub fn wait(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.cond.wait(&mut ready);
        }
    }

    /// Block until the gate is open or `timeout` passes; returns whether
    /// the gate is open
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        while !*ready {
            if self.cond.wait_until(&mut ready, deadline).timed_out() {
                return *ready;
            }
        }
        true
    }
}
