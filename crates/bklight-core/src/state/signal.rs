//! Shared acknowledgment slot.
//!
//! Written from the transport's notification thread, awaited by the handshake.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::protocol::AckStage;

/// Last acknowledged stage plus a wake-up for waiters.
#[derive(Debug, Default)]
pub struct AckSignal {
    stage: Mutex<AckStage>,
    changed: Condvar,
}

impl AckSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, AckStage> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> AckStage {
        *self.slot()
    }

    /// Back to `AckStage::None` before a new handshake.
    pub fn reset(&self) {
        *self.slot() = AckStage::None;
    }

    /// Record `stage` and wake every waiter.
    pub fn raise(&self, stage: AckStage) {
        *self.slot() = stage;
        self.changed.notify_all();
    }

    /// Block until a stage other than `None` lands in the slot, or `timeout`
    /// elapses.
    ///
    /// `expected` completes the wait. Stages in `benign` are skipped over and
    /// the wait goes on; any other stage ends it as a mismatch. Call
    /// [`reset`](Self::reset) before the write that triggers the stage; a stage
    /// raised after the reset but before the call is seen immediately.
    pub fn wait_for(&self, expected: AckStage, benign: &[AckStage], timeout: Duration) -> AckWait {
        let guard = self.slot();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |stage| {
                *stage == AckStage::None || (*stage != expected && benign.contains(stage))
            })
            .unwrap_or_else(PoisonError::into_inner);
        match *guard {
            stage if stage == expected => AckWait::Acked,
            AckStage::None => AckWait::TimedOut,
            stage if benign.contains(&stage) => AckWait::TimedOut,
            stage => AckWait::Mismatch(stage),
        }
    }
}

/// Outcome of [`AckSignal::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    Acked,
    /// A stage that is neither expected nor benign arrived.
    Mismatch(AckStage),
    TimedOut,
}
