//! Duplicate-submission guard for operations that must not overlap.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AgoraError;

/// Holds an in-flight flag; clears it when dropped.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    /// Set `flag`, or fail with `Busy` naming `what` if it is already set.
    pub(crate) fn acquire(flag: &'a AtomicBool, what: &str) -> Result<Self, AgoraError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AgoraError::Busy(what.to_string()))?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
