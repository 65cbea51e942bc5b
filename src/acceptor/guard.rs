//! Single-Assignment Release Guard
//!
//! A tiny atomic flag that can move from "unset" to "set" exactly once.
//! Whoever wins the compare-and-set owns the teardown; every other caller
//! observes "already released" and backs off.
//!
//! ```text
//!   stop() ──┐
//!            ├──> compare_exchange(false, true) ──> winner runs teardown
//!   stop() ──┘                                 └──> loser returns
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that can be claimed exactly once.
#[derive(Debug, Default)]
pub struct ReleaseGuard {
    released: AtomicBool,
}

impl ReleaseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to claim the release.
    ///
    /// Returns `true` for exactly one caller over the lifetime of the guard.
    pub fn try_release(&self) -> bool {
        self.released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns true once some caller has claimed the release.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}
