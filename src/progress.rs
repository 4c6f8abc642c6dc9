//! Progress reporting and cancellation for the long voxel loops
//!
//! Progress is advisory: callbacks receive `(current, total)` and never
//! influence the result. Cancellation is explicit through [`CancelToken`],
//! which the loops poll at slab or stage boundaries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, SpmError};

/// Shared cancellation flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Return `Err(Cancelled)` when the flag is raised
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SpmError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Counts completed work units from parallel workers and forwards them to a
/// `(current, total)` callback.
///
/// The callback is only invoked every `interval` units to keep the shared
/// counter off the hot path.
pub(crate) struct ProgressCounter<'a> {
    done: AtomicUsize,
    total: usize,
    interval: usize,
    callback: &'a (dyn Fn(usize, usize) + Sync),
}

impl<'a> ProgressCounter<'a> {
    pub(crate) fn new(total: usize, callback: &'a (dyn Fn(usize, usize) + Sync)) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            interval: (total / 20).max(1),
            callback,
        }
    }

    pub(crate) fn start(&self) {
        (self.callback)(0, self.total);
    }

    pub(crate) fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.interval == 0 && done < self.total {
            (self.callback)(done, self.total);
        }
    }

    pub(crate) fn finish(&self) {
        (self.callback)(self.total, self.total);
    }
}
