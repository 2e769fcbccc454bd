//! Reference-counted cancellation handle (spec.md §5).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner {
    cancelled: AtomicBool,
    live: AtomicUsize,
}

/// A cancellation signal shared by every clone derived from the same root.
///
/// Cloning increments a live-reference count; dropping a clone decrements it.
/// [`CancellationHandle::is_live`] tells a cache slot whether any caller still
/// cares about the in-flight operation it guards — cancelling one clone does
/// not abort work other callers are still waiting on.
pub struct CancellationHandle(Arc<Inner>);

impl CancellationHandle {
    /// Creates a fresh, non-cancelled handle with one live reference.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            live: AtomicUsize::new(1),
        }))
    }

    /// Marks the operation as cancelled. Idempotent.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    /// `true` once [`CancellationHandle::cancel`] has been called on this handle or any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// `true` while at least one clone of this handle is still held.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.0.live.load(Ordering::SeqCst) > 0
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CancellationHandle {
    fn clone(&self) -> Self {
        self.0.live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(&self.0))
    }
}

impl Drop for CancellationHandle {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::CancellationHandle;

    #[test]
    fn cancel_is_observed_across_clones() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn live_count_tracks_clones() {
        let handle = CancellationHandle::new();
        assert!(handle.is_live());
        let clone = handle.clone();
        drop(handle);
        assert!(clone.is_live());
        drop(clone);
    }
}
