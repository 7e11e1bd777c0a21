//! Lock-free publication of the operator status snapshot.
//!
//! Writers replace the whole snapshot through a read-copy-update helper;
//! readers load an `Arc` without taking a lock. The UI and the HTTP layer
//! only ever see immutable snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tillsync_core::StatusSnapshot;

/// Shared handle to the current [`StatusSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct StatusPublisher {
    inner: Arc<ArcSwap<StatusSnapshot>>,
}

impl StatusPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.inner.load_full()
    }

    /// Replace the snapshot by mutating a copy of the current one.
    pub fn update(&self, mutate: impl FnOnce(&mut StatusSnapshot)) {
        let mut next = StatusSnapshot::clone(&self.inner.load());
        mutate(&mut next);
        self.inner.store(Arc::new(next));
    }
}
