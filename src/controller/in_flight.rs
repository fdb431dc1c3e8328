//! In-flight update tracking
//!
//! Membership is held by an [`InFlightGuard`]. Acquiring is a single atomic
//! insert, so two passes racing on the same index cannot both win, and the
//! marker is released by the guard's drop on every completion path.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    indices: DashSet<String>,
    idle: Notify,
}

/// Concurrent set of indices with an outstanding update
#[derive(Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Inner>,
}

impl InFlightSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `index` as in flight, unless it already is
    pub fn try_acquire(&self, index: &str) -> Option<InFlightGuard> {
        self.inner
            .indices
            .insert(index.to_string())
            .then(|| InFlightGuard {
                inner: Arc::clone(&self.inner),
                index: index.to_string(),
            })
    }

    /// Whether `index` has an outstanding update
    pub fn contains(&self, index: &str) -> bool {
        self.inner.indices.contains(index)
    }

    /// Number of outstanding updates
    pub fn len(&self) -> usize {
        self.inner.indices.len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.inner.indices.is_empty()
    }

    /// Wait until nothing is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for InFlightSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.inner.indices.iter().map(|e| e.key().clone())).finish()
    }
}

/// Proof that an index is in flight; dropping it releases the marker
#[must_use = "dropping the guard immediately releases the in-flight marker"]
pub struct InFlightGuard {
    inner: Arc<Inner>,
    index: String,
}

impl InFlightGuard {
    /// Index held by this guard
    pub fn index(&self) -> &str {
        &self.index
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.indices.remove(&self.index);
        if self.inner.indices.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }
}
