//! Version and liveness tracking for source descriptions.
//!
//! Every description carries two independent signals:
//!
//! - a [`ChangeTracker`] version, bumped on each mutation and compared by
//!   caches through `needs_update`;
//! - a [`Liveness`] token shared by every clone of the description. Caches
//!   keep only a [`LivenessWatch`] (a weak handle), so once the authoring
//!   layer drops the last copy the dependent entries become purge-eligible
//!   without waiting for the staleness timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Version tracker - used to mark description changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeTracker {
    version: u64,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { version: 0 }
    }

    /// Marks as modified, increments version by 1
    pub fn changed(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Gets the current version number
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

static NEXT_LIVENESS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct LivenessInner {
    id: u64,
}

/// Strong liveness token owned by a description and all of its clones.
#[derive(Debug, Clone)]
pub struct Liveness {
    inner: Arc<LivenessInner>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                id: NEXT_LIVENESS_ID.fetch_add(1, Ordering::Relaxed),
            }),
        }
    }

    /// Creates a weak watch that caches store instead of the description.
    #[must_use]
    pub fn watch(&self) -> LivenessWatch {
        LivenessWatch {
            inner: Arc::downgrade(&self.inner),
            id: self.inner.id,
        }
    }

    /// Unique token id, shared by clones.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

/// Weak handle to a [`Liveness`] token.
#[derive(Debug, Clone)]
pub struct LivenessWatch {
    inner: Weak<LivenessInner>,
    id: u64,
}

impl LivenessWatch {
    /// Returns `true` while at least one copy of the source description exists.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_tracker_wraps_on_overflow() {
        let mut tracker = ChangeTracker { version: u64::MAX };
        tracker.changed();
        assert_eq!(tracker.version(), 0);
    }

    #[test]
    fn watch_expires_with_last_clone() {
        let token = Liveness::new();
        let copy = token.clone();
        let watch = token.watch();

        drop(token);
        assert!(watch.is_alive(), "clone still holds the token");

        drop(copy);
        assert!(!watch.is_alive());
    }
}
