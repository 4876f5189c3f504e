//! Responsibility notification toward the replication subsystem.
//!
//! After a successful write the RPC layer reports the touched location
//! key here; the replication subsystem drains the update channel and
//! decides whether the data must be pushed to closer peers. Delivery is
//! at-least-once per distinct location key touched.

use std::collections::HashSet;

use parking_lot::RwLock;
use stash_core::Key160;
use tokio::sync::mpsc;
use tracing::debug;

/// One notification: a location key this peer just stored data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsibilityUpdate {
    /// The location key of the written entry
    pub location: Key160,
    /// Whether this peer saw the location key for the first time
    pub newly_responsible: bool,
}

/// Tracks which location keys this peer holds data for and notifies a
/// subscriber about every write.
///
/// Handlers run on the I/O workers, so the channel is unbounded and the
/// send never blocks; a vanished subscriber is tolerated.
pub struct ResponsibilityTracker {
    responsibilities: RwLock<HashSet<Key160>>,
    updates: mpsc::UnboundedSender<ResponsibilityUpdate>,
}

impl ResponsibilityTracker {
    /// Creates a tracker and the channel its subscriber drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResponsibilityUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                responsibilities: RwLock::new(HashSet::new()),
                updates,
            },
            rx,
        )
    }

    /// Records a write under `location` and notifies the subscriber.
    pub fn update_and_notify_responsibilities(&self, location: Key160) {
        let newly_responsible = self.responsibilities.write().insert(location);
        if newly_responsible {
            debug!(%location, "became responsible for location");
        }
        // The subscriber may be gone during shutdown; that is fine.
        let _ = self.updates.send(ResponsibilityUpdate {
            location,
            newly_responsible,
        });
    }

    /// Whether this peer currently holds data for `location`.
    pub fn is_responsible(&self, location: &Key160) -> bool {
        self.responsibilities.read().contains(location)
    }

    /// Number of distinct location keys seen.
    pub fn len(&self) -> usize {
        self.responsibilities.read().len()
    }

    /// Whether no location key was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.responsibilities.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Key160::new(bytes)
    }

    #[test]
    fn test_every_write_notifies() {
        let (tracker, mut rx) = ResponsibilityTracker::new();
        tracker.update_and_notify_responsibilities(k(1));
        tracker.update_and_notify_responsibilities(k(1));

        let first = rx.try_recv().unwrap();
        assert!(first.newly_responsible);
        let second = rx.try_recv().unwrap();
        assert!(!second.newly_responsible);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tracks_distinct_locations() {
        let (tracker, _rx) = ResponsibilityTracker::new();
        tracker.update_and_notify_responsibilities(k(1));
        tracker.update_and_notify_responsibilities(k(2));
        tracker.update_and_notify_responsibilities(k(1));

        assert_eq!(tracker.len(), 2);
        assert!(tracker.is_responsible(&k(1)));
        assert!(!tracker.is_responsible(&k(9)));
    }

    #[test]
    fn test_dropped_subscriber_is_tolerated() {
        let (tracker, rx) = ResponsibilityTracker::new();
        drop(rx);
        tracker.update_and_notify_responsibilities(k(1));
        assert!(tracker.is_responsible(&k(1)));
    }
}
