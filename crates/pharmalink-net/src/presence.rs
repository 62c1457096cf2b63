//! Counterparty presence tracking.
//!
//! Maintains the set of pharmacies currently holding an open connection,
//! as reported by `pharmacyOnline` / `pharmacyOffline` pushes and presence
//! snapshots. Nothing is persisted; a new session starts empty.

use std::collections::HashSet;

use tracing::debug;

use pharmalink_shared::PharmacyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
    /// The socket dropped and no fresh snapshot has arrived yet.
    Unknown,
}

/// Tracks which counterparties are online.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    online: HashSet<PharmacyId>,
    stale: bool,
    /// Ids with a presence event since the last `mark_stale`.
    fresh: HashSet<PharmacyId>,
}

impl PresenceTracker {
    /// Create a new, empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a "peer became reachable" signal.
    ///
    /// Returns `true` if this changed the peer's state. A duplicate signal
    /// for an already-online peer is a no-op.
    pub fn on_online(&mut self, id: PharmacyId) -> bool {
        if self.stale {
            self.fresh.insert(id.clone());
        }
        let changed = self.online.insert(id.clone());
        if changed {
            debug!(pharmacy = %id.short(), "Pharmacy came online");
        }
        changed
    }

    /// Record a "peer became unreachable" signal.
    pub fn on_offline(&mut self, id: &PharmacyId) -> bool {
        if self.stale {
            self.fresh.insert(id.clone());
        }
        let changed = self.online.remove(id);
        if changed {
            debug!(pharmacy = %id.short(), "Pharmacy went offline");
        }
        changed
    }

    /// Replace the whole set with a server snapshot and clear staleness.
    ///
    /// Returns the ids whose state changed, with their new online flag.
    pub fn apply_snapshot(&mut self, ids: impl IntoIterator<Item = PharmacyId>) -> Vec<(PharmacyId, bool)> {
        let snapshot: HashSet<PharmacyId> = ids.into_iter().collect();

        let mut changes: Vec<(PharmacyId, bool)> = self
            .online
            .difference(&snapshot)
            .map(|id| (id.clone(), false))
            .collect();
        changes.extend(snapshot.difference(&self.online).map(|id| (id.clone(), true)));

        debug!(online = snapshot.len(), changed = changes.len(), "Applied presence snapshot");

        self.online = snapshot;
        self.stale = false;
        self.fresh.clear();
        changes
    }

    /// The socket went down: keep the last known set but report it as
    /// unknown until the next snapshot. An id with its own presence event
    /// since then is reported normally.
    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.fresh.clear();
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Closed world: anything never reported online is offline.
    pub fn is_online(&self, id: &PharmacyId) -> bool {
        self.online.contains(id)
    }

    pub fn status(&self, id: &PharmacyId) -> PresenceStatus {
        if self.stale && !self.fresh.contains(id) {
            PresenceStatus::Unknown
        } else if self.online.contains(id) {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PharmacyId {
        PharmacyId::from(s)
    }

    #[test]
    fn test_unknown_pharmacy_is_offline() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online(&id("never-seen")));
        assert_eq!(tracker.status(&id("never-seen")), PresenceStatus::Offline);
    }

    #[test]
    fn test_online_offline_online_sequence() {
        let mut tracker = PresenceTracker::new();
        let b = id("B");

        let transitions = [
            tracker.on_online(b.clone()),
            tracker.on_offline(&b),
            tracker.on_online(b.clone()),
        ];
        assert_eq!(transitions.iter().filter(|changed| **changed).count(), 3);
        assert!(tracker.is_online(&b));

        // Duplicate online is a no-op.
        assert!(!tracker.on_online(b.clone()));
        assert!(tracker.is_online(&b));
        assert_eq!(tracker.online_count(), 1);
    }

    #[test]
    fn test_duplicate_offline_is_noop() {
        let mut tracker = PresenceTracker::new();
        assert!(!tracker.on_offline(&id("A")));
        tracker.on_online(id("A"));
        assert!(tracker.on_offline(&id("A")));
        assert!(!tracker.on_offline(&id("A")));
    }

    #[test]
    fn test_stale_reports_unknown_until_snapshot() {
        let mut tracker = PresenceTracker::new();
        tracker.on_online(id("A"));
        tracker.mark_stale();

        assert_eq!(tracker.status(&id("A")), PresenceStatus::Unknown);
        assert_eq!(tracker.status(&id("B")), PresenceStatus::Unknown);
        // Not forced offline.
        assert!(tracker.is_online(&id("A")));

        let changes = tracker.apply_snapshot(vec![id("B")]);
        assert!(!tracker.is_stale());
        assert_eq!(tracker.status(&id("A")), PresenceStatus::Offline);
        assert_eq!(tracker.status(&id("B")), PresenceStatus::Online);
        assert_eq!(changes.len(), 2);
        assert!(changes.contains(&(id("A"), false)));
        assert!(changes.contains(&(id("B"), true)));
    }

    #[test]
    fn test_presence_event_refreshes_only_its_pharmacy() {
        let mut tracker = PresenceTracker::new();
        tracker.on_online(id("A"));
        tracker.mark_stale();

        tracker.on_online(id("C"));
        tracker.on_offline(&id("D"));
        assert!(tracker.is_stale());
        assert_eq!(tracker.status(&id("C")), PresenceStatus::Online);
        assert_eq!(tracker.status(&id("D")), PresenceStatus::Offline);
        assert_eq!(tracker.status(&id("A")), PresenceStatus::Unknown);

        // A second drop forgets the per-id refreshes.
        tracker.mark_stale();
        assert_eq!(tracker.status(&id("C")), PresenceStatus::Unknown);

        tracker.apply_snapshot(vec![id("A")]);
        assert_eq!(tracker.status(&id("A")), PresenceStatus::Online);
        assert_eq!(tracker.status(&id("C")), PresenceStatus::Offline);
    }
}
