//! Unread notification feed.
//!
//! Only the most recent unread entries are kept for display; the true
//! unread count is tracked separately and drives the badge.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use pharmalink_net::RestApi;
use pharmalink_shared::constants::BADGE_CAP;
use pharmalink_shared::{FetchError, Notification, NotificationId, PharmacyId};

#[derive(Default)]
struct FeedState {
    /// Most recent first, at most `display_limit` entries.
    unseen: VecDeque<Notification>,
    unread_ids: HashSet<NotificationId>,
    unread_total: u64,
    seen: HashSet<NotificationId>,
    bootstrapped: bool,
}

impl FeedState {
    fn is_known(&self, id: &NotificationId) -> bool {
        self.unread_ids.contains(id) || self.seen.contains(id)
    }
}

pub struct NotificationFeed {
    display_limit: usize,
    state: Mutex<FeedState>,
}

impl NotificationFeed {
    pub fn new(display_limit: usize) -> Self {
        Self {
            display_limit,
            state: Mutex::new(FeedState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed the feed with the actor's unread notifications. Runs once;
    /// later calls return without a request.
    pub async fn bootstrap<A: RestApi>(
        &self,
        api: &Arc<A>,
        actor: &PharmacyId,
    ) -> Result<(), FetchError> {
        if self.lock().bootstrapped {
            return Ok(());
        }

        let mut fetched = api.fetch_notifications().await?;
        fetched.retain(|n| !n.read);
        // Stable, so entries without a timestamp keep server order at the end.
        fetched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut state = self.lock();
        if state.bootstrapped {
            return Ok(());
        }
        state.bootstrapped = true;

        for notification in fetched {
            if state.is_known(&notification.id) {
                continue;
            }
            state.unread_ids.insert(notification.id.clone());
            state.unread_total += 1;
            // Pushes received meanwhile are newer and stay in front.
            if state.unseen.len() < self.display_limit {
                state.unseen.push_back(notification);
            }
        }

        info!(
            actor = %actor.short(),
            unread = state.unread_total,
            "Notifications loaded"
        );
        Ok(())
    }

    /// Record a pushed notification. Returns `false` for one already known.
    pub fn on_push(&self, notification: Notification) -> bool {
        let mut state = self.lock();
        if state.is_known(&notification.id) {
            debug!(id = %notification.id, "Duplicate notification ignored");
            return false;
        }
        state.unread_ids.insert(notification.id.clone());
        state.unread_total += 1;
        state.unseen.push_front(notification);
        state.unseen.truncate(self.display_limit);
        true
    }

    /// Mark `id` as read remotely, then drop it from the feed.
    ///
    /// Returns `Ok(false)` without a request for an id that is already seen
    /// or was never delivered. On failure the feed is left unchanged.
    pub async fn acknowledge<A: RestApi>(
        &self,
        api: &Arc<A>,
        id: &NotificationId,
    ) -> Result<bool, FetchError> {
        {
            let state = self.lock();
            if state.seen.contains(id) || !state.unread_ids.contains(id) {
                debug!(id = %id, "Nothing to acknowledge");
                return Ok(false);
            }
        }

        if let Err(e) = api.mark_as_read(id).await {
            warn!(id = %id, error = %e, "Failed to mark notification as read");
            return Err(e);
        }

        let mut state = self.lock();
        // A concurrent acknowledge of the same id may have landed first.
        if !state.unread_ids.remove(id) {
            return Ok(false);
        }
        state.seen.insert(id.clone());
        state.unread_total = state.unread_total.saturating_sub(1);
        state.unseen.retain(|n| &n.id != id);
        debug!(id = %id, unread = state.unread_total, "Notification acknowledged");
        Ok(true)
    }

    pub fn visible(&self) -> Vec<Notification> {
        self.lock().unseen.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> u64 {
        self.lock().unread_total
    }

    /// Badge label: nothing at zero, `"99+"` above the cap.
    pub fn badge(&self) -> Option<String> {
        badge_label(self.unread_count())
    }
}

pub fn badge_label(count: u64) -> Option<String> {
    match count {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}
