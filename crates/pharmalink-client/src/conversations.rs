//! Per-counterparty message history, reconciled from REST and socket pushes.
//!
//! A conversation is ordered by `created_at` (ties keep arrival order) and
//! holds each confirmed message id at most once, whichever path delivered it
//! first. History is fetched at most once per counterparty: concurrent
//! callers share a single in-flight request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pharmalink_net::RestApi;
use pharmalink_shared::{FetchError, Message, MessageKey, PharmacyId};

type HistoryFetch = Shared<BoxFuture<'static, Result<Vec<Message>, FetchError>>>;

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<Message>,
    history_loaded: bool,
}

impl Conversation {
    /// Ordered insert; a confirmed id already present is ignored.
    fn insert(&mut self, message: Message) -> bool {
        if let Some(id) = message.key.confirmed_id() {
            if self
                .messages
                .iter()
                .any(|m| m.key.confirmed_id() == Some(id))
            {
                return false;
            }
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    fn remove_pending(&mut self, local_id: Uuid) -> bool {
        let key = MessageKey::Pending(local_id);
        match self.messages.iter().position(|m| m.key == key) {
            Some(at) => {
                self.messages.remove(at);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<PharmacyId, Conversation>,
    in_flight: HashMap<PharmacyId, HistoryFetch>,
}

pub struct ConversationStore {
    actor: PharmacyId,
    inner: Mutex<Inner>,
}

impl ConversationStore {
    pub fn new(actor: PharmacyId) -> Self {
        Self {
            actor,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load the history with `counterparty` unless it is already loaded.
    ///
    /// On failure the history stays unloaded, so a later call retries.
    pub async fn ensure_history<A: RestApi>(
        &self,
        api: &Arc<A>,
        counterparty: &PharmacyId,
    ) -> Result<(), FetchError> {
        let fetch = {
            let mut inner = self.lock();
            if inner
                .conversations
                .get(counterparty)
                .is_some_and(|c| c.history_loaded)
            {
                return Ok(());
            }
            match inner.in_flight.get(counterparty) {
                Some(fetch) => {
                    debug!(counterparty = %counterparty.short(), "Joining in-flight history fetch");
                    fetch.clone()
                }
                None => {
                    let fetch = history_fetch(api.clone(), counterparty.clone());
                    inner.in_flight.insert(counterparty.clone(), fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        let mut inner = self.lock();
        if inner
            .in_flight
            .get(counterparty)
            .is_some_and(|current| current.ptr_eq(&fetch))
        {
            inner.in_flight.remove(counterparty);
        }

        match result {
            Ok(history) => {
                let conversation = inner.conversations.entry(counterparty.clone()).or_default();
                if !conversation.history_loaded {
                    let fetched = history.len();
                    for message in history {
                        conversation.insert(message);
                    }
                    conversation.history_loaded = true;
                    info!(
                        counterparty = %counterparty.short(),
                        fetched,
                        total = conversation.messages.len(),
                        "History loaded"
                    );
                }
                Ok(())
            }
            Err(e) => {
                warn!(counterparty = %counterparty.short(), error = %e, "History fetch failed");
                Err(e)
            }
        }
    }

    /// Add a confirmed message. Returns `false` for a duplicate.
    pub fn append(&self, message: Message) -> bool {
        let counterparty = message.counterparty_for(&self.actor).clone();
        let mut inner = self.lock();
        let added = inner
            .conversations
            .entry(counterparty.clone())
            .or_default()
            .insert(message);
        if !added {
            debug!(counterparty = %counterparty.short(), "Duplicate message ignored");
        }
        added
    }

    /// Show an outgoing message before the server confirms it.
    pub fn append_pending(&self, message: Message) -> Option<Uuid> {
        let MessageKey::Pending(local_id) = message.key else {
            return None;
        };
        let counterparty = message.counterparty_for(&self.actor).clone();
        self.lock()
            .conversations
            .entry(counterparty)
            .or_default()
            .insert(message);
        Some(local_id)
    }

    /// Replace the pending entry `local_id` with its confirmed form.
    ///
    /// If the confirmed message already arrived by push, the pending entry
    /// is dropped instead.
    pub fn confirm(&self, local_id: Uuid, confirmed: Message) -> bool {
        let counterparty = confirmed.counterparty_for(&self.actor).clone();
        let mut inner = self.lock();
        let conversation = inner.conversations.entry(counterparty).or_default();
        conversation.remove_pending(local_id);
        conversation.insert(confirmed)
    }

    /// Drop the pending entry `local_id` after a failed send.
    pub fn retract(&self, counterparty: &PharmacyId, local_id: Uuid) -> bool {
        self.lock()
            .conversations
            .get_mut(counterparty)
            .is_some_and(|c| c.remove_pending(local_id))
    }

    pub fn get(&self, counterparty: &PharmacyId) -> Vec<Message> {
        self.lock()
            .conversations
            .get(counterparty)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn has_history(&self, counterparty: &PharmacyId) -> bool {
        self.lock()
            .conversations
            .get(counterparty)
            .is_some_and(|c| c.history_loaded)
    }

    pub fn contains(&self, counterparty: &PharmacyId) -> bool {
        self.lock().conversations.contains_key(counterparty)
    }

    pub fn counterparties(&self) -> Vec<PharmacyId> {
        let mut ids: Vec<PharmacyId> = self.lock().conversations.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn history_fetch<A: RestApi>(api: Arc<A>, counterparty: PharmacyId) -> HistoryFetch {
    async move {
        let history = api.fetch_history(&counterparty).await?;
        Ok(history.into_iter().map(Message::from).collect())
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pharmalink_net::testing::{wire_message, FakeApi};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn actor() -> PharmacyId {
        PharmacyId::from("me")
    }

    fn pending(to: &str, text: &str) -> Message {
        Message {
            key: MessageKey::Pending(Uuid::new_v4()),
            sender: actor(),
            receiver: to.into(),
            text: Some(text.to_string()),
            image: None,
            created_at: Utc::now(),
            anonymous_sender: false,
        }
    }

    fn local_id(message: &Message) -> Uuid {
        match message.key {
            MessageKey::Pending(id) => id,
            MessageKey::Confirmed(_) => panic!("not pending"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_selection_fetches_once() {
        let api = Arc::new(FakeApi::new("me").with_history(
            "b",
            vec![wire_message("m1", "b", "me", "hi", 0)],
        ));
        api.set_history_delay(Duration::from_millis(50));
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");

        let (first, second) = tokio::join!(
            store.ensure_history(&api, &b),
            store.ensure_history(&api, &b)
        );
        assert!(first.is_ok() && second.is_ok());
        store.ensure_history(&api, &b).await.unwrap();

        assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&b).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_history_unloaded() {
        let api = Arc::new(FakeApi::new("me"));
        api.fail_next_history(FetchError::Timeout);
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");

        assert_eq!(store.ensure_history(&api, &b).await, Err(FetchError::Timeout));
        assert!(!store.has_history(&b));
        assert!(!store.contains(&b));

        store.ensure_history(&api, &b).await.unwrap();
        assert!(store.has_history(&b));
        assert_eq!(api.history_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_history_merges_with_earlier_push() {
        let api = Arc::new(FakeApi::new("me").with_history(
            "b",
            vec![
                wire_message("m1", "b", "me", "first", 0),
                wire_message("m2", "me", "b", "second", 1),
            ],
        ));
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");

        assert!(store.append(wire_message("m2", "me", "b", "second", 1).into()));
        store.ensure_history(&api, &b).await.unwrap();

        let ids: Vec<String> = store.get(&b).iter().map(|m| m.key.to_string()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_append_orders_by_time_and_dedups() {
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");

        store.append(wire_message("m3", "b", "me", "later", 5).into());
        store.append(wire_message("m1", "b", "me", "earlier", 1).into());
        store.append(wire_message("m2", "me", "b", "same time", 5).into());
        assert!(!store.append(wire_message("m1", "b", "me", "earlier", 1).into()));

        let ids: Vec<String> = store.get(&b).iter().map(|m| m.key.to_string()).collect();
        assert_eq!(ids, vec!["m1", "m3", "m2"]);
    }

    #[test]
    fn test_push_then_confirm_leaves_one_entry() {
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");
        let placeholder = pending("b", "hello");
        let id = store.append_pending(placeholder.clone()).unwrap();
        assert_eq!(id, local_id(&placeholder));

        let confirmed: Message = wire_message("srv-1", "me", "b", "hello", 0).into();
        store.append(confirmed.clone());
        store.confirm(id, confirmed.clone());

        assert_eq!(store.get(&b), vec![confirmed]);
    }

    #[test]
    fn test_confirm_then_push_leaves_one_entry() {
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");
        let id = store.append_pending(pending("b", "hello")).unwrap();

        let confirmed: Message = wire_message("srv-1", "me", "b", "hello", 0).into();
        assert!(store.confirm(id, confirmed.clone()));
        assert!(!store.append(confirmed.clone()));

        assert_eq!(store.get(&b), vec![confirmed]);
    }

    #[test]
    fn test_retract_removes_placeholder() {
        let store = ConversationStore::new(actor());
        let b = PharmacyId::from("b");
        let id = store.append_pending(pending("b", "hello")).unwrap();

        assert!(store.retract(&b, id));
        assert!(store.get(&b).is_empty());
        assert!(!store.retract(&b, id));
    }

    #[test]
    fn test_confirmed_message_is_not_pending() {
        let store = ConversationStore::new(actor());
        let confirmed: Message = wire_message("m1", "me", "b", "x", 0).into();
        assert!(store.append_pending(confirmed).is_none());
    }
}
