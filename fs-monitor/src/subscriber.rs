//! Event listeners registered with the monitor.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::Event;

/// Receives coalesced events from a [`crate::FileMonitor`].
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle a single event. Called once per event, in flush order.
    async fn handle_event(&self, event: Event);
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered set of subscribers.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    inner: RwLock<SubscriberList>,
}

#[derive(Default)]
struct SubscriberList {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn Subscriber>)>,
}

impl SubscriberSet {
    pub(crate) async fn insert(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let mut list = self.inner.write().await;
        let id = SubscriptionId(list.next_id);
        list.next_id += 1;
        list.entries.push((id, subscriber));
        id
    }

    pub(crate) async fn remove(&self, id: SubscriptionId) -> bool {
        let mut list = self.inner.write().await;
        let before = list.entries.len();
        list.entries.retain(|(entry_id, _)| *entry_id != id);
        list.entries.len() != before
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Deliver `event` to every subscriber, one after another.
    pub(crate) async fn publish(&self, event: &Event) {
        let subscribers: Vec<Arc<dyn Subscriber>> = self
            .inner
            .read()
            .await
            .entries
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();

        for subscriber in subscribers {
            subscriber.handle_event(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet").finish_non_exhaustive()
    }
}
