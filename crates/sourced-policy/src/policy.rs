//! Persistence policy: routes published domain events into the correct
//! event store by position flavor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sourced_core::{EventStore, TimestampPosition};

use crate::bus::{DomainEventBus, PublishedEvent, Subscriber, SubscriberFuture, SubscriptionId};
use crate::error::PolicyError;

/// Subscribes to both classes of published events and appends each to the
/// matching [`EventStore`].
///
/// Subscription is established once, in [`PersistencePolicy::new`], and torn
/// down exactly once by [`PersistencePolicy::close`]; calling `close` more
/// than once is a no-op rather than a double-unsubscribe.
pub struct PersistencePolicy {
    bus: Arc<DomainEventBus>,
    router: Arc<Router>,
    subscription_id: SubscriptionId,
    closed: AtomicBool,
}

struct Router {
    versioned_store: EventStore<u64>,
    timestamped_store: EventStore<TimestampPosition>,
}

impl Router {
    async fn route(&self, event: &PublishedEvent) -> Result<(), PolicyError> {
        match event {
            PublishedEvent::Versioned(e) => {
                let item = self.versioned_store.encode(&**e)?;
                Ok(self.versioned_store.append_item(item).await?)
            }
            PublishedEvent::Timestamped(e) => {
                let item = self.timestamped_store.encode(&**e)?;
                Ok(self.timestamped_store.append_item(item).await?)
            }
        }
    }
}

impl Subscriber for Router {
    fn handle(&self, event: &PublishedEvent) -> SubscriberFuture {
        // `route` only borrows `event` for the duration of the synchronous
        // `encode` call; by the time the returned future runs it only holds
        // owned data, so the future itself is free to outlive this call.
        let outcome = match event {
            PublishedEvent::Versioned(e) => self.versioned_store.encode(&**e).map(RoutedItem::Versioned),
            PublishedEvent::Timestamped(e) => self.timestamped_store.encode(&**e).map(RoutedItem::Timestamped),
        };
        let versioned_store = self.versioned_store.clone();
        let timestamped_store = self.timestamped_store.clone();
        Box::pin(async move {
            let result = match outcome {
                Ok(RoutedItem::Versioned(item)) => versioned_store.append_item(item).await,
                Ok(RoutedItem::Timestamped(item)) => timestamped_store.append_item(item).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &result {
                tracing::warn!(error = %err, "persistence policy failed to append event");
            }
            Ok(result?)
        })
    }
}

enum RoutedItem {
    Versioned(sourced_core::SequencedItem<u64>),
    Timestamped(sourced_core::SequencedItem<TimestampPosition>),
}

impl PersistencePolicy {
    /// Build a policy that appends versioned events to `versioned_store` and
    /// timestamped events to `timestamped_store`, and subscribe it to `bus`.
    pub async fn new(
        bus: Arc<DomainEventBus>,
        versioned_store: EventStore<u64>,
        timestamped_store: EventStore<TimestampPosition>,
    ) -> Self {
        let router = Arc::new(Router { versioned_store, timestamped_store });
        let subscription_id = bus.subscribe(router.clone()).await;
        Self { bus, router, subscription_id, closed: AtomicBool::new(false) }
    }

    /// Route one published event directly, bypassing the bus, surfacing the
    /// typed append error instead of only logging it.
    ///
    /// Useful for embedding the policy's routing rule in a context that
    /// doesn't otherwise need a [`DomainEventBus`].
    pub async fn route(&self, event: &PublishedEvent) -> Result<(), PolicyError> {
        self.router.route(event).await
    }

    /// Unsubscribe from the bus. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.unsubscribe(self.subscription_id).await;
    }
}
