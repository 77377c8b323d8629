//! In-process publish/subscribe bus with synchronous, in-order delivery.
//!
//! Unlike a `tokio::broadcast` channel, `publish` itself awaits every
//! subscriber before returning: a publisher observes a subscriber's effects
//! (e.g. a persistence policy's append) as already applied once `publish`
//! resolves, in the exact order subscribers were registered.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sourced_core::mapper::MappedEvent;
use sourced_core::TimestampPosition;
use tokio::sync::RwLock;

use crate::error::PolicyError;

/// A domain event published on the bus, tagged by which position flavor of
/// event store it belongs in.
pub enum PublishedEvent {
    /// An event sequenced by integer (entity-version) position.
    Versioned(Box<dyn MappedEvent<u64> + Send + Sync>),
    /// An event sequenced by timestamp position.
    Timestamped(Box<dyn MappedEvent<TimestampPosition> + Send + Sync>),
}

/// A boxed, pinned future returned by a [`Subscriber`]'s handler.
pub type SubscriberFuture = Pin<Box<dyn Future<Output = Result<(), PolicyError>> + Send>>;

/// Receives published events from a [`DomainEventBus`].
pub trait Subscriber: Send + Sync {
    /// Handle one published event. Awaited in-line by `publish`, which
    /// propagates the error to the publisher instead of swallowing it.
    fn handle(&self, event: &PublishedEvent) -> SubscriberFuture;
}

/// Opaque handle returned by [`DomainEventBus::subscribe`], used to
/// unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Direct-callback, in-process event bus.
///
/// `publish` iterates registered subscribers in subscription order and
/// awaits each one before moving to the next, so delivery is synchronous
/// with the publisher and strictly ordered — there is no internal queue or
/// buffering to lag behind or drop events from.
#[derive(Default)]
pub struct DomainEventBus {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn Subscriber>)>>,
    next_id: AtomicU64,
}

impl DomainEventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    /// Register a subscriber, returning a handle usable with
    /// [`DomainEventBus::unsubscribe`].
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.write().await.push((id, subscriber));
        id
    }

    /// Remove a subscriber. Idempotent: unsubscribing an unknown or
    /// already-removed handle is a no-op.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().await.retain(|(existing, _)| *existing != id);
    }

    /// Publish an event, awaiting every current subscriber in registration
    /// order before returning.
    ///
    /// Stops and returns the first subscriber's error, leaving subscribers
    /// registered after it unvisited for this publish: the publisher
    /// observes persistence failure synchronously instead of it being
    /// logged and discarded.
    pub async fn publish(&self, event: PublishedEvent) -> Result<(), PolicyError> {
        let subscribers = self.subscribers.read().await.clone();
        for (_, subscriber) in subscribers {
            subscriber.handle(&event).await?;
        }
        Ok(())
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
