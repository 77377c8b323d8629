//! Event store façade: stitches the [`SequencedItemMapper`] and an
//! [`ActiveRecordStrategy`] together into an event-level API.

use std::sync::Arc;

use crate::error::StoreError;
use crate::iterator::{IteratorKind, PagedIterator, PagedIteratorConfig};
use crate::mapper::{MappedEvent, SequencedItemMapper};
use crate::strategy::{ActiveRecordStrategy, ItemQuery};
use crate::topic::DecodedEvent;
use crate::{SequenceId, SequencedItem};

/// A lazily-produced sequence of decoded domain events, in the order the
/// underlying query (possibly paged) produces them.
pub enum DomainEventStream<Position> {
    /// A single query's results, already materialized.
    Eager(std::vec::IntoIter<SequencedItem<Position>>),
    /// A paged traversal, fetching the next page on demand.
    Paged(PagedIterator<Position>),
}

impl<Position> DomainEventStream<Position>
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
{
    /// Decode and return the next item, or `None` once exhausted.
    pub async fn next_item(&mut self) -> Result<Option<SequencedItem<Position>>, StoreError> {
        match self {
            DomainEventStream::Eager(iter) => Ok(iter.next()),
            DomainEventStream::Paged(iter) => iter.next().await,
        }
    }
}

/// Event-level façade over a [`SequencedItemMapper`] and an
/// [`ActiveRecordStrategy`].
pub struct EventStore<Position> {
    mapper: SequencedItemMapper<Position>,
    strategy: Arc<dyn ActiveRecordStrategy<Position>>,
}

impl<Position> Clone for EventStore<Position> {
    fn clone(&self) -> Self {
        Self { mapper: self.mapper.clone(), strategy: self.strategy.clone() }
    }
}

impl<Position> EventStore<Position>
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
{
    /// Build an event store from its mapper and backing strategy.
    pub fn new(mapper: SequencedItemMapper<Position>, strategy: Arc<dyn ActiveRecordStrategy<Position>>) -> Self {
        Self { mapper, strategy }
    }

    /// Append one event. A duplicate `(sequence_id, position)` surfaces as
    /// [`StoreError::Conflict`].
    #[tracing::instrument(skip(self, event), fields(topic = event.topic()))]
    pub async fn append<E: MappedEvent<Position> + ?Sized>(&self, event: &E) -> Result<(), StoreError> {
        let item = self.mapper.to_item(event)?;
        self.strategy.append(item).await
    }

    /// Encode an event into a [`SequencedItem`] without appending it.
    ///
    /// Lets a caller split encoding (which only borrows the event) from
    /// appending (which is async) — needed when the event reference does not
    /// outlive the point where the append future is constructed, e.g. a
    /// synchronous bus callback handling a borrowed, type-erased event.
    pub fn encode<E: MappedEvent<Position> + ?Sized>(&self, event: &E) -> Result<SequencedItem<Position>, StoreError> {
        Ok(self.mapper.to_item(event)?)
    }

    /// Append an already-encoded item directly, bypassing the mapper.
    pub async fn append_item(&self, item: SequencedItem<Position>) -> Result<(), StoreError> {
        self.strategy.append(item).await
    }

    /// Append a batch of events atomically.
    #[tracing::instrument(skip(self, events), fields(batch_size = events.len()))]
    pub async fn append_batch<E: MappedEvent<Position>>(&self, events: &[E]) -> Result<(), StoreError> {
        let items = events
            .iter()
            .map(|e| self.mapper.to_item(e))
            .collect::<Result<Vec<_>, _>>()?;
        self.strategy.append_batch(items).await
    }

    /// Fetch a window of decoded events for one entity.
    ///
    /// When `page_size` is set and no `limit` caps the overall query, the
    /// result is produced by a [`PagedIterator`]; otherwise a single
    /// underlying query is issued.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_domain_events(
        &self,
        sequence_id: SequenceId,
        query: ItemQuery<Position>,
        page_size: Option<usize>,
    ) -> Result<DomainEventStream<Position>, StoreError> {
        match page_size {
            Some(page_size) => {
                let config = PagedIteratorConfig {
                    sequence_id,
                    page_size,
                    gt: query.gt,
                    gte: query.gte,
                    lt: query.lt,
                    lte: query.lte,
                    limit: query.limit,
                    is_ascending: query.results_ascending,
                    kind: IteratorKind::Simple,
                };
                Ok(DomainEventStream::Paged(PagedIterator::new(self.strategy.clone(), config)))
            }
            None => {
                let items = self.strategy.get_items(sequence_id, query).await?;
                Ok(DomainEventStream::Eager(items.into_iter()))
            }
        }
    }

    /// Fetch the single most recent event at or before an optional bound.
    pub async fn get_most_recent_event(
        &self,
        sequence_id: SequenceId,
        lt: Option<Position>,
        lte: Option<Position>,
    ) -> Result<Option<SequencedItem<Position>>, StoreError> {
        let query = ItemQuery {
            gt: None,
            gte: None,
            lt,
            lte,
            limit: Some(1),
            query_ascending: false,
            results_ascending: false,
        };
        let mut items = self.strategy.get_items(sequence_id, query).await?;
        Ok(items.pop())
    }

    /// Decode a fetched [`SequencedItem`] back into a type-erased event.
    pub fn decode(&self, item: &SequencedItem<Position>) -> Result<DecodedEvent, StoreError> {
        self.mapper.from_item(item).map_err(|err| {
            tracing::warn!(sequence_id = %item.sequence_id, topic = %item.topic, error = %err, "failed to decode stored item");
            err.into()
        })
    }

    /// All items across all sequences, decoded.
    pub async fn all_domain_events(&self) -> Result<Vec<DecodedEvent>, StoreError> {
        let items = self.strategy.all_items().await?;
        items.iter().map(|item| self.decode(item)).collect()
    }

    /// Access the backing strategy, e.g. to construct a second
    /// [`PagedIterator`] directly (used by the replay engine's snapshot
    /// lookups).
    pub fn strategy(&self) -> Arc<dyn ActiveRecordStrategy<Position>> {
        self.strategy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecValue;
    use crate::topic::{EventDescriptor, TopicRegistry};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, PartialEq)]
    struct Placed {
        sequence_id: Uuid,
        version: u64,
        quantity: i64,
    }

    impl MappedEvent<u64> for Placed {
        fn sequence_id(&self) -> Uuid {
            self.sequence_id
        }
        fn position(&self) -> u64 {
            self.version
        }
        fn topic(&self) -> &str {
            "orders.Placed"
        }
        fn to_state(&self) -> CodecValue {
            let mut fields = BTreeMap::new();
            fields.insert("quantity".to_string(), CodecValue::Number(self.quantity as f64));
            fields.insert("version".to_string(), CodecValue::Number(self.version as f64));
            CodecValue::Object(fields)
        }
    }

    struct InMemoryStrategy {
        items: Mutex<Vec<SequencedItem<u64>>>,
    }

    impl InMemoryStrategy {
        fn new() -> Arc<Self> {
            Arc::new(Self { items: Mutex::new(vec![]) })
        }
    }

    #[async_trait]
    impl ActiveRecordStrategy<u64> for InMemoryStrategy {
        async fn append(&self, item: SequencedItem<u64>) -> Result<(), StoreError> {
            let mut items = self.items.lock().unwrap();
            if items
                .iter()
                .any(|i| i.sequence_id == item.sequence_id && i.position == item.position)
            {
                return Err(StoreError::Conflict {
                    sequence_id: item.sequence_id,
                    position: item.position.to_string(),
                });
            }
            items.push(item);
            Ok(())
        }
        async fn get(&self, sequence_id: SequenceId, position: u64) -> Result<SequencedItem<u64>, StoreError> {
            self.items
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.sequence_id == sequence_id && i.position == position)
                .cloned()
                .ok_or(StoreError::NotFound { sequence_id, position: position.to_string() })
        }
        async fn get_items(&self, sequence_id: SequenceId, query: ItemQuery<u64>) -> Result<Vec<SequencedItem<u64>>, StoreError> {
            let mut matched: Vec<_> = self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.sequence_id == sequence_id)
                .filter(|i| query.gt.map_or(true, |b| i.position > b))
                .filter(|i| query.gte.map_or(true, |b| i.position >= b))
                .filter(|i| query.lt.map_or(true, |b| i.position < b))
                .filter(|i| query.lte.map_or(true, |b| i.position <= b))
                .cloned()
                .collect();
            matched.sort_by_key(|i| i.position);
            if !query.results_ascending {
                matched.reverse();
            }
            if let Some(limit) = query.limit {
                matched.truncate(limit);
            }
            Ok(matched)
        }
        async fn all_items(&self) -> Result<Vec<SequencedItem<u64>>, StoreError> {
            Ok(self.items.lock().unwrap().clone())
        }
        async fn remove(&self, sequence_id: SequenceId, position: u64) -> Result<(), StoreError> {
            self.items
                .lock()
                .unwrap()
                .retain(|i| !(i.sequence_id == sequence_id && i.position == position));
            Ok(())
        }
    }

    fn descriptor() -> EventDescriptor {
        EventDescriptor::new("orders.Placed", false, |value| match value {
            CodecValue::Object(mut fields) => {
                let quantity = match fields.remove("quantity") {
                    Some(CodecValue::Number(n)) => n as i64,
                    _ => return Err(crate::codec::CodecError::Malformed("missing quantity".into())),
                };
                let version = match fields.remove("version") {
                    Some(CodecValue::Number(n)) => n as u64,
                    _ => return Err(crate::codec::CodecError::Malformed("missing version".into())),
                };
                Ok(Placed { sequence_id: Uuid::nil(), version, quantity })
            }
            _ => Err(crate::codec::CodecError::Malformed("expected object".into())),
        })
    }

    fn store() -> (EventStore<u64>, Arc<InMemoryStrategy>) {
        let mut registry = TopicRegistry::new();
        registry.register(descriptor());
        let mapper = SequencedItemMapper::new(Arc::new(registry), false, None);
        let strategy = InMemoryStrategy::new();
        (EventStore::new(mapper, strategy.clone()), strategy)
    }

    #[tokio::test]
    async fn duplicate_append_is_a_conflict() {
        let (store, _) = store();
        let sequence_id = Uuid::new_v4();
        let e1 = Placed { sequence_id, version: 0, quantity: 1 };
        let e2 = Placed { sequence_id, version: 0, quantity: 2 };
        store.append(&e1).await.unwrap();
        let err = store.append(&e2).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let item = store.strategy().get(sequence_id, 0).await.unwrap();
        let decoded = store.decode(&item).unwrap();
        assert_eq!(decoded.downcast_ref::<Placed>().unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn get_most_recent_event_picks_the_last_one() {
        let (store, _) = store();
        let sequence_id = Uuid::new_v4();
        for v in 0..3u64 {
            store.append(&Placed { sequence_id, version: v, quantity: v as i64 }).await.unwrap();
        }
        let most_recent = store.get_most_recent_event(sequence_id, None, None).await.unwrap().unwrap();
        assert_eq!(most_recent.position, 2);
    }

    #[tokio::test]
    async fn paged_get_domain_events_yields_all_items_in_order() {
        let (store, _) = store();
        let sequence_id = Uuid::new_v4();
        for v in 0..12u64 {
            store.append(&Placed { sequence_id, version: v, quantity: 0 }).await.unwrap();
        }
        let mut stream = store
            .get_domain_events(sequence_id, ItemQuery::all(), Some(5))
            .await
            .unwrap();
        let mut positions = vec![];
        while let Some(item) = stream.next_item().await.unwrap() {
            positions.push(item.position);
        }
        assert_eq!(positions, (0..12).collect::<Vec<_>>());
    }
}
