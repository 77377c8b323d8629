//! Event player: folds a window of an entity's history into a single
//! reconstructed state, optionally fast-forwarding from a snapshot.

use std::sync::Arc;

use sourced_core::mapper::MappedEvent;
use sourced_core::topic::DecodedEvent;
use sourced_core::{EventStore, ItemQuery, SequenceId};

use crate::error::ReplayError;
use crate::snapshot::SnapshotStrategy;

/// Folds decoded events into a running state.
///
/// Receives the state accumulated so far (`None` before the first event)
/// and the next decoded event, and returns the updated state. The function
/// is responsible for downcasting the [`DecodedEvent`] to whatever concrete
/// event types it expects.
pub type MutateFn<State> = dyn Fn(Option<State>, DecodedEvent) -> State + Send + Sync;

/// Replays an entity's sequenced items into application state.
///
/// `is_short` is a hint, not a guarantee: entities expected to have few
/// events are replayed by querying descending from the end of the stream,
/// on the assumption this touches less storage than scanning from the
/// start — but nothing in this crate enforces that the hint is accurate,
/// and an unbounded ascending replay remains correct either way.
pub struct EventPlayer<Position, State> {
    store: EventStore<Position>,
    mutate_func: Arc<MutateFn<State>>,
    page_size: Option<usize>,
    is_short: bool,
}

impl<Position, State> EventPlayer<Position, State>
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
    State: Send + Sync + 'static,
{
    /// Build a player over an event store and its folding function.
    pub fn new(store: EventStore<Position>, mutate_func: Arc<MutateFn<State>>) -> Self {
        Self { store, mutate_func, page_size: None, is_short: false }
    }

    /// Page domain-event queries at this size instead of issuing a single
    /// unpaged query.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Hint that entities replayed through this player typically carry few
    /// events, enabling the descending-query optimization for unbounded,
    /// unpaged replays.
    pub fn with_is_short_hint(mut self, is_short: bool) -> Self {
        self.is_short = is_short;
        self
    }

    /// Reconstruct an entity's state by folding `mutate_func` across its
    /// events in position order, starting from `initial_state`.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, gt, gte, lt, lte, initial_state), fields(%entity_id))]
    pub async fn replay_entity(
        &self,
        entity_id: SequenceId,
        gt: Option<Position>,
        gte: Option<Position>,
        lt: Option<Position>,
        lte: Option<Position>,
        limit: Option<usize>,
        initial_state: Option<State>,
        query_descending: bool,
    ) -> Result<Option<State>, ReplayError> {
        let no_bounds_or_limit = gt.is_none() && gte.is_none() && lt.is_none() && lte.is_none() && limit.is_none();
        let query_ascending = if self.is_short && no_bounds_or_limit && self.page_size.is_none() {
            false
        } else {
            !query_descending
        };
        tracing::debug!(query_ascending, page_size = ?self.page_size, "replaying entity");

        let query = ItemQuery {
            gt,
            gte,
            lt,
            lte,
            limit,
            query_ascending,
            results_ascending: query_ascending,
        };

        let mut stream = self.store.get_domain_events(entity_id, query, self.page_size).await?;
        let mut items = vec![];
        while let Some(item) = stream.next_item().await? {
            items.push(item);
        }
        if !query_ascending {
            items.reverse();
        }

        let mut state = initial_state;
        for item in &items {
            let decoded = self.store.decode(item)?;
            state = Some((self.mutate_func)(state, decoded));
        }
        Ok(state)
    }
}

impl<Position, State> EventPlayer<Position, State>
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
    State: MappedEvent<Position> + Clone + Send + Sync + 'static,
{
    /// Reconstruct an entity's state as of an optional bound, fast-forwarding
    /// from the most recent usable snapshot instead of replaying from the
    /// beginning whenever one is available.
    #[tracing::instrument(skip(self, lt, lte, snapshot_strategy), fields(%entity_id))]
    pub async fn take_snapshot(
        &self,
        entity_id: SequenceId,
        lt: Option<Position>,
        lte: Option<Position>,
        snapshot_strategy: &SnapshotStrategy<Position>,
    ) -> Result<Option<State>, ReplayError> {
        let Some(last_event) = self.store.get_most_recent_event(entity_id, lt.clone(), lte.clone()).await? else {
            tracing::debug!(%entity_id, "no events found, nothing to snapshot");
            return Ok(None);
        };

        let existing = snapshot_strategy
            .get_snapshot(entity_id, None, Some(last_event.position.clone()))
            .await?;

        let state = match existing {
            Some((snapshot_item, decoded)) if snapshot_item.position == last_event.position => {
                tracing::debug!(%entity_id, "snapshot already covers the most recent event");
                let state = decoded.downcast_ref::<State>().ok_or(ReplayError::SnapshotTypeMismatch)?;
                Some(state.clone())
            }
            Some((snapshot_item, decoded)) => {
                tracing::debug!(%entity_id, "fast-forwarding from a stale snapshot");
                let snapshot_state = decoded.downcast_ref::<State>().ok_or(ReplayError::SnapshotTypeMismatch)?;
                self.replay_entity(
                    entity_id,
                    Some(snapshot_item.position),
                    None,
                    lt,
                    lte,
                    None,
                    Some(snapshot_state.clone()),
                    false,
                )
                .await?
            }
            None => {
                tracing::debug!(%entity_id, "no usable snapshot, replaying from scratch");
                self.replay_entity(entity_id, None, None, lt, lte, None, None, false).await?
            }
        };

        if let Some(state) = &state {
            snapshot_strategy.take_snapshot(state).await?;
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourced_core::codec::CodecValue;
    use sourced_core::topic::{EventDescriptor, TopicRegistry};
    use sourced_core::SequencedItemMapper;
    use sourced_memory::MemoryStrategy;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[derive(Debug, PartialEq)]
    struct Deposited {
        sequence_id: Uuid,
        version: u64,
        amount: i64,
    }

    impl MappedEvent<u64> for Deposited {
        fn sequence_id(&self) -> Uuid {
            self.sequence_id
        }
        fn position(&self) -> u64 {
            self.version
        }
        fn topic(&self) -> &str {
            "account.Deposited"
        }
        fn to_state(&self) -> CodecValue {
            let mut fields = BTreeMap::new();
            fields.insert("amount".to_string(), CodecValue::Number(self.amount as f64));
            CodecValue::Object(fields)
        }
    }

    fn descriptor() -> EventDescriptor {
        EventDescriptor::new("account.Deposited", false, |value| match value {
            CodecValue::Object(mut fields) => {
                let amount = match fields.remove("amount") {
                    Some(CodecValue::Number(n)) => n as i64,
                    _ => return Err(sourced_core::codec::CodecError::Malformed("missing amount".into())),
                };
                Ok(Deposited { sequence_id: Uuid::nil(), version: 0, amount })
            }
            _ => Err(sourced_core::codec::CodecError::Malformed("expected object".into())),
        })
    }

    fn store() -> EventStore<u64> {
        let mut registry = TopicRegistry::new();
        registry.register(descriptor());
        let mapper = SequencedItemMapper::new(Arc::new(registry), false, None);
        EventStore::new(mapper, Arc::new(MemoryStrategy::<u64>::new()))
    }

    fn balance_mutator() -> Arc<MutateFn<i64>> {
        Arc::new(|state, event| {
            let balance = state.unwrap_or(0);
            let deposited = event.downcast_ref::<Deposited>().expect("only Deposited events expected");
            balance + deposited.amount
        })
    }

    #[tokio::test]
    async fn replay_entity_folds_events_in_ascending_order() {
        let store = store();
        let sequence_id = Uuid::new_v4();
        for v in 0..5u64 {
            store.append(&Deposited { sequence_id, version: v, amount: 10 }).await.unwrap();
        }

        let player = EventPlayer::new(store, balance_mutator());
        let balance = player
            .replay_entity(sequence_id, None, None, None, None, None, None, false)
            .await
            .unwrap();
        assert_eq!(balance, Some(50));
    }

    #[tokio::test]
    async fn is_short_hint_still_folds_ascending_despite_descending_query() {
        let store = store();
        let sequence_id = Uuid::new_v4();
        for (v, amount) in [(0u64, 100i64), (1, -30), (2, 5)] {
            store.append(&Deposited { sequence_id, version: v, amount }).await.unwrap();
        }

        let sum_then_sub = Arc::new(|state: Option<Vec<i64>>, event: DecodedEvent| {
            let mut amounts = state.unwrap_or_default();
            amounts.push(event.downcast_ref::<Deposited>().unwrap().amount);
            amounts
        });
        let player: EventPlayer<u64, Vec<i64>> = EventPlayer::new(store, sum_then_sub).with_is_short_hint(true);
        let amounts = player
            .replay_entity(sequence_id, None, None, None, None, None, None, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(amounts, vec![100, -30, 5]);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct AccountState {
        sequence_id: Uuid,
        version: u64,
        balance: i64,
    }

    impl MappedEvent<u64> for AccountState {
        fn sequence_id(&self) -> Uuid {
            self.sequence_id
        }
        fn position(&self) -> u64 {
            self.version
        }
        fn topic(&self) -> &str {
            "account.Snapshot"
        }
        fn to_state(&self) -> CodecValue {
            let mut fields = BTreeMap::new();
            fields.insert("balance".to_string(), CodecValue::Number(self.balance as f64));
            CodecValue::Object(fields)
        }
    }

    fn snapshot_descriptor() -> EventDescriptor {
        EventDescriptor::new("account.Snapshot", false, |value| match value {
            CodecValue::Object(mut fields) => {
                let balance = match fields.remove("balance") {
                    Some(CodecValue::Number(n)) => n as i64,
                    _ => return Err(sourced_core::codec::CodecError::Malformed("missing balance".into())),
                };
                Ok(AccountState { sequence_id: Uuid::nil(), version: 0, balance })
            }
            _ => Err(sourced_core::codec::CodecError::Malformed("expected object".into())),
        })
    }

    #[tokio::test]
    async fn take_snapshot_fast_forwards_from_a_stale_snapshot() {
        let event_store = store();
        let sequence_id = Uuid::new_v4();
        for v in 0..3u64 {
            event_store.append(&Deposited { sequence_id, version: v, amount: 10 }).await.unwrap();
        }

        let mut snapshot_registry = TopicRegistry::new();
        snapshot_registry.register(snapshot_descriptor());
        let snapshot_mapper = SequencedItemMapper::new(Arc::new(snapshot_registry), false, None);
        let snapshot_store = EventStore::new(snapshot_mapper, Arc::new(MemoryStrategy::<u64>::new()));
        let snapshot_strategy = SnapshotStrategy::new(snapshot_store);
        snapshot_strategy
            .take_snapshot(&AccountState { sequence_id, version: 0, balance: 10 })
            .await
            .unwrap();

        let mutate = Arc::new(|state: Option<AccountState>, event: DecodedEvent| {
            let mut state = state.expect("snapshot or prior fold seeds the state");
            state.version += 1;
            state.balance += event.downcast_ref::<Deposited>().unwrap().amount;
            state
        });
        let player: EventPlayer<u64, AccountState> = EventPlayer::new(event_store, mutate);

        let state = player
            .take_snapshot(sequence_id, None, None, &snapshot_strategy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.balance, 30);
        assert_eq!(state.version, 2);
    }

    #[tokio::test]
    async fn take_snapshot_returns_none_when_entity_has_no_events() {
        let event_store = store();
        let mut snapshot_registry = TopicRegistry::new();
        snapshot_registry.register(snapshot_descriptor());
        let snapshot_mapper = SequencedItemMapper::new(Arc::new(snapshot_registry), false, None);
        let snapshot_store = EventStore::new(snapshot_mapper, Arc::new(MemoryStrategy::<u64>::new()));
        let snapshot_strategy = SnapshotStrategy::new(snapshot_store);

        let mutate = Arc::new(|state: Option<AccountState>, _event: DecodedEvent| state.expect("unused"));
        let player: EventPlayer<u64, AccountState> = EventPlayer::new(event_store, mutate);

        let state = player.take_snapshot(Uuid::new_v4(), None, None, &snapshot_strategy).await.unwrap();
        assert!(state.is_none());
    }
}
