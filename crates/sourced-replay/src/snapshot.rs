//! Snapshot strategy: snapshots live as sequenced items in a parallel
//! stream, replayed to skip straight to an entity's tail events.

use std::sync::Arc;

use sourced_core::topic::DecodedEvent;
use sourced_core::{ActiveRecordStrategy, EventStore, SequenceId, SequencedItem};

use crate::error::ReplayError;

/// A snapshot of one entity's state at a given position.
#[derive(Clone, Debug)]
pub struct Snapshot<Position, State> {
    /// Entity this snapshot describes.
    pub sequence_id: SequenceId,
    /// Position (version/timestamp) of the last event folded into `state`.
    pub position: Position,
    /// The entity's reconstructed state at `position`.
    pub state: State,
}

/// Takes and retrieves snapshots, storing them as sequenced items in their
/// own parallel stream via an [`EventStore`].
///
/// `State` must round-trip through the same transcoding machinery as any
/// other event: snapshots are ordinary sequenced items, just tagged with a
/// distinguished topic and read back through their own mapper.
pub struct SnapshotStrategy<Position> {
    store: EventStore<Position>,
}

impl<Position> SnapshotStrategy<Position>
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
{
    /// Build a snapshot strategy over its own event store (its own mapper
    /// and its own, typically separate, active-record strategy).
    pub fn new(store: EventStore<Position>) -> Self {
        Self { store }
    }

    /// Append a snapshot event to the parallel stream.
    pub async fn take_snapshot<E: sourced_core::mapper::MappedEvent<Position> + ?Sized>(
        &self,
        snapshot_event: &E,
    ) -> Result<(), ReplayError> {
        Ok(self.store.append(snapshot_event).await?)
    }

    /// Fetch the most recent snapshot at or before the given bound,
    /// decoded to a type-erased event value.
    pub async fn get_snapshot(
        &self,
        sequence_id: SequenceId,
        lt: Option<Position>,
        lte: Option<Position>,
    ) -> Result<Option<(SequencedItem<Position>, DecodedEvent)>, ReplayError> {
        match self.store.get_most_recent_event(sequence_id, lt, lte).await? {
            Some(item) => {
                let decoded = self.store.decode(&item)?;
                Ok(Some((item, decoded)))
            }
            None => Ok(None),
        }
    }

    /// Access the backing active-record strategy, e.g. to build a
    /// [`sourced_core::PagedIterator`] directly over the snapshot stream.
    pub fn strategy(&self) -> Arc<dyn ActiveRecordStrategy<Position>> {
        self.store.strategy()
    }
}

/// A snapshot strategy that never has anything to return: every
/// `get_snapshot` call resolves to `None`, and `take_snapshot` never
/// actually stores anything.
///
/// Useful as the default when an application does not need snapshotting —
/// mirrors the no-op default a pluggable strategy interface typically
/// ships with.
pub struct NilSnapshotStrategy;

impl NilSnapshotStrategy {
    /// Always resolves to no snapshot.
    pub async fn get_snapshot<Position>(
        &self,
        _sequence_id: SequenceId,
        _lt: Option<Position>,
        _lte: Option<Position>,
    ) -> Result<Option<(SequencedItem<Position>, DecodedEvent)>, ReplayError> {
        Ok(None)
    }
}

impl Default for NilSnapshotStrategy {
    fn default() -> Self {
        Self
    }
}
