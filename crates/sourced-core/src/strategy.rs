//! The active-record strategy boundary: the only interface a storage
//! backend has to implement to plug into the event store and replay engine.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::{SequenceId, SequencedItem};

/// A range-query request against a single sequence.
///
/// Bound semantics: `gt`/`lt` are exclusive, `gte`/`lte` are inclusive.
/// Combining `gt` with `gte`, or `lt` with `lte`, is programmer error and
/// produces an unspecified (not panicking) result — callers must not do it.
#[derive(Clone, Debug, Default)]
pub struct ItemQuery<Position> {
    /// Strictly-greater-than lower bound.
    pub gt: Option<Position>,
    /// Greater-than-or-equal lower bound.
    pub gte: Option<Position>,
    /// Strictly-less-than upper bound.
    pub lt: Option<Position>,
    /// Less-than-or-equal upper bound.
    pub lte: Option<Position>,
    /// Maximum number of items to return.
    pub limit: Option<usize>,
    /// Whether the backend should walk its index ascending (an
    /// optimization hint; only matters combined with `limit`).
    pub query_ascending: bool,
    /// Whether the returned `Vec` is ordered ascending by position.
    pub results_ascending: bool,
}

impl<Position> ItemQuery<Position> {
    /// A query with both directions ascending and no bounds or limit.
    pub fn all() -> Self {
        Self {
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            limit: None,
            query_ascending: true,
            results_ascending: true,
        }
    }
}

/// Synchronous, blocking storage contract for one sequence-position flavor.
///
/// All operations are atomic with respect to `(sequence_id, position)`
/// uniqueness; the library adds no locking of its own on top of whatever
/// guarantee the backend gives here.
#[async_trait]
pub trait ActiveRecordStrategy<Position>: Send + Sync
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
{
    /// Append a single item. Fails [`StoreError::Conflict`] iff
    /// `(sequence_id, position)` already exists; the log is left unchanged
    /// on failure.
    async fn append(&self, item: SequencedItem<Position>) -> Result<(), StoreError>;

    /// Append a batch of items atomically: either the whole batch commits
    /// or none of it does.
    ///
    /// The default falls back to appending one at a time and rolling back
    /// every item it managed to append as soon as one fails, via
    /// [`ActiveRecordStrategy::remove`]. That rollback is best-effort, not
    /// truly atomic — a concurrent reader can observe the partially-applied
    /// batch before the rollback completes — so a backend that can offer a
    /// real transaction (a single write-lock critical section, a database
    /// transaction) should override this method instead of relying on the
    /// default.
    async fn append_batch(&self, items: Vec<SequencedItem<Position>>) -> Result<(), StoreError> {
        let mut appended = Vec::with_capacity(items.len());
        for item in items {
            let sequence_id = item.sequence_id;
            let position = item.position.clone();
            match self.append(item).await {
                Ok(()) => appended.push((sequence_id, position)),
                Err(err) => {
                    for (sequence_id, position) in appended.into_iter().rev() {
                        if let Err(rollback_err) = self.remove(sequence_id, position.clone()).await {
                            tracing::warn!(
                                %sequence_id,
                                position = ?position,
                                error = %rollback_err,
                                "failed to roll back a partially-appended batch"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Point read. Fails [`StoreError::NotFound`] if absent.
    async fn get(&self, sequence_id: SequenceId, position: Position) -> Result<SequencedItem<Position>, StoreError>;

    /// Remove a single item, used to roll back a partially-appended batch.
    /// A no-op (`Ok(())`) if the item is already absent.
    async fn remove(&self, sequence_id: SequenceId, position: Position) -> Result<(), StoreError>;

    /// Range read within a single sequence.
    async fn get_items(
        &self,
        sequence_id: SequenceId,
        query: ItemQuery<Position>,
    ) -> Result<Vec<SequencedItem<Position>>, StoreError>;

    /// All items across all sequences. Order across sequences is
    /// unspecified; within a sequence, items come out ascending by
    /// position.
    async fn all_items(&self) -> Result<Vec<SequencedItem<Position>>, StoreError>;
}
