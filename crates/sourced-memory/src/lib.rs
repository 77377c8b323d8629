#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sourced-memory** – In-memory active-record strategy.
//!
//! The mandatory reference implementation of
//! [`sourced_core::ActiveRecordStrategy`]: fast, non-persistent, and
//! suitable for tests and for applications that do not need durability.
//! All data is lost when the process terminates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use sourced_core::{ActiveRecordStrategy, ItemQuery, SequenceId, SequencedItem, StoreError};

/// Default buffer size for the live item broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

/// In-memory, non-persistent [`ActiveRecordStrategy`].
///
/// Items are kept in a `HashMap<SequenceId, BTreeMap<Position, _>>` behind
/// a [`tokio::sync::RwLock`], giving per-sequence ordering for free and
/// making `get_items` a plain range scan over the inner `BTreeMap`. A
/// broadcast channel mirrors every committed item to live subscribers, the
/// same shape the workspace's other in-memory drivers use.
#[derive(Debug, Clone)]
pub struct MemoryStrategy<Position: Ord + Clone> {
    sequences: Arc<RwLock<HashMap<SequenceId, BTreeMap<Position, SequencedItem<Position>>>>>,
    broadcast_tx: broadcast::Sender<SequencedItem<Position>>,
}

impl<Position> Default for MemoryStrategy<Position>
where
    Position: Ord + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Position> MemoryStrategy<Position>
where
    Position: Ord + Clone + Send + Sync + 'static,
{
    /// Create a new, empty strategy.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// Create a new strategy with a custom broadcast buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer_size);
        Self {
            sequences: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
        }
    }

    /// Subscribe to the live item stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedItem<Position>> {
        self.broadcast_tx.subscribe()
    }

    /// Total number of items across all sequences.
    pub async fn item_count(&self) -> usize {
        self.sequences.read().await.values().map(|s| s.len()).sum()
    }

    /// Remove every sequence and item.
    pub async fn clear(&self) {
        self.sequences.write().await.clear();
    }
}

#[async_trait]
impl<Position> ActiveRecordStrategy<Position> for MemoryStrategy<Position>
where
    Position: Clone + Ord + std::fmt::Debug + Send + Sync + 'static,
{
    #[tracing::instrument(skip(self, item), fields(sequence_id = %item.sequence_id, position = ?item.position))]
    async fn append(&self, item: SequencedItem<Position>) -> Result<(), StoreError> {
        let mut sequences = self.sequences.write().await;
        let sequence = sequences.entry(item.sequence_id).or_default();

        if sequence.contains_key(&item.position) {
            tracing::warn!(sequence_id = %item.sequence_id, position = ?item.position, "append conflict: position already occupied");
            return Err(StoreError::Conflict {
                sequence_id: item.sequence_id,
                position: format!("{:?}", item.position),
            });
        }

        sequence.insert(item.position.clone(), item.clone());
        drop(sequences);

        let _ = self.broadcast_tx.send(item);
        Ok(())
    }

    /// Appends the whole batch under a single write-lock acquisition: every
    /// conflict is detected before anything is inserted, so a rejected batch
    /// never becomes partially visible to a concurrent reader.
    #[tracing::instrument(skip(self, items), fields(batch_size = items.len()))]
    async fn append_batch(&self, items: Vec<SequencedItem<Position>>) -> Result<(), StoreError> {
        let mut sequences = self.sequences.write().await;

        let mut seen_in_batch: Vec<(SequenceId, Position)> = Vec::with_capacity(items.len());
        for item in &items {
            let sequence = sequences.entry(item.sequence_id).or_default();
            let already_stored = sequence.contains_key(&item.position);
            let duplicated_in_batch = seen_in_batch
                .iter()
                .any(|(sequence_id, position)| *sequence_id == item.sequence_id && *position == item.position);
            seen_in_batch.push((item.sequence_id, item.position.clone()));
            if already_stored || duplicated_in_batch {
                tracing::warn!(
                    sequence_id = %item.sequence_id,
                    position = ?item.position,
                    "batch append conflict: position already occupied, rejecting whole batch"
                );
                return Err(StoreError::Conflict {
                    sequence_id: item.sequence_id,
                    position: format!("{:?}", item.position),
                });
            }
        }

        for item in &items {
            let sequence = sequences.entry(item.sequence_id).or_default();
            sequence.insert(item.position.clone(), item.clone());
        }
        drop(sequences);

        for item in items {
            let _ = self.broadcast_tx.send(item);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(%sequence_id, position = ?position))]
    async fn get(&self, sequence_id: SequenceId, position: Position) -> Result<SequencedItem<Position>, StoreError> {
        self.sequences
            .read()
            .await
            .get(&sequence_id)
            .and_then(|s| s.get(&position))
            .cloned()
            .ok_or_else(|| {
                tracing::debug!(%sequence_id, position = ?position, "point read missed");
                StoreError::NotFound {
                    sequence_id,
                    position: format!("{position:?}"),
                }
            })
    }

    #[tracing::instrument(skip(self, query), fields(%sequence_id))]
    async fn get_items(
        &self,
        sequence_id: SequenceId,
        query: ItemQuery<Position>,
    ) -> Result<Vec<SequencedItem<Position>>, StoreError> {
        let sequences = self.sequences.read().await;
        let Some(sequence) = sequences.get(&sequence_id) else {
            tracing::debug!(%sequence_id, "get_items on an unknown sequence, returning empty");
            return Ok(vec![]);
        };

        let mut matched: Vec<_> = sequence
            .iter()
            .filter(|(position, _)| query.gt.as_ref().map_or(true, |b| *position > b))
            .filter(|(position, _)| query.gte.as_ref().map_or(true, |b| *position >= b))
            .filter(|(position, _)| query.lt.as_ref().map_or(true, |b| *position < b))
            .filter(|(position, _)| query.lte.as_ref().map_or(true, |b| *position <= b))
            .map(|(_, item)| item.clone())
            .collect();

        if !query.query_ascending {
            matched.reverse();
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        if query.query_ascending != query.results_ascending {
            matched.reverse();
        }

        Ok(matched)
    }

    async fn all_items(&self) -> Result<Vec<SequencedItem<Position>>, StoreError> {
        let sequences = self.sequences.read().await;
        Ok(sequences.values().flat_map(|s| s.values().cloned()).collect())
    }

    #[tracing::instrument(skip(self), fields(%sequence_id, position = ?position))]
    async fn remove(&self, sequence_id: SequenceId, position: Position) -> Result<(), StoreError> {
        if let Some(sequence) = self.sequences.write().await.get_mut(&sequence_id) {
            sequence.remove(&position);
        }
        Ok(())
    }
}
