#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sourced-sled** – Durable, embedded active-record strategy backed by
//! sled.
//!
//! Items are keyed by the concatenation of `sequence_id` (16 bytes) and the
//! big-endian-encoded integer `position` (8 bytes), so a prefix range scan
//! over one sequence's key space directly implements
//! [`sourced_core::ActiveRecordStrategy::get_items`] without a secondary
//! index.

use std::path::Path;

use async_trait::async_trait;
use sled::{Db, IVec, Tree};
use tokio::sync::broadcast;
use uuid::Uuid;

use sourced_core::{ActiveRecordStrategy, ItemQuery, SequenceId, SequencedItem, StoreError};

/// Default broadcast channel size for live item streaming.
const DEFAULT_BROADCAST_SIZE: usize = 256;

fn encode_key(sequence_id: SequenceId, position: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[0..16].copy_from_slice(sequence_id.as_bytes());
    key[16..24].copy_from_slice(&position.to_be_bytes());
    key
}

fn sequence_prefix(sequence_id: SequenceId) -> [u8; 16] {
    *sequence_id.as_bytes()
}

fn decode_item(bytes: &IVec) -> Result<SequencedItem<u64>, StoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::Backend(e.to_string()))
}

/// A sled-backed, durable [`ActiveRecordStrategy`] for integer-sequenced
/// logs.
///
/// One [`sled::Tree`] holds the items; the database handle is retained
/// only to keep the database open for the lifetime of this value.
#[derive(Debug)]
pub struct SledStrategy {
    _db: Db,
    items: Tree,
    broadcast_tx: broadcast::Sender<SequencedItem<u64>>,
}

impl SledStrategy {
    /// Open or create a sled database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> sled::Result<Self> {
        Self::open_with_config(path, sled::Config::default())
    }

    /// Open a sled database with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: sled::Config) -> sled::Result<Self> {
        let db = config.path(path).open()?;
        Self::from_db(db)
    }

    /// Build a strategy from an already-open sled database.
    pub fn from_db(db: Db) -> sled::Result<Self> {
        let items = db.open_tree("sequenced_items")?;
        let (broadcast_tx, _) = broadcast::channel(DEFAULT_BROADCAST_SIZE);
        Ok(Self { _db: db, items, broadcast_tx })
    }

    /// Open a temporary, auto-cleaned-up database. Intended for tests.
    #[cfg(test)]
    pub fn temporary() -> sled::Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Subscribe to the live item stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedItem<u64>> {
        self.broadcast_tx.subscribe()
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> sled::Result<()> {
        self.items.flush_async().await.map(|_| ())
    }

    /// Total number of items stored.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl ActiveRecordStrategy<u64> for SledStrategy {
    #[tracing::instrument(skip(self, item), fields(sequence_id = %item.sequence_id, position = item.position))]
    async fn append(&self, item: SequencedItem<u64>) -> Result<(), StoreError> {
        let key = encode_key(item.sequence_id, item.position);
        let bytes = rmp_serde::to_vec_named(&item).map_err(|e| StoreError::Backend(e.to_string()))?;

        let inserted = self
            .items
            .compare_and_swap(key, None::<&[u8]>, Some(bytes))
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if inserted.is_err() {
            tracing::warn!(sequence_id = %item.sequence_id, position = item.position, "append conflict: position already occupied");
            return Err(StoreError::Conflict {
                sequence_id: item.sequence_id,
                position: item.position.to_string(),
            });
        }

        let _ = self.broadcast_tx.send(item);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(%sequence_id, position))]
    async fn get(&self, sequence_id: SequenceId, position: u64) -> Result<SequencedItem<u64>, StoreError> {
        let key = encode_key(sequence_id, position);
        match self.items.get(key).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(bytes) => decode_item(&bytes),
            None => {
                tracing::debug!(%sequence_id, position, "point read missed");
                Err(StoreError::NotFound { sequence_id, position: position.to_string() })
            }
        }
    }

    #[tracing::instrument(skip(self, query), fields(%sequence_id))]
    async fn get_items(
        &self,
        sequence_id: SequenceId,
        query: ItemQuery<u64>,
    ) -> Result<Vec<SequencedItem<u64>>, StoreError> {
        let prefix = sequence_prefix(sequence_id);
        let mut matched = vec![];
        for entry in self.items.scan_prefix(prefix) {
            let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            let item = match decode_item(&bytes) {
                Ok(item) => item,
                Err(err) => {
                    tracing::warn!(%sequence_id, error = %err, "skipping item that failed to decode");
                    return Err(err);
                }
            };
            if query.gt.map_or(false, |b| item.position <= b) {
                continue;
            }
            if query.gte.map_or(false, |b| item.position < b) {
                continue;
            }
            if query.lt.map_or(false, |b| item.position >= b) {
                continue;
            }
            if query.lte.map_or(false, |b| item.position > b) {
                continue;
            }
            matched.push(item);
        }

        // scan_prefix always walks ascending; matched is already ascending here.
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

    async fn all_items(&self) -> Result<Vec<SequencedItem<u64>>, StoreError> {
        self.items
            .iter()
            .map(|entry| {
                let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
                decode_item(&bytes)
            })
            .collect()
    }

    /// Appends the whole batch inside a single sled transaction: a conflict
    /// on any item aborts the transaction, leaving the tree exactly as it
    /// was before the call.
    #[tracing::instrument(skip(self, items), fields(batch_size = items.len()))]
    async fn append_batch(&self, items: Vec<SequencedItem<u64>>) -> Result<(), StoreError> {
        let encoded = items
            .iter()
            .map(|item| {
                let key = encode_key(item.sequence_id, item.position);
                let bytes = rmp_serde::to_vec_named(item).map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok((item.sequence_id, item.position, key, bytes))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let result = self.items.transaction(|tx_tree| {
            for (sequence_id, position, key, bytes) in &encoded {
                if tx_tree.get(key)?.is_some() {
                    return Err(sled::transaction::ConflictableTransactionError::Abort(BatchConflict {
                        sequence_id: *sequence_id,
                        position: *position,
                    }));
                }
                tx_tree.insert(key.as_slice(), bytes.clone())?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                for item in items {
                    let _ = self.broadcast_tx.send(item);
                }
                Ok(())
            }
            Err(sled::transaction::TransactionError::Abort(conflict)) => {
                tracing::warn!(
                    sequence_id = %conflict.sequence_id,
                    position = conflict.position,
                    "batch append conflict: position already occupied, rejecting whole batch"
                );
                Err(StoreError::Conflict {
                    sequence_id: conflict.sequence_id,
                    position: conflict.position.to_string(),
                })
            }
            Err(sled::transaction::TransactionError::Storage(e)) => Err(StoreError::Backend(e.to_string())),
        }
    }

    #[tracing::instrument(skip(self), fields(%sequence_id, position))]
    async fn remove(&self, sequence_id: SequenceId, position: u64) -> Result<(), StoreError> {
        let key = encode_key(sequence_id, position);
        self.items.remove(key).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Carries the conflicting coordinates out of a sled transaction abort.
#[derive(Debug, Clone, Copy)]
struct BatchConflict {
    sequence_id: SequenceId,
    position: u64,
}
