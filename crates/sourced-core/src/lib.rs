#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sourced-core** – Core abstractions for the sequenced-item event log.
//!
//! This crate provides the fundamental traits and value types shared by every
//! storage driver and by the higher-level event store and replay machinery.
//! It defines the contracts for event persistence without providing a
//! concrete backend — storage drivers (in-memory, sled, ...) implement the
//! [`ActiveRecordStrategy`] trait in separate crates that depend on this one.

pub mod cipher;
pub mod codec;
pub mod error;
pub mod iterator;
pub mod mapper;
pub mod store;
pub mod strategy;
pub mod topic;

pub use cipher::{Cipher, CipherError};
pub use codec::{CodecError, CodecValue};
pub use error::{MapperError, StoreError};
pub use iterator::{IteratorKind, PagedIterator};
pub use mapper::{EventDescriptor, SequencedItemMapper};
pub use store::EventStore;
pub use strategy::{ActiveRecordStrategy, ItemQuery};
pub use topic::{TopicRegistry, TopicResolutionError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a sequence: the event history of one entity.
pub type SequenceId = Uuid;

/// An immutable row of the sequenced-item log.
///
/// `(sequence_id, position)` is unique within a single
/// [`ActiveRecordStrategy`]; the pair is the log's only notion of identity.
/// `Position` is generic so the same type serves integer-version-sequenced
/// and timestamp-sequenced logs alike (see [`strategy`] for the two
/// concrete flavors used by this workspace).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SequencedItem<Position> {
    /// Sequence this item belongs to.
    pub sequence_id: SequenceId,
    /// Ordering key within the sequence.
    pub position: Position,
    /// Fully qualified topic of the original event type.
    pub topic: String,
    /// Opaque payload: the canonical encoding, possibly ciphertext.
    pub data: Vec<u8>,
}

/// Monotonic integer position, typically an entity version counter.
pub type IntegerPosition = u64;

/// Sub-microsecond timestamp position, seconds since the Unix epoch.
///
/// A thin wrapper around `f64` that restores `Eq`/`Ord` for use as a
/// [`SequencedItem`] position. Wall-clock timestamps are never `NaN`, so the
/// comparison never hits the one case `f64`'s `PartialOrd` leaves undefined.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct TimestampPosition(pub f64);

impl Eq for TimestampPosition {}

impl Ord for TimestampPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).expect("timestamp position must not be NaN")
    }
}

impl From<f64> for TimestampPosition {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequenced_item_is_plain_data() {
        let item = SequencedItem {
            sequence_id: Uuid::new_v4(),
            position: 0u64,
            topic: "orders.Placed".to_string(),
            data: vec![1, 2, 3],
        };
        assert_eq!(item.position, 0);
        assert_eq!(item.topic, "orders.Placed");
    }
}
