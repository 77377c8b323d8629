//! Error taxonomy shared by the storage and transcoding layers.

use crate::topic::TopicResolutionError;
use crate::{cipher::CipherError, codec::CodecError};

/// Errors raised by an [`ActiveRecordStrategy`](crate::strategy::ActiveRecordStrategy)
/// or by the [`EventStore`](crate::store::EventStore) facade built on top of one.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Append was attempted at a `(sequence_id, position)` pair that already exists.
    #[error("sequenced item conflict at position {position} of sequence {sequence_id}")]
    Conflict {
        /// Sequence the conflicting append targeted.
        sequence_id: uuid::Uuid,
        /// Position already occupied.
        position: String,
    },
    /// A point read found no item at the requested coordinates.
    #[error("no item at position {position} of sequence {sequence_id}")]
    NotFound {
        /// Sequence that was queried.
        sequence_id: uuid::Uuid,
        /// Position that was queried.
        position: String,
    },
    /// The event could not be mapped to or from a sequenced item.
    #[error(transparent)]
    Mapper(#[from] MapperError),
    /// The underlying backend failed for a reason specific to that backend.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors raised while transcoding a domain event to or from a [`SequencedItem`](crate::SequencedItem).
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// The item's topic does not resolve to any registered event descriptor.
    #[error(transparent)]
    Topic(#[from] TopicResolutionError),
    /// The payload could not be encoded or decoded under the canonical codec.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The cipher failed to encrypt or authenticate-and-decrypt the payload.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}
