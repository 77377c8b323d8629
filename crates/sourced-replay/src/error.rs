//! Error taxonomy for the replay engine.

/// Failures that can occur while snapshotting or replaying an entity.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The backing event store or snapshot strategy failed.
    #[error(transparent)]
    Store(#[from] sourced_core::StoreError),
    /// A decoded snapshot did not downcast to the state type the player was
    /// asked to reconstruct — the snapshot stream was registered with the
    /// wrong event type for this entity.
    #[error("snapshot for entity did not decode to the expected state type")]
    SnapshotTypeMismatch,
}
