//! Error taxonomy for the persistence policy.

/// Failures that can occur while routing a published event into its store.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The backing event store rejected the append.
    #[error(transparent)]
    Store(#[from] sourced_core::StoreError),
}
