#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sourced-replay** – Snapshot strategy and event player: the replay
//! engine that turns a sequenced-item history back into application state.
//!
//! Two pieces, usable independently:
//!
//! * [`snapshot`] stores point-in-time entity snapshots as ordinary
//!   sequenced items in their own parallel stream.
//! * [`player`] folds a window of an entity's events into state, optionally
//!   fast-forwarding from the most recent usable snapshot.

pub mod error;
pub mod player;
pub mod snapshot;

pub use error::ReplayError;
pub use player::{EventPlayer, MutateFn};
pub use snapshot::{NilSnapshotStrategy, Snapshot, SnapshotStrategy};
