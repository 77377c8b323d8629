#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sourced-policy** – In-process publish/subscribe bus and the
//! persistence policy that rides on top of it.
//!
//! The bus delivers events synchronously and in publish order (see
//! [`bus::DomainEventBus`]); [`policy::PersistencePolicy`] is the one
//! standard subscriber this crate ships, routing each published event into
//! whichever [`sourced_core::EventStore`] matches its position flavor.

pub mod bus;
pub mod error;
pub mod policy;

pub use bus::{DomainEventBus, PublishedEvent, Subscriber, SubscriberFuture, SubscriptionId};
pub use error::PolicyError;
pub use policy::PersistencePolicy;
