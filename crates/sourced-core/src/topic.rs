//! Topic registry: a bidirectional map between a stable type name and the
//! machinery needed to decode that type back out of the canonical codec.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::codec::CodecValue;

/// A type-erased, decoded event value produced by an [`EventDescriptor`]'s
/// factory. Callers downcast it back to the concrete event type they expect.
pub type DecodedEvent = Box<dyn Any + Send + Sync>;

/// Failure to resolve a topic string to a registered [`EventDescriptor`].
#[derive(Debug, thiserror::Error)]
#[error("unresolvable topic: {0}")]
pub struct TopicResolutionError(pub String);

/// Everything the mapper needs to know about one registered event type.
pub struct EventDescriptor {
    topic: String,
    always_encrypt: bool,
    factory: Box<dyn Fn(CodecValue) -> Result<DecodedEvent, crate::codec::CodecError> + Send + Sync>,
}

impl fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("topic", &self.topic)
            .field("always_encrypt", &self.always_encrypt)
            .finish()
    }
}

impl EventDescriptor {
    /// Describe a registered event type.
    ///
    /// `factory` decodes the attribute tree produced by the structured codec
    /// back into a boxed instance of `T`, without ever running `T`'s own
    /// constructor — it populates the value directly from the decoded state,
    /// mirroring the replay contract that no user-level constructor observes
    /// a reconstructed event.
    pub fn new<T, F>(topic: impl Into<String>, always_encrypt: bool, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(CodecValue) -> Result<T, crate::codec::CodecError> + Send + Sync + 'static,
    {
        Self {
            topic: topic.into(),
            always_encrypt,
            factory: Box::new(move |value| factory(value).map(|t| Box::new(t) as DecodedEvent)),
        }
    }

    /// The topic this descriptor is registered under.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether this event type is always encrypted regardless of the
    /// mapper's own `always_encrypt` switch.
    pub fn always_encrypt(&self) -> bool {
        self.always_encrypt
    }

    /// Decode a value tree into a boxed, type-erased event instance.
    pub fn decode(&self, value: CodecValue) -> Result<DecodedEvent, crate::codec::CodecError> {
        (self.factory)(value)
    }
}

/// Process-wide bidirectional mapping from topic string to [`EventDescriptor`].
///
/// Registration is explicit: a type only becomes resolvable once
/// [`TopicRegistry::register`] has been called for it. There is no
/// import-time side effect that populates the registry implicitly.
#[derive(Default)]
pub struct TopicRegistry {
    descriptors: HashMap<String, EventDescriptor>,
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.descriptors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an [`EventDescriptor`] under its own topic.
    ///
    /// Re-registering the same topic overwrites the previous descriptor;
    /// callers are expected to register each topic once at process start.
    pub fn register(&mut self, descriptor: EventDescriptor) {
        self.descriptors.insert(descriptor.topic().to_string(), descriptor);
    }

    /// Resolve a topic string to its descriptor.
    pub fn resolve(&self, topic: &str) -> Result<&EventDescriptor, TopicResolutionError> {
        self.descriptors
            .get(topic)
            .ok_or_else(|| TopicResolutionError(topic.to_string()))
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry has no registered topics.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
