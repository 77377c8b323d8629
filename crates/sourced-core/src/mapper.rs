//! Sequenced-item mapper: the transcoding boundary between live domain
//! events and the opaque [`SequencedItem`] rows the log actually stores.

pub use crate::topic::EventDescriptor;

use std::sync::Arc;

use crate::cipher::Cipher;
use crate::codec::CodecValue;
use crate::error::MapperError;
use crate::topic::{DecodedEvent, TopicRegistry};
use crate::SequencedItem;

/// A domain event that knows how to describe its own sequencing
/// coordinates and attribute state.
///
/// `Position` is the store's position flavor (see
/// [`crate::IntegerPosition`] / [`crate::TimestampPosition`]); the same
/// event type is never mapped into both flavors of store.
pub trait MappedEvent<Position>: Send + Sync {
    /// Sequence (entity) this event belongs to.
    fn sequence_id(&self) -> crate::SequenceId;
    /// Ordering position of this event within its sequence.
    fn position(&self) -> Position;
    /// Topic this event is registered under.
    fn topic(&self) -> &str;
    /// Encode this event's attribute state as a codec value tree.
    fn to_state(&self) -> CodecValue;
}

/// Converts domain events to and from [`SequencedItem`]s using the
/// structured codec, the topic registry, and an optional cipher.
pub struct SequencedItemMapper<Position> {
    registry: Arc<TopicRegistry>,
    cipher: Option<Arc<dyn Cipher>>,
    always_encrypt: bool,
    _position: std::marker::PhantomData<fn() -> Position>,
}

// Manual impl: `Position` never appears outside a `PhantomData<fn() -> Position>`,
// so cloning a mapper never actually requires `Position: Clone`.
impl<Position> Clone for SequencedItemMapper<Position> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            cipher: self.cipher.clone(),
            always_encrypt: self.always_encrypt,
            _position: std::marker::PhantomData,
        }
    }
}

impl<Position> SequencedItemMapper<Position> {
    /// Build a mapper over a shared topic registry.
    ///
    /// `always_encrypt` is the mapper-wide default; an individual event
    /// type can still force encryption via its own
    /// [`EventDescriptor::always_encrypt`] flag even when this is `false`.
    pub fn new(registry: Arc<TopicRegistry>, always_encrypt: bool, cipher: Option<Arc<dyn Cipher>>) -> Self {
        Self {
            registry,
            cipher,
            always_encrypt,
            _position: std::marker::PhantomData,
        }
    }

    /// Map a live event to a [`SequencedItem`] ready for the active-record
    /// strategy.
    pub fn to_item<E: MappedEvent<Position> + ?Sized>(&self, event: &E) -> Result<SequencedItem<Position>, MapperError> {
        let topic = event.topic().to_string();
        let type_forces_encryption = self
            .registry
            .resolve(&topic)
            .map(|d| d.always_encrypt())
            .unwrap_or(false);

        let wire = event.to_state().to_wire();
        let data = if self.always_encrypt || type_forces_encryption {
            let cipher = self.cipher.as_deref().expect("always_encrypt requires a cipher");
            cipher.encrypt(wire.as_bytes())
        } else {
            wire.into_bytes()
        };

        Ok(SequencedItem {
            sequence_id: event.sequence_id(),
            position: event.position(),
            topic,
            data,
        })
    }

    /// Map a [`SequencedItem`] back to a type-erased event instance.
    ///
    /// The caller downcasts the returned [`DecodedEvent`] to the concrete
    /// type it expects; the factory registered on the resolved
    /// [`EventDescriptor`] is the only code that runs, never the event
    /// type's own constructor.
    pub fn from_item(&self, item: &SequencedItem<Position>) -> Result<DecodedEvent, MapperError> {
        let descriptor = self.registry.resolve(&item.topic).map_err(|err| {
            tracing::debug!(topic = %item.topic, "topic not registered, cannot decode item");
            err
        })?;

        let plaintext = if self.always_encrypt || descriptor.always_encrypt() {
            let cipher = self.cipher.as_deref().expect("always_encrypt requires a cipher");
            cipher.decrypt(&item.data)?
        } else {
            item.data.clone()
        };

        let text = String::from_utf8(plaintext)
            .map_err(|_| crate::codec::CodecError::Malformed("payload is not valid UTF-8".into()))?;
        let value = CodecValue::from_wire(&text)?;
        Ok(descriptor.decode(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::SecretboxCipher;
    use crate::codec::CodecValue;
    use crate::topic::EventDescriptor;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[derive(Debug, PartialEq)]
    struct Placed {
        sequence_id: Uuid,
        version: u64,
        quantity: i64,
    }

    impl MappedEvent<u64> for Placed {
        fn sequence_id(&self) -> Uuid {
            self.sequence_id
        }
        fn position(&self) -> u64 {
            self.version
        }
        fn topic(&self) -> &str {
            "orders.Placed"
        }
        fn to_state(&self) -> CodecValue {
            let mut fields = BTreeMap::new();
            fields.insert("quantity".to_string(), CodecValue::Number(self.quantity as f64));
            CodecValue::Object(fields)
        }
    }

    fn descriptor(always_encrypt: bool) -> EventDescriptor {
        EventDescriptor::new("orders.Placed", always_encrypt, |value| match value {
            CodecValue::Object(mut fields) => {
                let quantity = match fields.remove("quantity") {
                    Some(CodecValue::Number(n)) => n as i64,
                    _ => return Err(crate::codec::CodecError::Malformed("missing quantity".into())),
                };
                Ok(Placed {
                    sequence_id: Uuid::nil(),
                    version: 0,
                    quantity,
                })
            }
            _ => Err(crate::codec::CodecError::Malformed("expected object".into())),
        })
    }

    #[test]
    fn round_trips_without_encryption() {
        let mut registry = TopicRegistry::new();
        registry.register(descriptor(false));
        let mapper: SequencedItemMapper<u64> = SequencedItemMapper::new(Arc::new(registry), false, None);

        let event = Placed {
            sequence_id: Uuid::new_v4(),
            version: 3,
            quantity: 9,
        };
        let item = mapper.to_item(&event).unwrap();
        assert_eq!(item.position, 3);
        assert_eq!(String::from_utf8(item.data.clone()).unwrap(), r#"{"quantity":9.0}"#);

        let decoded = mapper.from_item(&item).unwrap();
        let placed = decoded.downcast_ref::<Placed>().unwrap();
        assert_eq!(placed.quantity, 9);
    }

    #[test]
    fn type_level_always_encrypt_overrides_mapper_default() {
        let mut registry = TopicRegistry::new();
        registry.register(descriptor(true));
        let cipher = Arc::new(SecretboxCipher::generate());
        let mapper: SequencedItemMapper<u64> =
            SequencedItemMapper::new(Arc::new(registry), false, Some(cipher));

        let event = Placed {
            sequence_id: Uuid::new_v4(),
            version: 0,
            quantity: 5,
        };
        let item = mapper.to_item(&event).unwrap();
        assert_ne!(item.data, br#"{"quantity":5.0}"#.to_vec());

        let decoded = mapper.from_item(&item).unwrap();
        assert_eq!(decoded.downcast_ref::<Placed>().unwrap().quantity, 5);
    }

    #[test]
    fn unresolvable_topic_is_a_hard_error() {
        let registry = TopicRegistry::new();
        let mapper: SequencedItemMapper<u64> = SequencedItemMapper::new(Arc::new(registry), false, None);

        let item = SequencedItem {
            sequence_id: Uuid::new_v4(),
            position: 0u64,
            topic: "orders.Placed".to_string(),
            data: br#"{}"#.to_vec(),
        };
        assert!(mapper.from_item(&item).is_err());
    }
}
