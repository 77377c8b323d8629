//! Canonical structured encoding used for every persisted event payload.
//!
//! The wire form is a JSON object tree with object keys sorted
//! lexicographically and no insignificant whitespace. Four shapes carry a
//! distinguished marker key so the decoder can tell them apart from a plain
//! nested object: a timestamp, a calendar date, a UUID, and a nested
//! value-object tagged by its own topic.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Marker key for an RFC 3339 timestamp with offset.
pub const TIMESTAMP: &str = "TIMESTAMP";
/// Marker key for a calendar date (`YYYY-MM-DD`).
pub const DATE: &str = "DATE";
/// Marker key for a 128-bit UUID, encoded as 32 lowercase hex characters.
pub const UUID: &str = "UUID";
/// Marker key for a nested value object tagged with its own topic.
pub const CLASS: &str = "CLASS";

/// A codec-level value tree.
///
/// `BTreeMap` is used for [`CodecValue::Object`] so keys come out sorted for
/// free when the tree is serialized — no explicit sort step is needed at
/// encode time.
#[derive(Clone, Debug, PartialEq)]
pub enum CodecValue {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number, represented as `f64` (matches the canonical encoding's
    /// textual number grammar; integral values round-trip exactly up to
    /// 2^53).
    Number(f64),
    /// JSON string.
    String(String),
    /// JSON array.
    Array(Vec<CodecValue>),
    /// JSON object with lexicographically sorted keys.
    Object(BTreeMap<String, CodecValue>),
    /// A timestamp with timezone offset.
    Timestamp(DateTime<Utc>),
    /// A calendar date without a time component.
    Date(NaiveDate),
    /// A 128-bit UUID.
    Uuid(Uuid),
    /// A nested value object tagged by its topic, carrying its own
    /// recursively encoded attribute state.
    Class {
        /// Topic of the nested object's type.
        topic: String,
        /// Encoded attribute state of the nested object.
        state: Box<CodecValue>,
    },
}

/// Failures while encoding or decoding a [`CodecValue`] tree.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The wire text was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// A value could not be interpreted as the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl CodecValue {
    /// Serialize this value to the canonical wire form: compact JSON with
    /// object keys already in sorted order.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(&self.to_json()).expect("CodecValue always serializes")
    }

    /// Parse the canonical wire form back into a [`CodecValue`] tree.
    pub fn from_wire(text: &str) -> Result<Self, CodecError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CodecError::InvalidJson(e.to_string()))?;
        Ok(Self::from_json(value))
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            CodecValue::Null => J::Null,
            CodecValue::Bool(b) => J::Bool(*b),
            CodecValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(J::Number)
                .unwrap_or(J::Null),
            CodecValue::String(s) => J::String(s.clone()),
            CodecValue::Array(items) => J::Array(items.iter().map(CodecValue::to_json).collect()),
            CodecValue::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                J::Object(map)
            }
            CodecValue::Timestamp(ts) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    TIMESTAMP.to_string(),
                    J::String(ts.format("%Y-%m-%dT%H:%M:%S%.6f%z").to_string()),
                );
                J::Object(map)
            }
            CodecValue::Date(date) => {
                let mut map = serde_json::Map::new();
                map.insert(DATE.to_string(), J::String(date.format("%Y-%m-%d").to_string()));
                J::Object(map)
            }
            CodecValue::Uuid(id) => {
                let mut map = serde_json::Map::new();
                map.insert(UUID.to_string(), J::String(id.simple().to_string()));
                J::Object(map)
            }
            CodecValue::Class { topic, state } => {
                let mut inner = serde_json::Map::new();
                inner.insert("topic".to_string(), J::String(topic.clone()));
                inner.insert("state".to_string(), state.to_json());
                let mut map = serde_json::Map::new();
                map.insert(CLASS.to_string(), J::Object(inner));
                J::Object(map)
            }
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Null => CodecValue::Null,
            J::Bool(b) => CodecValue::Bool(b),
            J::Number(n) => CodecValue::Number(n.as_f64().unwrap_or_default()),
            J::String(s) => CodecValue::String(s),
            J::Array(items) => CodecValue::Array(items.into_iter().map(CodecValue::from_json).collect()),
            J::Object(map) => Self::from_marked_object(map),
        }
    }

    fn from_marked_object(map: serde_json::Map<String, serde_json::Value>) -> Self {
        if map.len() == 1 {
            if let Some(J::String(text)) = map.get(TIMESTAMP) {
                if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
                    return CodecValue::Timestamp(ts.with_timezone(&Utc));
                }
            }
            if let Some(J::String(text)) = map.get(DATE) {
                if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                    return CodecValue::Date(date);
                }
            }
            if let Some(J::String(text)) = map.get(UUID) {
                if let Ok(id) = Uuid::parse_str(text) {
                    return CodecValue::Uuid(id);
                }
            }
            if let Some(J::Object(inner)) = map.get(CLASS) {
                if let (Some(J::String(topic)), Some(state)) =
                    (inner.get("topic"), inner.get("state"))
                {
                    return CodecValue::Class {
                        topic: topic.clone(),
                        state: Box::new(CodecValue::from_json(state.clone())),
                    };
                }
            }
        }
        let mut fields = BTreeMap::new();
        for (k, v) in map {
            fields.insert(k, CodecValue::from_json(v));
        }
        CodecValue::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn object_keys_are_sorted_on_the_wire() {
        let mut fields = BTreeMap::new();
        fields.insert("zeta".to_string(), CodecValue::Number(1.0));
        fields.insert("alpha".to_string(), CodecValue::Number(2.0));
        let value = CodecValue::Object(fields);

        assert_eq!(value.to_wire(), r#"{"alpha":2.0,"zeta":1.0}"#);
    }

    #[test]
    fn wire_form_has_no_insignificant_whitespace() {
        let value = CodecValue::Array(vec![CodecValue::Number(1.0), CodecValue::Number(2.0)]);
        assert_eq!(value.to_wire(), "[1.0,2.0]");
    }

    #[test]
    fn timestamp_round_trips_through_the_marker() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap();
        let value = CodecValue::Timestamp(ts);
        let wire = value.to_wire();
        assert!(wire.contains(TIMESTAMP));

        let decoded = CodecValue::from_wire(&wire).unwrap();
        assert_eq!(decoded, CodecValue::Timestamp(ts));
    }

    #[test]
    fn uuid_round_trips_through_the_marker() {
        let id = Uuid::new_v4();
        let value = CodecValue::Uuid(id);
        let decoded = CodecValue::from_wire(&value.to_wire()).unwrap();
        assert_eq!(decoded, CodecValue::Uuid(id));
    }

    #[test]
    fn nested_class_round_trips() {
        let mut inner = BTreeMap::new();
        inner.insert("amount".to_string(), CodecValue::Number(5.0));
        let value = CodecValue::Class {
            topic: "money.Amount".to_string(),
            state: Box::new(CodecValue::Object(inner)),
        };

        let decoded = CodecValue::from_wire(&value.to_wire()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn a_plain_object_that_happens_to_share_a_marker_key_name_is_still_an_object() {
        let mut fields = BTreeMap::new();
        fields.insert("UUID".to_string(), CodecValue::Number(1.0));
        fields.insert("extra".to_string(), CodecValue::Bool(true));
        let value = CodecValue::Object(fields.clone());

        let decoded = CodecValue::from_wire(&value.to_wire()).unwrap();
        assert_eq!(decoded, CodecValue::Object(fields));
    }
}
