//! Broker messages.
//!
//! A [`Message`] is the unit the consumption engine pulls from a
//! [`MessageSource`](crate::source::MessageSource) and hands to every
//! subscriber. The engine never looks inside `value`; subscribers decide how
//! to decode it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;

/// A record read from (or written to) a Kafka-compatible broker.
///
/// `topic`, `partition` and `offset` are assigned by the broker on read. For
/// messages built locally for publishing they are left at their defaults and
/// the sink decides where the record goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message key, used by the broker for partitioning
    pub key: Vec<u8>,
    /// Message payload
    pub value: Vec<u8>,
    /// Topic the message was read from
    pub topic: String,
    /// Partition the message was read from (`-1` when unknown)
    pub partition: i32,
    /// Offset within the partition (`-1` when unknown)
    pub offset: i64,
    /// Broker timestamp in milliseconds since the epoch, if any
    pub timestamp: Option<i64>,
}

impl Message {
    /// Create a message with a key and a payload and no position metadata.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            topic: String::new(),
            partition: -1,
            offset: -1,
            timestamp: None,
        }
    }

    /// Create a message whose payload is the JSON encoding of `data`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `data` cannot be encoded as JSON.
    pub fn json<T: Serialize + ?Sized>(key: &str, data: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_vec(data)?;
        Ok(Self::new(key.as_bytes(), value))
    }

    /// Attach broker position metadata.
    #[must_use]
    pub fn with_position(mut self, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        self.topic = topic.into();
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// The key as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error if the payload is not valid JSON for `T`.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Booked {
        #[serde(rename = "UserId")]
        user_id: String,
    }

    #[test]
    fn json_message_carries_key_and_payload() {
        let msg = Message::json("user-1", &Booked { user_id: "u1".into() }).unwrap();

        assert_eq!(msg.key_str(), "user-1");
        assert_eq!(msg.value, br#"{"UserId":"u1"}"#.to_vec());
        assert_eq!(msg.partition, -1);
        assert_eq!(msg.offset, -1);
    }

    #[test]
    fn decode_json_rejects_garbage() {
        let msg = Message::new("k", "not json");
        assert!(msg.decode_json::<Booked>().is_err());
    }

    #[test]
    fn key_str_is_lossy() {
        let msg = Message::new(vec![0xff, b'a'], Vec::new());
        assert_eq!(msg.key_str(), "\u{fffd}a");
    }
}
