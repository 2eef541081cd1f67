use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a message sits in the broker: topic, partition and offset.
///
/// Offsets are monotonically increasing per partition. The position is the
/// message identity used for attempt tracking and progress commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

impl MessagePosition {
    pub fn new(topic: impl Into<String>, partition: u32, offset: u64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// String headers attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A record handed to [`crate::Broker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// A message as delivered by the broker.
///
/// Notes:
/// - Immutable once received; processing units only borrow it.
/// - `payload` is opaque here. Decoding is up to the processing callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    position: MessagePosition,
    key: Option<String>,
    payload: Vec<u8>,
    headers: Headers,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        position: MessagePosition,
        key: Option<String>,
        payload: impl Into<Vec<u8>>,
        headers: Headers,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position,
            key,
            payload: payload.into(),
            headers,
            timestamp,
        }
    }

    /// Materialize a published record at the position the broker assigned it.
    pub fn from_record(record: OutboundRecord, partition: u32, offset: u64) -> Self {
        Self {
            position: MessagePosition::new(record.topic, partition, offset),
            key: record.key,
            payload: record.payload,
            headers: record.headers,
            timestamp: Utc::now(),
        }
    }

    pub fn position(&self) -> &MessagePosition {
        &self.position
    }

    pub fn topic(&self) -> &str {
        &self.position.topic
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, with invalid UTF-8 replaced. Meant for logs and simple handlers.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_display_is_compact() {
        let pos = MessagePosition::new("orders-topic", 2, 17);
        assert_eq!(pos.to_string(), "orders-topic/2@17");
    }

    #[test]
    fn record_fields_carry_into_message() {
        let record = OutboundRecord::new("orders-topic", b"hello".to_vec())
            .with_key("o-1")
            .with_headers(Headers::new().with("trace", "abc"));

        let msg = Message::from_record(record, 1, 9);

        assert_eq!(msg.position(), &MessagePosition::new("orders-topic", 1, 9));
        assert_eq!(msg.key(), Some("o-1"));
        assert_eq!(msg.payload_str(), "hello");
        assert_eq!(msg.headers().get("trace"), Some("abc"));
    }

    #[test]
    fn headers_serialize_as_a_flat_object() {
        let headers = Headers::new().with("b", "2").with("a", "1");
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }
}
