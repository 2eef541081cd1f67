//! Dead-letter records and their wire encoding.
//!
//! A dead-lettered message keeps the original payload bytes and key untouched.
//! Failure metadata travels in headers (names in [`headers`]), so any consumer
//! of `<topic>.DLT` can read it without knowing the payload format.

use chrono::{DateTime, Utc};
use serde::Serialize;

use orderstream_events::{Message, MessagePosition, OutboundRecord};

use crate::retry::{AttemptHistory, ProcessingFailure};

/// Suffix appended to the source topic to name its dead-letter topic.
pub const DLT_SUFFIX: &str = ".DLT";

/// Header names of the dead-letter wire contract.
pub mod headers {
    pub const EXCEPTION_KIND: &str = "dlt-exception-kind";
    pub const EXCEPTION_MESSAGE: &str = "dlt-exception-message";
    pub const ATTEMPTS: &str = "dlt-attempts";
    pub const FIRST_FAILURE_MS: &str = "dlt-first-failure-ms";
    pub const LAST_FAILURE_MS: &str = "dlt-last-failure-ms";
    pub const ORIGINAL_TOPIC: &str = "dlt-original-topic";
    pub const ORIGINAL_PARTITION: &str = "dlt-original-partition";
    pub const ORIGINAL_OFFSET: &str = "dlt-original-offset";
}

/// `orders-topic` → `orders-topic.DLT`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DLT_SUFFIX}")
}

/// A message that exhausted its retries, plus why and when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    original: Message,
    cause: ProcessingFailure,
    attempts: u32,
    first_failure_at: DateTime<Utc>,
    last_failure_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        original: Message,
        cause: ProcessingFailure,
        attempts: u32,
        first_failure_at: DateTime<Utc>,
        last_failure_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original,
            cause,
            attempts,
            first_failure_at,
            last_failure_at,
        }
    }

    /// Fold an exhausted attempt history into a record.
    pub fn from_history(original: Message, history: &AttemptHistory) -> Self {
        let now = Utc::now();
        let cause = history
            .last_error()
            .cloned()
            .unwrap_or_else(|| ProcessingFailure::transient("no failure recorded"));

        Self {
            original,
            cause,
            attempts: history.len(),
            first_failure_at: history.first_failure_at().unwrap_or(now),
            last_failure_at: history.last_failure_at().unwrap_or(now),
        }
    }

    pub fn original(&self) -> &Message {
        &self.original
    }

    pub fn cause(&self) -> &ProcessingFailure {
        &self.cause
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn first_failure_at(&self) -> DateTime<Utc> {
        self.first_failure_at
    }

    pub fn last_failure_at(&self) -> DateTime<Utc> {
        self.last_failure_at
    }

    pub fn topic(&self) -> String {
        dead_letter_topic(self.original.topic())
    }

    /// Encode for publishing: original payload, key and headers, plus failure headers.
    pub fn to_outbound(&self) -> OutboundRecord {
        let position = self.original.position();
        let mut hdrs = self.original.headers().clone();
        hdrs.insert(headers::EXCEPTION_KIND, self.cause.kind());
        hdrs.insert(headers::EXCEPTION_MESSAGE, self.cause.message());
        hdrs.insert(headers::ATTEMPTS, self.attempts.to_string());
        hdrs.insert(
            headers::FIRST_FAILURE_MS,
            self.first_failure_at.timestamp_millis().to_string(),
        );
        hdrs.insert(
            headers::LAST_FAILURE_MS,
            self.last_failure_at.timestamp_millis().to_string(),
        );
        hdrs.insert(headers::ORIGINAL_TOPIC, position.topic.as_str());
        hdrs.insert(headers::ORIGINAL_PARTITION, position.partition.to_string());
        hdrs.insert(headers::ORIGINAL_OFFSET, position.offset.to_string());

        let mut record = OutboundRecord::new(self.topic(), self.original.payload().to_vec())
            .with_headers(hdrs);
        record.key = self.original.key().map(str::to_string);
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("header {name} has invalid value {value:?}")]
    InvalidHeader { name: &'static str, value: String },
}

/// What the dead-letter observer knows about one dead-lettered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterReport {
    pub dead_letter_position: MessagePosition,
    pub original_position: MessagePosition,
    pub key: Option<String>,
    pub payload: String,
    pub cause_kind: String,
    pub cause_message: String,
    pub attempts: u32,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
}

impl DeadLetterReport {
    /// Decode a message read from a dead-letter topic.
    pub fn decode(message: &Message) -> Result<Self, DecodeError> {
        let hdrs = message.headers();
        let text = |name: &'static str| hdrs.get(name).ok_or(DecodeError::MissingHeader(name));

        Ok(Self {
            dead_letter_position: message.position().clone(),
            original_position: MessagePosition::new(
                text(headers::ORIGINAL_TOPIC)?,
                parse(headers::ORIGINAL_PARTITION, text(headers::ORIGINAL_PARTITION)?)?,
                parse(headers::ORIGINAL_OFFSET, text(headers::ORIGINAL_OFFSET)?)?,
            ),
            key: message.key().map(str::to_string),
            payload: message.payload_str().into_owned(),
            cause_kind: text(headers::EXCEPTION_KIND)?.to_string(),
            cause_message: text(headers::EXCEPTION_MESSAGE)?.to_string(),
            attempts: parse(headers::ATTEMPTS, text(headers::ATTEMPTS)?)?,
            first_failure_at: parse_millis(
                headers::FIRST_FAILURE_MS,
                text(headers::FIRST_FAILURE_MS)?,
            )?,
            last_failure_at: parse_millis(
                headers::LAST_FAILURE_MS,
                text(headers::LAST_FAILURE_MS)?,
            )?,
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidHeader {
        name,
        value: value.to_string(),
    })
}

fn parse_millis(name: &'static str, value: &str) -> Result<DateTime<Utc>, DecodeError> {
    let millis: i64 = parse(name, value)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| DecodeError::InvalidHeader {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use orderstream_events::Headers;

    use super::*;

    fn original() -> Message {
        Message::new(
            MessagePosition::new("orders-topic", 1, 42),
            Some("o-9".into()),
            b"{\"id\":\"o-9\",\"product\":\"fail\"}".to_vec(),
            Headers::new().with("trace-id", "t-1"),
            Utc::now(),
        )
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn record() -> DeadLetterRecord {
        DeadLetterRecord::new(
            original(),
            ProcessingFailure::new("ForcedFailure", "Force failure for retry!"),
            4,
            at(1_700_000_000_000),
            at(1_700_000_015_000),
        )
    }

    #[test]
    fn dead_letter_topic_appends_suffix() {
        assert_eq!(dead_letter_topic("orders-topic"), "orders-topic.DLT");
    }

    #[test]
    fn outbound_keeps_payload_and_key() {
        let out = record().to_outbound();
        assert_eq!(out.topic, "orders-topic.DLT");
        assert_eq!(out.key.as_deref(), Some("o-9"));
        assert_eq!(out.payload, original().payload());
    }

    #[test]
    fn outbound_headers_follow_wire_contract() {
        let out = record().to_outbound();
        let h = &out.headers;
        assert_eq!(h.get(headers::EXCEPTION_KIND), Some("ForcedFailure"));
        assert_eq!(h.get(headers::EXCEPTION_MESSAGE), Some("Force failure for retry!"));
        assert_eq!(h.get(headers::ATTEMPTS), Some("4"));
        assert_eq!(h.get(headers::FIRST_FAILURE_MS), Some("1700000000000"));
        assert_eq!(h.get(headers::LAST_FAILURE_MS), Some("1700000015000"));
        assert_eq!(h.get(headers::ORIGINAL_TOPIC), Some("orders-topic"));
        assert_eq!(h.get(headers::ORIGINAL_PARTITION), Some("1"));
        assert_eq!(h.get(headers::ORIGINAL_OFFSET), Some("42"));
        assert_eq!(h.get("trace-id"), Some("t-1"));
    }

    #[test]
    fn report_decodes_published_record() {
        let out = record().to_outbound();
        let delivered = Message::from_record(out, 0, 7);

        let report = DeadLetterReport::decode(&delivered).unwrap();

        assert_eq!(report.dead_letter_position, MessagePosition::new("orders-topic.DLT", 0, 7));
        assert_eq!(report.original_position, MessagePosition::new("orders-topic", 1, 42));
        assert_eq!(report.attempts, 4);
        assert_eq!(report.cause_kind, "ForcedFailure");
        assert_eq!(report.first_failure_at, at(1_700_000_000_000));
        assert_eq!(report.last_failure_at, at(1_700_000_015_000));
        assert!(report.payload.contains("fail"));
    }

    #[test]
    fn report_rejects_plain_messages() {
        let err = DeadLetterReport::decode(&original()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingHeader(_)));
    }

    #[test]
    fn report_rejects_garbage_counts() {
        let mut out = record().to_outbound();
        out.headers.insert(headers::ATTEMPTS, "many");
        let err = DeadLetterReport::decode(&Message::from_record(out, 0, 0)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidHeader {
                name: headers::ATTEMPTS,
                value: "many".into()
            }
        );
    }

    #[test]
    fn record_from_history_uses_last_error_and_full_count() {
        let mut tracker = crate::retry::DeliveryAttemptTracker::new();
        let msg = original();
        tracker.record_failure(msg.position(), ProcessingFailure::transient("one"));
        tracker.record_failure(msg.position(), ProcessingFailure::transient("two"));
        let history = tracker.mark_exhausted(msg.position());

        let record = DeadLetterRecord::from_history(msg, &history);

        assert_eq!(record.attempts(), 2);
        assert_eq!(record.cause().message(), "two");
        assert!(record.first_failure_at() <= record.last_failure_at());
    }
}
