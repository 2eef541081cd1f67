use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use orderstream_events::{Broker, BrokerError, MessagePosition};

use super::record::DeadLetterRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("publishing to dead-letter topic {topic} failed: {source}")]
pub struct PublishError {
    pub topic: String,
    #[source]
    pub source: BrokerError,
}

/// How hard to try before giving up on a dead-letter publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Total publish attempts, at least 1.
    pub publish_attempts: u32,
    /// Pause between publish attempts.
    pub publish_backoff: Duration,
}

impl Default for DeadLetterPolicy {
    fn default() -> Self {
        Self {
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(1000),
        }
    }
}

/// Publishes exhausted messages to `<topic>.DLT`.
///
/// Shared by every processing unit. The publisher does not retry: failures go
/// back to the caller, which owns the retry decision.
#[derive(Debug)]
pub struct DeadLetterPublisher<B: ?Sized> {
    broker: Arc<B>,
}

impl<B: ?Sized> Clone for DeadLetterPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
        }
    }
}

impl<B> DeadLetterPublisher<B>
where
    B: Broker + ?Sized,
{
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    #[instrument(
        skip(self, record),
        fields(
            original = %record.original().position(),
            attempts = record.attempts(),
        ),
        err
    )]
    pub fn publish(&self, record: &DeadLetterRecord) -> Result<MessagePosition, PublishError> {
        let outbound = record.to_outbound();
        let topic = outbound.topic.clone();

        let position = self
            .broker
            .publish(outbound)
            .map_err(|source| PublishError { topic, source })?;

        warn!(
            dead_letter = %position,
            cause = %record.cause(),
            "message sent to dead-letter topic"
        );
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orderstream_events::{Headers, InMemoryBroker, Message, OutboundRecord, Subscription};

    use super::*;
    use crate::retry::ProcessingFailure;

    struct DownBroker;

    impl Broker for DownBroker {
        fn publish(&self, _: OutboundRecord) -> Result<MessagePosition, BrokerError> {
            Err(BrokerError::Connection("connection refused".into()))
        }
        fn partitions(&self, _: &str) -> Result<u32, BrokerError> {
            Ok(1)
        }
        fn subscribe(&self, _: &str, _: &str, _: u32) -> Result<Subscription, BrokerError> {
            Err(BrokerError::Connection("connection refused".into()))
        }
        fn commit(&self, _: &str, _: &MessagePosition) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn record() -> DeadLetterRecord {
        let now = Utc::now();
        let msg = Message::new(
            MessagePosition::new("orders-topic", 0, 3),
            None,
            b"fail".to_vec(),
            Headers::new(),
            now,
        );
        DeadLetterRecord::new(msg, ProcessingFailure::transient("boom"), 4, now, now)
    }

    #[test]
    fn publishes_to_derived_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = DeadLetterPublisher::new(broker.clone());

        let position = publisher.publish(&record()).unwrap();

        assert_eq!(position.topic, "orders-topic.DLT");
        let stored = broker.records("orders-topic.DLT");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload(), b"fail");
    }

    #[test]
    fn broker_failure_is_surfaced_not_swallowed() {
        let publisher = DeadLetterPublisher::new(Arc::new(DownBroker));

        let err = publisher.publish(&record()).unwrap_err();

        assert_eq!(err.topic, "orders-topic.DLT");
        assert!(matches!(err.source, BrokerError::Connection(_)));
    }
}
