//! Consumers that run alongside the HTTP producer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use orderstream_core::Order;
use orderstream_events::{Broker, Message};
use orderstream_infra::dead_letter::{DeadLetterObserver, LoggingSink};
use orderstream_infra::retry::{ProcessingCallback, ProcessingFailure};
use orderstream_infra::workers::WorkerExit;
use orderstream_infra::{PipelineConfig, PipelineError, PipelineHandle, RetryPipeline};

/// Processing callback for the orders topic.
///
/// Any payload containing `fail` is rejected, which drives such orders through
/// every retry and onto the dead-letter topic.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderProcessor;

impl OrderProcessor {
    pub const FAILURE_KIND: &'static str = "ForcedFailure";
    pub const FAILURE_MESSAGE: &'static str = "Force failure for retry!";
}

impl ProcessingCallback for OrderProcessor {
    fn process(&self, message: &Message) -> Result<(), ProcessingFailure> {
        let payload = message.payload_str();
        match Order::from_bytes(message.payload()) {
            Ok(order) => info!(order_id = %order.id, product = %order.product, "received order"),
            Err(_) => info!(payload = %payload, "received message"),
        }

        if payload.contains("fail") {
            return Err(ProcessingFailure::new(Self::FAILURE_KIND, Self::FAILURE_MESSAGE));
        }
        Ok(())
    }
}

/// The order pipeline plus the dead-letter observer.
#[derive(Debug)]
pub struct Consumers {
    pipeline: PipelineHandle,
    observer: PipelineHandle,
}

impl Consumers {
    pub fn start(broker: Arc<dyn Broker>, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let pipeline = RetryPipeline::start(Arc::clone(&broker), config, Arc::new(OrderProcessor))?;
        let observer = DeadLetterObserver::start(
            broker,
            &config.topic,
            &config.dead_letter.observer_group,
            Arc::new(LoggingSink),
        )?;

        info!(
            topic = %config.topic,
            units = pipeline.len(),
            observers = observer.len(),
            "consumers started"
        );
        Ok(Self { pipeline, observer })
    }

    /// True once any unit has exited on its own (failure or closed subscription).
    pub fn any_finished(&self) -> bool {
        self.pipeline.any_finished() || self.observer.any_finished()
    }

    /// Resolves when a unit stops without being asked to, checking every `poll`.
    ///
    /// A stopped unit leaves its partition unconsumed, so the process should
    /// shut down rather than keep accepting orders for it.
    pub async fn unit_stopped(&self, poll: Duration) {
        let mut ticks = tokio::time::interval(poll);
        loop {
            ticks.tick().await;
            if self.any_finished() {
                error!("consumer unit stopped unexpectedly");
                return;
            }
        }
    }

    /// Stop every unit. Blocks until all threads have exited.
    pub fn shutdown(self) -> Vec<WorkerExit> {
        let mut exits = self.pipeline.shutdown();
        exits.extend(self.observer.shutdown());

        let failed = exits.iter().filter(|e| e.is_failure()).count();
        if failed > 0 {
            warn!(failed, "consumers stopped with failures");
        }
        exits
    }
}

#[cfg(test)]
mod tests {
    use orderstream_events::{
        BrokerError, InMemoryBroker, MessagePosition, OutboundRecord, Subscription,
    };

    use super::*;

    /// In-memory broker that cannot reach the dead-letter topic.
    struct NoDeadLetters(InMemoryBroker);

    impl Broker for NoDeadLetters {
        fn publish(&self, record: OutboundRecord) -> Result<MessagePosition, BrokerError> {
            if record.topic.ends_with(".DLT") {
                return Err(BrokerError::Connection("dead-letter topic unavailable".into()));
            }
            self.0.publish(record)
        }
        fn partitions(&self, topic: &str) -> Result<u32, BrokerError> {
            self.0.partitions(topic)
        }
        fn subscribe(&self, topic: &str, group: &str, partition: u32) -> Result<Subscription, BrokerError> {
            self.0.subscribe(topic, group, partition)
        }
        fn commit(&self, group: &str, position: &MessagePosition) -> Result<(), BrokerError> {
            self.0.commit(group, position)
        }
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig {
            partitions: 1,
            ..PipelineConfig::default()
        };
        config.retry.initial_interval_ms = 1;
        config.retry.max_interval_ms = 1;
        config.retry.max_attempts = 0;
        config.dead_letter.publish_attempts = 1;
        config
    }

    fn message(payload: &str) -> Message {
        Message::from_record(OutboundRecord::new("orders-topic", payload.as_bytes().to_vec()), 0, 0)
    }

    #[test]
    fn orders_mentioning_fail_are_rejected() {
        let err = OrderProcessor
            .process(&message(r#"{"id":"1","product":"fail"}"#))
            .unwrap_err();
        assert_eq!(err.kind(), "ForcedFailure");
        assert_eq!(err.message(), "Force failure for retry!");
    }

    #[test]
    fn other_payloads_succeed_first_time() {
        assert!(OrderProcessor.process(&message(r#"{"id":"2","product":"lamp"}"#)).is_ok());
        assert!(OrderProcessor.process(&message("not even json")).is_ok());
    }

    #[tokio::test]
    async fn failed_unit_is_detected() {
        let broker: Arc<dyn Broker> = Arc::new(NoDeadLetters(InMemoryBroker::with_default_partitions(1)));
        let consumers = Consumers::start(Arc::clone(&broker), &fast_config()).unwrap();
        assert!(!consumers.any_finished());

        broker
            .publish(OutboundRecord::new("orders-topic", r#"{"id":"1","product":"fail"}"#))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), consumers.unit_stopped(Duration::from_millis(10)))
            .await
            .expect("failed unit was not noticed");

        let exits = tokio::task::spawn_blocking(move || consumers.shutdown()).await.unwrap();
        assert!(exits.iter().any(WorkerExit::is_failure));
    }

    #[tokio::test]
    async fn healthy_units_keep_running() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::with_default_partitions(1));
        let consumers = Consumers::start(Arc::clone(&broker), &fast_config()).unwrap();

        let watched =
            tokio::time::timeout(Duration::from_millis(200), consumers.unit_stopped(Duration::from_millis(10))).await;
        assert!(watched.is_err());

        let exits = tokio::task::spawn_blocking(move || consumers.shutdown()).await.unwrap();
        assert!(exits.iter().all(|e| !e.is_failure()));
    }
}
