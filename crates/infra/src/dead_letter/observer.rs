//! Consumer of the dead-letter topic.
//!
//! Dead-lettered messages are terminal by construction: the observer decodes,
//! hands the result to a sink and always commits. It never retries.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use orderstream_events::{Broker, Message, MessagePosition};

use super::record::{DeadLetterReport, DecodeError, dead_letter_topic};
use crate::pipeline::{PipelineError, PipelineHandle};
use crate::workers::{PartitionWorker, WorkerExit};

/// Where observed dead letters go (alerting, audit log, ...).
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, report: DeadLetterReport);

    /// Called for messages on the dead-letter topic that lack the failure headers.
    fn undecodable(&self, message: &Message, error: &DecodeError) {
        warn!(
            position = %message.position(),
            error = %error,
            "undecodable message on dead-letter topic"
        );
    }
}

/// Raises an `error!` event per dead letter, with the full report as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl DeadLetterSink for LoggingSink {
    fn record(&self, report: DeadLetterReport) {
        let json = serde_json::to_string(&report).unwrap_or_default();
        error!(
            original = %report.original_position,
            attempts = report.attempts,
            cause_kind = %report.cause_kind,
            cause = %report.cause_message,
            report = %json,
            "received in DLT"
        );
    }
}

/// Keeps reports in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<DeadLetterReport>>,
    undecodable: Mutex<Vec<MessagePosition>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<DeadLetterReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn undecodable_positions(&self) -> Vec<MessagePosition> {
        self.undecodable.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl DeadLetterSink for RecordingSink {
    fn record(&self, report: DeadLetterReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }

    fn undecodable(&self, message: &Message, _error: &DecodeError) {
        if let Ok(mut undecodable) = self.undecodable.lock() {
            undecodable.push(message.position().clone());
        }
    }
}

#[derive(Debug)]
pub struct DeadLetterObserver<S: ?Sized> {
    sink: Arc<S>,
}

impl<S: ?Sized> Clone for DeadLetterObserver<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S> DeadLetterObserver<S>
where
    S: DeadLetterSink + ?Sized + 'static,
{
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    /// Handle one message from the dead-letter topic.
    pub fn on_dead_letter(&self, message: &Message) {
        match DeadLetterReport::decode(message) {
            Ok(report) => self.sink.record(report),
            Err(err) => self.sink.undecodable(message, &err),
        }
    }

    /// Attach to `<source_topic>.DLT` with one observer unit per partition.
    pub fn start<B>(
        broker: Arc<B>,
        source_topic: &str,
        group: &str,
        sink: Arc<S>,
    ) -> Result<PipelineHandle, PipelineError>
    where
        B: Broker + ?Sized + 'static,
    {
        let observer = Self::new(sink);
        let topic = dead_letter_topic(source_topic);
        let partitions = broker.partitions(&topic)?;
        let mut handle = PipelineHandle::new();

        for partition in 0..partitions {
            let subscription = broker.subscribe(&topic, group, partition)?;
            let observer = observer.clone();
            let broker = Arc::clone(&broker);
            let group = group.to_string();

            let worker = PartitionWorker::spawn(
                format!("dlt-observer-{partition}"),
                subscription,
                move |message: Message, _shutdown| {
                    observer.on_dead_letter(&message);
                    match broker.commit(&group, message.position()) {
                        Ok(()) => ControlFlow::Continue(()),
                        Err(err) => {
                            error!(
                                position = %message.position(),
                                error = %err,
                                "failed to commit dead-letter message"
                            );
                            ControlFlow::Break(WorkerExit::Failed(err.to_string()))
                        }
                    }
                },
            )?;
            handle.push(worker);
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orderstream_events::{Headers, OutboundRecord};

    use super::*;
    use crate::dead_letter::DeadLetterRecord;
    use crate::retry::ProcessingFailure;

    fn dead_letter_message() -> Message {
        let now = Utc::now();
        let original = Message::new(
            MessagePosition::new("orders-topic", 0, 1),
            None,
            b"fail".to_vec(),
            Headers::new(),
            now,
        );
        let record = DeadLetterRecord::new(original, ProcessingFailure::transient("x"), 4, now, now);
        Message::from_record(record.to_outbound(), 0, 0)
    }

    #[test]
    fn decoded_messages_reach_the_sink() {
        let sink = Arc::new(RecordingSink::new());
        let observer = DeadLetterObserver::new(sink.clone());

        observer.on_dead_letter(&dead_letter_message());

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts, 4);
        assert!(sink.undecodable_positions().is_empty());
    }

    #[test]
    fn undecodable_messages_are_reported_separately() {
        let sink = Arc::new(RecordingSink::new());
        let observer = DeadLetterObserver::new(sink.clone());
        let plain = Message::from_record(OutboundRecord::new("orders-topic.DLT", b"?".to_vec()), 0, 5);

        observer.on_dead_letter(&plain);

        assert!(sink.reports().is_empty());
        assert_eq!(
            sink.undecodable_positions(),
            vec![MessagePosition::new("orders-topic.DLT", 0, 5)]
        );
    }

    #[test]
    fn logging_sink_accepts_reports() {
        let report = DeadLetterReport::decode(&dead_letter_message()).unwrap();
        LoggingSink.record(report);
    }
}
