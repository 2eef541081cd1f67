//! Attempt loop for a single message.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use orderstream_events::{Broker, BrokerError, Message, MessagePosition};

use super::callback::ProcessingCallback;
use super::policy::RetryPolicy;
use super::tracker::DeliveryAttemptTracker;
use super::waiter::{BackoffWaiter, Wait};
use crate::dead_letter::{DeadLetterPolicy, DeadLetterPublisher, DeadLetterRecord, PublishError};

/// Everything one processing unit needs to know besides the callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Consumer group progress is committed for.
    pub group: String,
    pub policy: RetryPolicy,
    pub dead_letter: DeadLetterPolicy,
}

impl RetrySettings {
    pub fn new(group: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            group: group.into(),
            policy,
            dead_letter: DeadLetterPolicy::default(),
        }
    }

    pub fn with_dead_letter(mut self, dead_letter: DeadLetterPolicy) -> Self {
        self.dead_letter = dead_letter;
        self
    }
}

/// How a message left the orchestrator. Both variants mean "committed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Succeeded {
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        dead_letter: MessagePosition,
    },
}

impl TerminalOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Reasons a message was left uncommitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("shutdown requested while {position} was waiting to retry")]
    Cancelled { position: MessagePosition },

    #[error("dead-letter publish for {position} failed after {attempts} attempts: {source}")]
    DeadLetterPublish {
        position: MessagePosition,
        attempts: u32,
        #[source]
        source: PublishError,
    },

    #[error("commit of {position} failed: {source}")]
    Commit {
        position: MessagePosition,
        #[source]
        source: BrokerError,
    },
}

/// Drives the attempt loop for one processing unit.
///
/// ## Flow
///
/// 1. Invoke the callback
/// 2. Success: commit, done
/// 3. Failure with retries left: wait `delay_for_attempt(failures)`, go to 1
/// 4. Failure without retries left: publish to `<topic>.DLT`, commit, done
///
/// Nothing is committed mid-retry. If the wait is cancelled the message stays
/// uncommitted and its attempt count is discarded.
pub struct RetryOrchestrator<B: ?Sized, C: ?Sized> {
    broker: Arc<B>,
    callback: Arc<C>,
    publisher: DeadLetterPublisher<B>,
    settings: RetrySettings,
    tracker: DeliveryAttemptTracker,
}

impl<B, C> RetryOrchestrator<B, C>
where
    B: Broker + ?Sized,
    C: ProcessingCallback + ?Sized,
{
    pub fn new(broker: Arc<B>, callback: Arc<C>, settings: RetrySettings) -> Self {
        Self {
            publisher: DeadLetterPublisher::new(Arc::clone(&broker)),
            broker,
            callback,
            settings,
            tracker: DeliveryAttemptTracker::new(),
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn tracker(&self) -> &DeliveryAttemptTracker {
        &self.tracker
    }

    /// Take one message to a terminal outcome, or leave it uncommitted on error.
    #[instrument(
        skip(self, message, waiter),
        fields(
            topic = %message.topic(),
            partition = message.position().partition,
            offset = message.position().offset,
        )
    )]
    pub fn process<W>(
        &mut self,
        message: Message,
        waiter: &W,
    ) -> Result<TerminalOutcome, ProcessError>
    where
        W: BackoffWaiter + ?Sized,
    {
        let position = message.position().clone();

        loop {
            let attempt = self.tracker.attempts(&position) + 1;
            debug!(attempt, "invoking processing callback");

            let failure = match self.callback.process(&message) {
                Ok(()) => {
                    let attempts = self.tracker.record_success(&position);
                    self.commit(&position)?;
                    info!(attempts, "message processed");
                    return Ok(TerminalOutcome::Succeeded { attempts });
                }
                Err(failure) => failure,
            };

            let failures = self.tracker.record_failure(&position, failure.clone());

            if !self.settings.policy.should_retry(failures) {
                let history = self.tracker.mark_exhausted(&position);
                let record = DeadLetterRecord::from_history(message, &history);
                let dead_letter = self.publish_dead_letter(&record, waiter)?;
                self.commit(&position)?;
                return Ok(TerminalOutcome::Exhausted {
                    attempts: record.attempts(),
                    dead_letter,
                });
            }

            let delay = self.settings.policy.delay_for_attempt(failures);
            warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "processing failed, retrying after backoff"
            );

            if waiter.wait(delay) == Wait::Cancelled {
                self.tracker.forget(&position);
                info!(attempt = failures, "backoff cancelled by shutdown, leaving message uncommitted");
                return Err(ProcessError::Cancelled { position });
            }
        }
    }

    fn publish_dead_letter<W>(
        &self,
        record: &DeadLetterRecord,
        waiter: &W,
    ) -> Result<MessagePosition, ProcessError>
    where
        W: BackoffWaiter + ?Sized,
    {
        let position = record.original().position();
        let max = self.settings.dead_letter.publish_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.publisher.publish(record) {
                Ok(dead_letter) => return Ok(dead_letter),
                Err(source) if attempt >= max => {
                    error!(
                        attempts = attempt,
                        error = %source,
                        "giving up on dead-letter publish"
                    );
                    return Err(ProcessError::DeadLetterPublish {
                        position: position.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    warn!(
                        attempt,
                        error = %source,
                        "dead-letter publish failed, retrying"
                    );
                    if waiter.wait(self.settings.dead_letter.publish_backoff) == Wait::Cancelled {
                        return Err(ProcessError::Cancelled {
                            position: position.clone(),
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn commit(&self, position: &MessagePosition) -> Result<(), ProcessError> {
        self.broker
            .commit(&self.settings.group, position)
            .map_err(|source| {
                error!(error = %source, "failed to commit progress");
                ProcessError::Commit {
                    position: position.clone(),
                    source,
                }
            })
    }
}
