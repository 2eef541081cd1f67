//! Per-message attempt bookkeeping.
//!
//! The tracker is owned by exactly one processing unit, so it needs no locking.
//! An entry lives only while its message is being processed: success,
//! exhaustion and cancellation all remove it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use orderstream_events::MessagePosition;

use super::callback::ProcessingFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    TransientFailure,
    Exhausted,
}

/// Record of one invocation of the processing callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub position: MessagePosition,
    /// 1-based.
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<ProcessingFailure>,
}

/// Everything recorded for one message so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    attempts: Vec<DeliveryAttempt>,
}

impl AttemptHistory {
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        &self.attempts
    }

    pub fn len(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn first_failure_at(&self) -> Option<DateTime<Utc>> {
        self.failures().next().map(|a| a.at)
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.failures().last().map(|a| a.at)
    }

    pub fn last_error(&self) -> Option<&ProcessingFailure> {
        self.failures().last().and_then(|a| a.error.as_ref())
    }

    fn failures(&self) -> impl Iterator<Item = &DeliveryAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Succeeded)
    }
}

/// Correlates each in-flight message with its attempts.
#[derive(Debug, Default)]
pub struct DeliveryAttemptTracker {
    entries: HashMap<MessagePosition, AttemptHistory>,
}

impl DeliveryAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts recorded so far for `position`.
    pub fn attempts(&self, position: &MessagePosition) -> u32 {
        self.entries.get(position).map_or(0, AttemptHistory::len)
    }

    /// Number of messages currently tracked.
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Record a failed invocation and return the attempt number it was.
    pub fn record_failure(&mut self, position: &MessagePosition, error: ProcessingFailure) -> u32 {
        self.push(position, AttemptOutcome::TransientFailure, Some(error))
    }

    /// Record a successful invocation, drop the entry and return the total attempts.
    pub fn record_success(&mut self, position: &MessagePosition) -> u32 {
        let attempt = self.push(position, AttemptOutcome::Succeeded, None);
        self.entries.remove(position);
        attempt
    }

    /// Mark the last failure as terminal and hand the full history over.
    pub fn mark_exhausted(&mut self, position: &MessagePosition) -> AttemptHistory {
        let mut history = self.entries.remove(position).unwrap_or_default();
        if let Some(last) = history.attempts.last_mut() {
            last.outcome = AttemptOutcome::Exhausted;
        }
        history
    }

    /// Drop everything known about `position` (shutdown mid-retry).
    pub fn forget(&mut self, position: &MessagePosition) {
        self.entries.remove(position);
    }

    fn push(
        &mut self,
        position: &MessagePosition,
        outcome: AttemptOutcome,
        error: Option<ProcessingFailure>,
    ) -> u32 {
        let history = self.entries.entry(position.clone()).or_default();
        let attempt = history.len() + 1;
        history.attempts.push(DeliveryAttempt {
            position: position.clone(),
            attempt,
            at: Utc::now(),
            outcome,
            error,
        });
        attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: u64) -> MessagePosition {
        MessagePosition::new("orders-topic", 0, offset)
    }

    #[test]
    fn failures_count_up_from_one() {
        let mut tracker = DeliveryAttemptTracker::new();
        assert_eq!(tracker.attempts(&pos(0)), 0);
        assert_eq!(tracker.record_failure(&pos(0), ProcessingFailure::transient("a")), 1);
        assert_eq!(tracker.record_failure(&pos(0), ProcessingFailure::transient("b")), 2);
        assert_eq!(tracker.attempts(&pos(0)), 2);
    }

    #[test]
    fn messages_are_tracked_independently() {
        let mut tracker = DeliveryAttemptTracker::new();
        tracker.record_failure(&pos(0), ProcessingFailure::transient("a"));
        assert_eq!(tracker.record_failure(&pos(1), ProcessingFailure::transient("b")), 1);
        assert_eq!(tracker.in_flight(), 2);
    }

    #[test]
    fn success_reports_total_and_clears_entry() {
        let mut tracker = DeliveryAttemptTracker::new();
        tracker.record_failure(&pos(0), ProcessingFailure::transient("a"));
        assert_eq!(tracker.record_success(&pos(0)), 2);
        assert_eq!(tracker.attempts(&pos(0)), 0);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn exhaustion_returns_history_with_terminal_last_attempt() {
        let mut tracker = DeliveryAttemptTracker::new();
        tracker.record_failure(&pos(3), ProcessingFailure::transient("first"));
        tracker.record_failure(&pos(3), ProcessingFailure::transient("last"));

        let history = tracker.mark_exhausted(&pos(3));

        assert_eq!(history.len(), 2);
        assert_eq!(history.attempts()[0].outcome, AttemptOutcome::TransientFailure);
        assert_eq!(history.attempts()[1].outcome, AttemptOutcome::Exhausted);
        assert_eq!(history.last_error().unwrap().message(), "last");
        assert!(history.first_failure_at().unwrap() <= history.last_failure_at().unwrap());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn forget_resets_the_count() {
        let mut tracker = DeliveryAttemptTracker::new();
        tracker.record_failure(&pos(0), ProcessingFailure::transient("a"));
        tracker.forget(&pos(0));
        assert_eq!(tracker.record_failure(&pos(0), ProcessingFailure::transient("a")), 1);
    }
}
