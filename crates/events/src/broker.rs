//! Broker abstraction (mechanics only).
//!
//! The pipeline never talks to a broker client directly. It receives an
//! explicitly constructed handle implementing [`Broker`] and uses four
//! primitives: publish, partition discovery, per-partition subscription and
//! progress commits.
//!
//! ## Delivery Guarantees
//!
//! Brokers provide **at-least-once delivery** per consumer group:
//! - A subscription starts at the group's committed offset for that partition
//! - Anything delivered but not committed is delivered again to the next subscription
//! - Messages within a partition arrive in offset order
//!
//! Consumers must therefore tolerate redelivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::message::{Message, MessagePosition, OutboundRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("partition {partition} does not exist on topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("broker state lock poisoned")]
    Poisoned,

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("record encoding error: {0}")]
    Codec(String),
}

/// A subscription to one partition of a topic on behalf of a consumer group.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = broker.subscribe("orders-topic", "order-consumer-group-v2", 0)?;
///
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(message) => process(message)?,
///         Err(RecvTimeoutError::Timeout) => continue,      // Check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,    // Broker closed
///     }
/// }
/// ```
///
/// ## Thread Safety
///
/// A subscription belongs to exactly one processing unit. Messages arrive in
/// partition order.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<Message>,
    closed: Option<Arc<AtomicBool>>,
}

impl Subscription {
    pub fn new(receiver: Receiver<Message>) -> Self {
        Self {
            receiver,
            closed: None,
        }
    }

    /// Subscription that raises `closed` when dropped, so a feeding thread can stop polling.
    pub fn with_close_flag(receiver: Receiver<Message>, closed: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            closed: Some(closed),
        }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<Message, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<Message, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(flag) = &self.closed {
            flag.store(true, Ordering::Release);
        }
    }
}

/// Stable partition for a record key (FNV-1a over the key bytes).
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let hash = key.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    (hash % u64::from(partitions.max(1))) as u32
}

/// Transport-agnostic broker handle.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: the same handle is shared by every
/// processing unit, and the dead-letter publish path is used concurrently
/// without extra serialization.
pub trait Broker: Send + Sync {
    /// Append a record to its topic and return the position it was stored at.
    fn publish(&self, record: OutboundRecord) -> Result<MessagePosition, BrokerError>;

    /// Number of partitions of `topic`.
    fn partitions(&self, topic: &str) -> Result<u32, BrokerError>;

    /// Subscribe to one partition, starting at the group's committed offset.
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Subscription, BrokerError>;

    /// Record that `group` is done with everything up to and including `position`.
    fn commit(&self, group: &str, position: &MessagePosition) -> Result<(), BrokerError>;
}

impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    fn publish(&self, record: OutboundRecord) -> Result<MessagePosition, BrokerError> {
        (**self).publish(record)
    }

    fn partitions(&self, topic: &str) -> Result<u32, BrokerError> {
        (**self).partitions(topic)
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Subscription, BrokerError> {
        (**self).subscribe(topic, group, partition)
    }

    fn commit(&self, group: &str, position: &MessagePosition) -> Result<(), BrokerError> {
        (**self).commit(group, position)
    }
}
