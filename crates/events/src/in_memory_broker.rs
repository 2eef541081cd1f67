//! In-memory partitioned broker for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};

use tracing::debug;

use crate::broker::{Broker, BrokerError, Subscription, partition_for_key};
use crate::message::{Message, MessagePosition, OutboundRecord};

const DEFAULT_PARTITIONS: u32 = 1;

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<Message>,
    subscribers: Vec<mpsc::Sender<Message>>,
}

#[derive(Debug)]
struct TopicState {
    partitions: Vec<PartitionLog>,
}

impl TopicState {
    fn with_partitions(count: u32) -> Self {
        Self {
            partitions: (0..count.max(1)).map(|_| PartitionLog::default()).collect(),
        }
    }
}

/// In-memory broker.
///
/// - No IO / no async
/// - Topics are created on first use with `default_partitions`
/// - Keyed records always land on the same partition, unkeyed ones round-robin
/// - Committed offsets are tracked per `(group, topic, partition)`; a new
///   subscription replays everything from the committed offset onwards
#[derive(Debug)]
pub struct InMemoryBroker {
    default_partitions: u32,
    topics: Mutex<HashMap<String, TopicState>>,
    committed: Mutex<HashMap<(String, String, u32), u64>>,
    round_robin: AtomicUsize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose auto-created topics get `partitions` partitions.
    pub fn with_default_partitions(partitions: u32) -> Self {
        Self {
            default_partitions: partitions.max(1),
            ..Self::default()
        }
    }

    /// Create `topic` with an explicit partition count. No-op if it already exists.
    pub fn create_topic(&self, topic: &str, partitions: u32) -> Result<(), BrokerError> {
        let mut topics = self.topics.lock().map_err(|_| BrokerError::Poisoned)?;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::with_partitions(partitions));
        Ok(())
    }

    /// Snapshot of every record stored on `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<Message> {
        let Ok(topics) = self.topics.lock() else {
            return Vec::new();
        };
        topics
            .get(topic)
            .map(|t| {
                t.partitions
                    .iter()
                    .flat_map(|p| p.records.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Next offset `group` will read from `topic`/`partition` (0 if nothing was committed).
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.committed
            .lock()
            .ok()
            .and_then(|c| {
                c.get(&(group.to_string(), topic.to_string(), partition))
                    .copied()
            })
            .unwrap_or(0)
    }

    fn select_partition(&self, key: Option<&str>, count: u32) -> u32 {
        match key {
            Some(k) => partition_for_key(k, count),
            None => (self.round_robin.fetch_add(1, Ordering::Relaxed) % count as usize) as u32,
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            default_partitions: DEFAULT_PARTITIONS,
            topics: Mutex::new(HashMap::new()),
            committed: Mutex::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
        }
    }
}

impl Broker for InMemoryBroker {
    fn publish(&self, record: OutboundRecord) -> Result<MessagePosition, BrokerError> {
        let mut topics = self.topics.lock().map_err(|_| BrokerError::Poisoned)?;
        let default_partitions = self.default_partitions;
        let state = topics
            .entry(record.topic.clone())
            .or_insert_with(|| TopicState::with_partitions(default_partitions));

        let partition = self.select_partition(record.key.as_deref(), state.partitions.len() as u32);
        let log = &mut state.partitions[partition as usize];
        let offset = log.records.len() as u64;
        let message = Message::from_record(record, partition, offset);
        let position = message.position().clone();

        // Drop any dead subscribers while publishing.
        log.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        log.records.push(message);

        Ok(position)
    }

    fn partitions(&self, topic: &str) -> Result<u32, BrokerError> {
        let mut topics = self.topics.lock().map_err(|_| BrokerError::Poisoned)?;
        let default_partitions = self.default_partitions;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::with_partitions(default_partitions));
        Ok(state.partitions.len() as u32)
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Subscription, BrokerError> {
        let start = self.committed_offset(group, topic, partition);

        let mut topics = self.topics.lock().map_err(|_| BrokerError::Poisoned)?;
        let default_partitions = self.default_partitions;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::with_partitions(default_partitions));
        let log = state
            .partitions
            .get_mut(partition as usize)
            .ok_or_else(|| BrokerError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;

        // Replay the uncommitted backlog, then register for live records. Both happen
        // under the topics lock so no publish can slip in between.
        let (tx, rx) = mpsc::channel();
        for message in log.records.iter().skip(start as usize) {
            let _ = tx.send(message.clone());
        }
        log.subscribers.push(tx);

        debug!(topic, group, partition, start, "in-memory subscription opened");
        Ok(Subscription::new(rx))
    }

    fn commit(&self, group: &str, position: &MessagePosition) -> Result<(), BrokerError> {
        let mut committed = self.committed.lock().map_err(|_| BrokerError::Poisoned)?;
        let next = committed
            .entry((group.to_string(), position.topic.clone(), position.partition))
            .or_insert(0);
        *next = (*next).max(position.offset + 1);
        Ok(())
    }
}
