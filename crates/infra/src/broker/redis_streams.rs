//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! ## Architecture
//!
//! - **Stream Key**: `<topic>:<partition>`, one stream per partition
//! - **Partition count**: stored under `orderstream:partitions:<topic>`, set once
//! - **Consumer Groups**: the pipeline's group id, created with `MKSTREAM`
//! - **Consumers**: one per partition, `<group>-p<partition>`
//! - **Commit**: `XACK`; unacknowledged entries stay in the consumer's pending
//!   list and are read again (before new entries) by the next subscription
//!
//! Offsets are derived from stream ids: `<ms>-<seq>` maps to `ms * 1_000_000 + seq`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::streams::{StreamId, StreamReadReply};
use tracing::{debug, error, instrument, warn};

use orderstream_events::{
    Broker, BrokerError, Headers, Message, MessagePosition, OutboundRecord, Subscription,
    partition_for_key,
};

const PARTITIONS_KEY_PREFIX: &str = "orderstream:partitions:";
const SEQ_SPAN: u64 = 1_000_000;
const READ_COUNT: usize = 16;

#[derive(Debug)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    default_partitions: u32,
    block: Duration,
    round_robin: AtomicUsize,
}

impl RedisStreamsBroker {
    /// Create a broker client for `redis_url` (e.g. `redis://localhost:6379`).
    ///
    /// `default_partitions` is used for topics that do not exist yet.
    pub fn new(redis_url: impl AsRef<str>, default_partitions: u32) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(connection_error)?;

        Ok(Self {
            client: Arc::new(client),
            default_partitions: default_partitions.max(1),
            block: Duration::from_millis(250),
            round_robin: AtomicUsize::new(0),
        })
    }

    fn connection(&self) -> Result<redis::Connection, BrokerError> {
        self.client.get_connection().map_err(connection_error)
    }

    fn ensure_consumer_group(
        conn: &mut redis::Connection,
        stream: &str,
        group: &str,
    ) -> Result<(), BrokerError> {
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query(conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }
}

impl Broker for RedisStreamsBroker {
    #[instrument(skip(self, record), fields(topic = %record.topic), err)]
    fn publish(&self, record: OutboundRecord) -> Result<MessagePosition, BrokerError> {
        let partitions = self.partitions(&record.topic)?;
        let partition = match record.key.as_deref() {
            Some(key) => partition_for_key(key, partitions),
            None => (self.round_robin.fetch_add(1, Ordering::Relaxed) % partitions as usize) as u32,
        };

        let headers = serde_json::to_string(&record.headers)
            .map_err(|e| BrokerError::Codec(e.to_string()))?;

        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key(&record.topic, partition)).arg("*");
        if let Some(key) = &record.key {
            cmd.arg("key").arg(key);
        }
        cmd.arg("headers").arg(&headers).arg("payload").arg(&record.payload);

        let id: String = cmd
            .query(&mut conn)
            .map_err(|e| command_error("XADD", e))?;

        Ok(MessagePosition::new(record.topic, partition, offset_from_id(&id)?))
    }

    fn partitions(&self, topic: &str) -> Result<u32, BrokerError> {
        let mut conn = self.connection()?;
        let key = format!("{PARTITIONS_KEY_PREFIX}{topic}");

        let _: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(self.default_partitions)
            .arg("NX")
            .query(&mut conn)
            .map_err(|e| command_error("SET", e))?;
        let count: u32 = redis::cmd("GET")
            .arg(&key)
            .query(&mut conn)
            .map_err(|e| command_error("GET", e))?;

        Ok(count)
    }

    fn subscribe(&self, topic: &str, group: &str, partition: u32) -> Result<Subscription, BrokerError> {
        let partitions = self.partitions(topic)?;
        if partition >= partitions {
            return Err(BrokerError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let stream = stream_key(topic, partition);
        let mut conn = self.connection()?;
        Self::ensure_consumer_group(&mut conn, &stream, group)?;

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let poller = StreamPoller {
            conn,
            stream,
            topic: topic.to_string(),
            partition,
            group: group.to_string(),
            consumer: format!("{group}-p{partition}"),
            block: self.block,
            closed: Arc::clone(&closed),
        };

        thread::Builder::new()
            .name(format!("redis-{topic}-p{partition}"))
            .spawn(move || poller.run(tx))
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Subscription::with_close_flag(rx, closed))
    }

    fn commit(&self, group: &str, position: &MessagePosition) -> Result<(), BrokerError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("XACK")
            .arg(stream_key(&position.topic, position.partition))
            .arg(group)
            .arg(id_from_offset(position.offset))
            .query(&mut conn)
            .map_err(|e| command_error("XACK", e))?;
        Ok(())
    }
}

/// Background reader feeding one subscription.
struct StreamPoller {
    conn: redis::Connection,
    stream: String,
    topic: String,
    partition: u32,
    group: String,
    consumer: String,
    block: Duration,
    closed: Arc<AtomicBool>,
}

impl StreamPoller {
    fn run(mut self, tx: Sender<Message>) {
        // Own pending entries first: delivered earlier but never acknowledged.
        let mut cursor = "0".to_string();

        while !self.closed.load(Ordering::Relaxed) {
            let block = (cursor == ">").then_some(self.block);
            let entries = match self.read(&cursor, block) {
                Ok(entries) => entries,
                Err(err) => {
                    error!(stream = %self.stream, error = %err, "failed to read from stream");
                    thread::sleep(self.block);
                    continue;
                }
            };

            if cursor != ">" {
                match entries.last() {
                    Some(last) => cursor = last.id.clone(),
                    None => {
                        debug!(stream = %self.stream, "pending entries replayed");
                        cursor = ">".to_string();
                        continue;
                    }
                }
            }

            for entry in entries {
                match self.decode(&entry) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(stream = %self.stream, id = %entry.id, error = %err, "skipping undecodable entry"),
                }
            }
        }
    }

    fn read(&mut self, cursor: &str, block: Option<Duration>) -> Result<Vec<StreamId>, BrokerError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(cursor);

        let reply: Option<StreamReadReply> = cmd
            .query(&mut self.conn)
            .map_err(|e| command_error("XREADGROUP", e))?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    fn decode(&self, entry: &StreamId) -> Result<Message, BrokerError> {
        let offset = offset_from_id(&entry.id)?;
        let field = |name: &str| -> Result<Option<Vec<u8>>, BrokerError> {
            match entry.map.get(name) {
                Some(value) => redis::from_redis_value(value)
                    .map(Some)
                    .map_err(|e| BrokerError::Codec(format!("field {name}: {e}"))),
                None => Ok(None),
            }
        };

        let payload = field("payload")?.unwrap_or_default();
        let key = field("key")?.map(|k| String::from_utf8_lossy(&k).into_owned());
        let headers: Headers = match field("headers")? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|e| BrokerError::Codec(e.to_string()))?,
            None => Headers::new(),
        };
        let timestamp = DateTime::from_timestamp_millis((offset / SEQ_SPAN) as i64).unwrap_or_else(Utc::now);

        Ok(Message::new(
            MessagePosition::new(self.topic.clone(), self.partition, offset),
            key,
            payload,
            headers,
            timestamp,
        ))
    }
}

fn stream_key(topic: &str, partition: u32) -> String {
    format!("{topic}:{partition}")
}

fn offset_from_id(id: &str) -> Result<u64, BrokerError> {
    let invalid = || BrokerError::Codec(format!("unexpected stream id {id:?}"));
    let (ms, seq) = id.split_once('-').ok_or_else(invalid)?;
    let ms: u64 = ms.parse().map_err(|_| invalid())?;
    let seq: u64 = seq.parse().map_err(|_| invalid())?;
    if seq >= SEQ_SPAN {
        return Err(invalid());
    }
    ms.checked_mul(SEQ_SPAN)
        .and_then(|base| base.checked_add(seq))
        .ok_or_else(invalid)
}

fn id_from_offset(offset: u64) -> String {
    format!("{}-{}", offset / SEQ_SPAN, offset % SEQ_SPAN)
}

fn connection_error(e: redis::RedisError) -> BrokerError {
    BrokerError::Connection(e.to_string())
}

fn command_error(command: &str, e: redis::RedisError) -> BrokerError {
    BrokerError::Command(format!("{command} failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_map_to_ordered_offsets() {
        let a = offset_from_id("1700000000000-0").unwrap();
        let b = offset_from_id("1700000000000-1").unwrap();
        let c = offset_from_id("1700000000001-0").unwrap();
        assert!(a < b && b < c);
        assert_eq!(id_from_offset(b), "1700000000000-1");
    }

    #[test]
    fn malformed_ids_are_codec_errors() {
        assert!(matches!(offset_from_id("nope"), Err(BrokerError::Codec(_))));
        assert!(matches!(offset_from_id("1-x"), Err(BrokerError::Codec(_))));
    }

    #[test]
    fn stream_key_includes_partition() {
        assert_eq!(stream_key("orders-topic", 2), "orders-topic:2");
    }
}
