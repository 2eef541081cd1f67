//! Broker selection from configuration.

#[cfg(feature = "redis")]
pub mod redis_streams;

use std::sync::Arc;

use tracing::info;

use orderstream_events::{Broker, BrokerError, InMemoryBroker};

use crate::config::PipelineConfig;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;

/// Build the broker named by `config.broker_url`.
///
/// - `memory://`: process-local [`InMemoryBroker`]
/// - `redis://...`: [`RedisStreamsBroker`] (requires the `redis` feature)
pub fn connect(config: &PipelineConfig) -> Result<Arc<dyn Broker>, BrokerError> {
    let url = config.broker_url.as_str();

    if url.starts_with("memory://") {
        info!(partitions = config.partitions, "using in-memory broker");
        return Ok(Arc::new(InMemoryBroker::with_default_partitions(config.partitions)));
    }

    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return connect_redis(url, config.partitions);
    }

    Err(BrokerError::Connection(format!("unsupported broker url {url:?}")))
}

#[cfg(feature = "redis")]
fn connect_redis(url: &str, partitions: u32) -> Result<Arc<dyn Broker>, BrokerError> {
    info!(partitions, "using redis streams broker");
    Ok(Arc::new(RedisStreamsBroker::new(url, partitions)?))
}

#[cfg(not(feature = "redis"))]
fn connect_redis(url: &str, _partitions: u32) -> Result<Arc<dyn Broker>, BrokerError> {
    Err(BrokerError::Connection(format!(
        "{url:?} needs the `redis` feature of orderstream-infra"
    )))
}
