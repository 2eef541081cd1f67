//! Broker-facing message model and publish/subscribe mechanics.
//!
//! Everything here is transport-agnostic. Concrete brokers live behind the
//! [`Broker`] trait; [`InMemoryBroker`] is the reference implementation used
//! by tests and single-process deployments.

pub mod broker;
pub mod in_memory_broker;
pub mod message;

pub use broker::{Broker, BrokerError, Subscription, partition_for_key};
pub use in_memory_broker::InMemoryBroker;
pub use message::{Headers, Message, MessagePosition, OutboundRecord};
