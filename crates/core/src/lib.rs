//! `orderstream-core`: business types shared by the producer and the consumer.
//!
//! This crate is **pure domain**: no broker, no IO, no async.

pub mod error;
pub mod order;

pub use error::{DomainError, DomainResult};
pub use order::Order;
