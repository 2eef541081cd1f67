//! HTTP API and process wiring: the order producer endpoint plus the consumers
//! that run next to it.

pub mod app;
pub mod consumer;
