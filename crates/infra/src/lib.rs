//! Infrastructure layer: retrying consumers, dead-letter routing, brokers, config.

pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod pipeline;
pub mod retry;
pub mod workers;


pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{PipelineError, PipelineHandle, RetryPipeline};
