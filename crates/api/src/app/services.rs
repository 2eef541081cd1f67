use std::sync::Arc;

use orderstream_events::Broker;

/// Shared state behind the HTTP handlers.
pub struct AppServices {
    broker: Arc<dyn Broker>,
    topic: String,
}

impl AppServices {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    /// Topic new orders are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
