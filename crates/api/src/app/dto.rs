use serde::{Deserialize, Serialize};

use orderstream_core::Order;
use orderstream_events::MessagePosition;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub product: String,
}

impl From<CreateOrderRequest> for Order {
    fn from(req: CreateOrderRequest) -> Self {
        Order::new(req.id.unwrap_or_default(), req.product)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OrderQueuedResponse {
    pub status: &'static str,
    pub order_id: String,
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

impl OrderQueuedResponse {
    pub fn new(order: &Order, position: MessagePosition) -> Self {
        Self {
            status: "queued",
            order_id: order.id.clone(),
            topic: position.topic,
            partition: position.partition,
            offset: position.offset,
        }
    }
}
