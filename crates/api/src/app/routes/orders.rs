use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, instrument};

use orderstream_core::Order;
use orderstream_events::OutboundRecord;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Validate an order and publish it, keyed by order id, to the orders topic.
#[instrument(skip_all)]
pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text());
        }
    };

    let order = match Order::from(body).normalized() {
        Ok(order) => order,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let payload = match order.to_bytes() {
        Ok(payload) => payload,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let record = OutboundRecord::new(services.topic(), payload).with_key(order.id.clone());
    let broker = services.broker();

    // Broker clients block (Redis); keep them off the async workers.
    let published = tokio::task::spawn_blocking(move || broker.publish(record)).await;

    let position = match published {
        Ok(Ok(position)) => position,
        Ok(Err(e)) => return errors::broker_error_to_response(e),
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string());
        }
    };

    info!(order_id = %order.id, position = %position, "order queued");

    (
        StatusCode::ACCEPTED,
        Json(dto::OrderQueuedResponse::new(&order, position)),
    )
        .into_response()
}
