use axum::{Router, routing::post};

pub mod orders;
pub mod system;

/// Router for the producer endpoints.
pub fn router() -> Router {
    Router::new().route("/orders", post(orders::create_order))
}
