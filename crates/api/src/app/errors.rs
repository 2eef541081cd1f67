use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orderstream_core::DomainError;
use orderstream_events::BrokerError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::Malformed(msg) => json_error(StatusCode::BAD_REQUEST, "malformed_payload", msg),
    }
}

pub fn broker_error_to_response(err: BrokerError) -> axum::response::Response {
    json_error(StatusCode::BAD_GATEWAY, "publish_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
