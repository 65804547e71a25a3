use super::protocol::*;
use crate::dispatch::dispatcher::Dispatcher;
use crate::error::RouterError;

use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

pub async fn handle_invoke(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Path(function_name): Path<String>,
    body: Bytes,
) -> Response {
    match dispatcher.dispatch(&function_name, body.to_vec()).await {
        Ok(reply) => (StatusCode::OK, reply).into_response(),
        Err(e) => {
            tracing::debug!("Call to '{}' failed: {}", function_name, e);
            error_response(&e).into_response()
        }
    }
}

pub async fn handle_list_functions(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
) -> (StatusCode, Json<FunctionsResponse>) {
    (
        StatusCode::OK,
        Json(FunctionsResponse {
            functions: dispatcher.registry().functions(),
            in_flight: dispatcher.in_flight_count(),
        }),
    )
}

pub async fn handle_health() -> StatusCode {
    StatusCode::OK
}

pub fn status_for(error: &RouterError) -> StatusCode {
    match error {
        RouterError::UnknownFunction(_) => StatusCode::NOT_FOUND,
        RouterError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        RouterError::NoWorkersAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RouterError::Saturated(_) => StatusCode::TOO_MANY_REQUESTS,
        RouterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RouterError::WorkerDisconnected(_) => StatusCode::BAD_GATEWAY,
        RouterError::WorkerFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RouterError::InvalidConfig(_) | RouterError::DuplicateFunction { .. } => {
            StatusCode::BAD_REQUEST
        }
    }
}

pub fn error_response(error: &RouterError) -> (StatusCode, Json<ErrorResponse>) {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
            kind: error.kind().to_string(),
        }),
    )
}
