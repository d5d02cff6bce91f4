use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::net::SocketAddr;
use validator::Validate;

use crate::api::requests::CreateOrderRequest;
use crate::api::responses::{ApiResponse, ErrorResponse, OrderResponse, ValidationErrorDetail};
use crate::error::AppError;
use crate::idempotency::{Invocation, MetricsSnapshot};
use crate::observability::{get_metrics, AggregatedHealth, LatencyTimer};
use crate::request::RequestContext;
use crate::services::{NewOrder, OrderService};

use super::routes::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Health check endpoint. Unhealthy when the reservation store is down,
/// since every guarded call is rejected in that state.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<AggregatedHealth>>) {
    let health = state.health_checker.check_all().await;
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(ApiResponse::success(health)))
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "Metrics not enabled".to_string()),
    }
}

/// Guard counters for this process.
pub async fn guard_stats(State(state): State<AppState>) -> Json<ApiResponse<MetricsSnapshot>> {
    Json(ApiResponse::success(state.guard.metrics().snapshot()))
}

/// Create an order. Runs under the idempotency guard, so a resubmission
/// while the first is in flight gets 409.
pub async fn create_order(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), axum::response::Response> {
    let timer = LatencyTimer::new();
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        AppError::Validation(format!("Unreadable request body: {}", e)).into_response()
    })?;
    let context = RequestContext::from_parts(&parts, bytes.to_vec(), remote_addr);

    let payload: CreateOrderRequest = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Validation(format!("Malformed order request: {}", e)).into_response()
    })?;

    if let Err(errors) = payload.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                ErrorResponse::new("VALIDATION_ERROR", "Request validation failed")
                    .with_details(ValidationErrorDetail::from_errors(&errors)),
            )),
        )
            .into_response());
    }

    let new_order = NewOrder::from(payload);
    let invocation = Invocation::new(&context)
        .with_serialized_arg("order", &new_order)
        .map_err(IntoResponse::into_response)?;

    let result = state
        .guard
        .execute(&OrderService::create_order_operation(), &invocation, || {
            state.orders.create_order(new_order)
        })
        .await;

    let status = match &result {
        Ok(_) => StatusCode::CREATED,
        Err(e) => crate::api::responses::status_for(e),
    };
    get_metrics().record_http_request("POST", "/orders", status.as_u16(), timer.elapsed_ms());

    match result {
        Ok(order) => Ok((
            StatusCode::CREATED,
            Json(ApiResponse::success(OrderResponse::from(order))),
        )),
        Err(e) => Err(e.into_response()),
    }
}
