use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidationErrors;

use crate::error::AppError;
use crate::services::Order;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Validation error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn from_errors(errors: &ValidationErrors) -> Vec<Self> {
        let mut details: Vec<Self> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| ValidationErrorDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        details
    }
}

/// Order response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: String,
    pub sku: String,
    pub quantity: u32,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            sku: order.sku,
            quantity: order.quantity,
            amount_cents: order.amount_cents,
            created_at: order.created_at,
        }
    }
}

/// HTTP status for an error. A failed operation reports the status of its
/// own cause when that cause is an [`AppError`].
pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::DuplicateRequest(_) => StatusCode::CONFLICT,
        AppError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Operation(cause) => cause
            .downcast_ref::<AppError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        AppError::Configuration(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        let body = match &self {
            AppError::Operation(cause) => match cause.downcast_ref::<AppError>() {
                Some(inner) if status.is_client_error() => ErrorResponse::new(inner.code(), inner.to_string()),
                _ => ErrorResponse::new(self.code(), "The operation failed"),
            },
            AppError::Configuration(_) | AppError::Internal(_) => {
                ErrorResponse::new(self.code(), "An internal error occurred")
            }
            _ => ErrorResponse::new(self.code(), self.to_string()),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self);
        }

        (status, Json(ApiResponse::<()>::error(body))).into_response()
    }
}
