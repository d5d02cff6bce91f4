use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::NewOrder;

/// Request to create an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "customer_id cannot be empty"))]
    pub customer_id: String,
    #[validate(length(min = 1, max = 64, message = "sku must be 1-64 characters"))]
    pub sku: String,
    #[validate(range(min = 1, message = "quantity must be positive"))]
    pub quantity: u32,
    #[validate(range(min = 1, message = "amount_cents must be positive"))]
    pub amount_cents: i64,
}

impl From<CreateOrderRequest> for NewOrder {
    fn from(request: CreateOrderRequest) -> Self {
        Self {
            customer_id: request.customer_id,
            sku: request.sku,
            quantity: request.quantity,
            amount_cents: request.amount_cents,
        }
    }
}
