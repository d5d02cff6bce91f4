use crate::error::{AppError, Result};
use crate::idempotency::{OperationConfig, OperationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const CREATE_ORDER: &str = "OrderService.create_order";

/// Order creation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: String,
    pub sku: String,
    pub quantity: u32,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: String,
    pub sku: String,
    pub quantity: u32,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// In-memory order book used as the guarded business operation.
#[derive(Debug, Default)]
pub struct OrderService {
    orders: RwLock<Vec<Order>>,
    processing_delay: Duration,
}

impl OrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated processing time, so overlapping calls actually overlap.
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    pub fn create_order_operation() -> OperationId {
        OperationId::new(CREATE_ORDER, &["NewOrder"])
    }

    /// Guard settings for every operation this service exposes.
    pub fn idempotent_operations() -> Vec<OperationConfig> {
        vec![OperationConfig::new(Self::create_order_operation())
            .with_expire_time(Duration::from_secs(5))
            .with_delete_on_success(true)
            .with_delay_check_seconds(2)
            .with_conflict_message("Order is already being processed, please retry later")]
    }

    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        if request.quantity == 0 {
            return Err(AppError::Validation("Quantity must be positive".to_string()));
        }
        if request.amount_cents <= 0 {
            return Err(AppError::Validation("Amount must be positive".to_string()));
        }

        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }

        let order = Order {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            sku: request.sku,
            quantity: request.quantity,
            amount_cents: request.amount_cents,
            created_at: Utc::now(),
        };

        self.orders.write().await.push(order.clone());
        tracing::info!("Order created: {}", order.id);

        Ok(order)
    }

    pub async fn count(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn list(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order() -> NewOrder {
        NewOrder {
            customer_id: "c-1".to_string(),
            sku: "SKU-1".to_string(),
            quantity: 2,
            amount_cents: 1999,
        }
    }

    #[tokio::test]
    async fn test_create_order() {
        let service = OrderService::new();
        let order = service.create_order(new_order()).await.unwrap();
        assert_eq!(order.sku, "SKU-1");
        assert_eq!(service.count().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_quantity() {
        let service = OrderService::new();
        let mut request = new_order();
        request.quantity = 0;
        let err = service.create_order(request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(service.count().await, 0);
    }

    #[test]
    fn test_operation_settings() {
        let configs = OrderService::idempotent_operations();
        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.id.to_string(), "OrderService.create_order#NewOrder");
        assert_eq!(config.expire_time, Duration::from_secs(5));
        assert!(config.delete_on_success);
        assert_eq!(config.delay_check_seconds, 2);
    }
}
