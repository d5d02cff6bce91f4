pub mod order_service;

pub use order_service::{NewOrder, Order, OrderService, CREATE_ORDER};
