pub mod api;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod observability;
pub mod request;
pub mod services;

pub use error::{AppError, Result};
