use thiserror::Error;

/// Errors surfaced by the idempotency guard and its collaborators.
#[derive(Debug, Error)]
pub enum AppError {
    /// Operation not registered, malformed key expression, bad key material.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// The reservation for this fingerprint is already held. Carries the
    /// operation's configured conflict message.
    #[error("{0}")]
    DuplicateRequest(String),

    /// The reservation store could not be reached or did not answer in time.
    /// The outcome of the call is unknown and must be treated as a rejection.
    #[error("Reservation store unavailable: {0}")]
    StoreUnavailable(String),

    /// The guarded operation itself failed.
    #[error("Operation failed: {0}")]
    Operation(#[source] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Maps a Redis client error onto the fail-closed store error.
    pub fn store(err: redis::RedisError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppError::DuplicateRequest(_))
    }

    pub fn is_store_failure(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    /// Stable machine-readable code used in API error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            AppError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::Operation(_) => "OPERATION_FAILED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::store(err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_displays_conflict_message_verbatim() {
        let err = AppError::DuplicateRequest("Order already submitted".to_string());
        assert_eq!(err.to_string(), "Order already submitted");
        assert!(err.is_duplicate());
        assert!(!err.is_store_failure());
    }

    #[test]
    fn test_redis_errors_fail_closed() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let err: AppError = redis_err.into();
        assert!(err.is_store_failure());
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_operation_error_keeps_source() {
        let err = AppError::Operation(anyhow::anyhow!("inventory exhausted"));
        assert!(err.to_string().contains("inventory exhausted"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
