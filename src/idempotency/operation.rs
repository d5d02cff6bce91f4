use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_EXPIRE_TIME: Duration = Duration::from_secs(1);
pub const DEFAULT_DELAY_CHECK_SECONDS: u64 = 10;
pub const DEFAULT_CONFLICT_MESSAGE: &str = "Duplicate request, please retry later";

/// Stable identity of a guarded operation: its name plus the type names of
/// its parameters, so overloads stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub name: String,
    pub param_types: Vec<String>,
}

impl OperationId {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, param_types: &[S]) -> Self {
        Self {
            name: name.into(),
            param_types: param_types.iter().map(|t| t.as_ref().to_string()).collect(),
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.param_types.join(","))
    }
}

/// Per-operation guard settings, resolved once at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationConfig {
    pub id: OperationId,
    /// Expression producing the key material, e.g. `#order.id + ':' + #user`.
    pub key_expression: Option<String>,
    /// Header carrying the caller token. Falls back to the process default.
    pub token_header: Option<String>,
    /// TTL of the reservation. Must outlive the operation.
    pub expire_time: Duration,
    /// Release the reservation after the call instead of letting it expire.
    pub delete_on_success: bool,
    pub verify_signature: bool,
    /// Grace period before a released reservation is actually deleted.
    pub delay_check_seconds: u64,
    pub conflict_message: String,
}

impl OperationConfig {
    pub fn new(id: OperationId) -> Self {
        Self {
            id,
            key_expression: None,
            token_header: None,
            expire_time: DEFAULT_EXPIRE_TIME,
            delete_on_success: false,
            verify_signature: false,
            delay_check_seconds: DEFAULT_DELAY_CHECK_SECONDS,
            conflict_message: DEFAULT_CONFLICT_MESSAGE.to_string(),
        }
    }

    pub fn with_key_expression(mut self, expression: impl Into<String>) -> Self {
        self.key_expression = Some(expression.into());
        self
    }

    pub fn with_token_header(mut self, header: impl Into<String>) -> Self {
        self.token_header = Some(header.into());
        self
    }

    pub fn with_expire_time(mut self, expire_time: Duration) -> Self {
        self.expire_time = expire_time;
        self
    }

    pub fn with_delete_on_success(mut self, delete: bool) -> Self {
        self.delete_on_success = delete;
        self
    }

    pub fn with_signature_verification(mut self, verify: bool) -> Self {
        self.verify_signature = verify;
        self
    }

    pub fn with_delay_check_seconds(mut self, seconds: u64) -> Self {
        self.delay_check_seconds = seconds;
        self
    }

    pub fn with_conflict_message(mut self, message: impl Into<String>) -> Self {
        self.conflict_message = message.into();
        self
    }

    /// The custom key expression, if one is set and non-blank.
    pub fn custom_key_expression(&self) -> Option<&str> {
        self.key_expression
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
    }

    /// Header name to read the caller token from.
    pub fn resolve_token_header<'a>(&'a self, default: &'a str) -> &'a str {
        self.token_header
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(default)
    }
}
