use crate::error::{AppError, Result};
use crate::idempotency::expression::{FieldPathEvaluator, KeyExpressionEvaluator};
use crate::idempotency::operation::OperationConfig;
use crate::observability::mask_sensitive;
use crate::request::RequestContext;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Namespace of every reservation key.
pub const KEY_PREFIX: &str = "idempotent:";
/// Rendered in place of a caller token that was not supplied.
pub const MISSING_TOKEN: &str = "null";
pub const DEFAULT_TOKEN_HEADER: &str = "token";

/// One call of a guarded operation: its named arguments in declaration order
/// and the request that triggered it.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    args: Vec<(String, Value)>,
    request: &'a RequestContext,
}

impl<'a> Invocation<'a> {
    pub fn new(request: &'a RequestContext) -> Self {
        Self {
            args: Vec::new(),
            request,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.push((name.into(), value));
        self
    }

    pub fn with_serialized_arg<T: Serialize>(self, name: impl Into<String>, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize argument: {}", e)))?;
        Ok(self.with_arg(name, value))
    }

    pub fn args(&self) -> &[(String, Value)] {
        &self.args
    }

    pub fn named_args(&self) -> Map<String, Value> {
        self.args.iter().cloned().collect()
    }

    pub fn request(&self) -> &RequestContext {
        self.request
    }
}

/// Deterministic identity of a logical request. Two calls are duplicates iff
/// their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    key: String,
    digest: String,
    token: String,
    ip: String,
    port: String,
}

impl Fingerprint {
    /// Full reservation key: `idempotent:<token>:<ip>:<port>:<sha256-hex>`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// The key with the caller token masked. Use this form in logs.
    pub fn redacted(&self) -> String {
        format!(
            "{}{}:{}:{}:{}",
            KEY_PREFIX,
            mask_sensitive(&self.token, 2),
            self.ip,
            self.port,
            self.digest
        )
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Log form of a raw reservation key. Token and IPv6 address may both contain
/// `:`, so everything between the prefix and the digest is masked together.
pub fn redact_key(key: &str) -> String {
    let rest = match key.strip_prefix(KEY_PREFIX) {
        Some(rest) => rest,
        None => return mask_sensitive(key, 2),
    };
    match rest.rsplit_once(':') {
        Some((caller, digest)) => format!("{}{}:{}", KEY_PREFIX, mask_sensitive(caller, 2), digest),
        None => format!("{}{}", KEY_PREFIX, mask_sensitive(rest, 2)),
    }
}

/// Builds fingerprints from operation config and call context using SHA-256.
#[derive(Clone)]
pub struct FingerprintBuilder {
    evaluator: Arc<dyn KeyExpressionEvaluator>,
    default_token_header: String,
}

impl fmt::Debug for FingerprintBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintBuilder")
            .field("default_token_header", &self.default_token_header)
            .finish_non_exhaustive()
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_HEADER)
    }
}

impl FingerprintBuilder {
    pub fn new(default_token_header: impl Into<String>) -> Self {
        Self {
            evaluator: Arc::new(FieldPathEvaluator),
            default_token_header: default_token_header.into(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn KeyExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn default_token_header(&self) -> &str {
        &self.default_token_header
    }

    pub fn build(&self, config: &OperationConfig, invocation: &Invocation<'_>) -> Result<Fingerprint> {
        let request = invocation.request();
        let mut content = self.key_material(config, invocation)?;

        let body = request.decoded_body();
        if !body.is_empty() {
            content.push_str(&normalize_body(&body));
        }

        let token_header = config.resolve_token_header(&self.default_token_header);
        let token = request
            .header_with_variants(token_header)
            .unwrap_or_else(|| MISSING_TOKEN.to_string());
        let ip = request.client_ip();
        let port = request
            .client_port()
            .map(|p| p.to_string())
            .unwrap_or_else(|| crate::request::UNKNOWN_IP.to_string());

        content.push_str("|token=");
        content.push_str(&token);
        content.push_str("|ip=");
        content.push_str(&ip);
        content.push_str("|port=");
        content.push_str(&port);

        let digest = sha256_hex(&content);
        let key = format!("{}{}:{}:{}:{}", KEY_PREFIX, token, ip, port, digest);

        Ok(Fingerprint {
            key,
            digest,
            token,
            ip,
            port,
        })
    }

    /// Custom expression result, or `<operation id>:<argument digest>`.
    fn key_material(&self, config: &OperationConfig, invocation: &Invocation<'_>) -> Result<String> {
        match config.custom_key_expression() {
            Some(expression) => self.evaluator.evaluate(expression, &invocation.named_args()),
            None => Ok(format!("{}:{}", config.id, hash_arguments(invocation.args()))),
        }
    }
}

/// Digest of the argument values in declaration order.
pub fn hash_arguments(args: &[(String, Value)]) -> String {
    let values: Vec<&Value> = args.iter().map(|(_, value)| value).collect();
    let serialized = serde_json::to_string(&values).unwrap_or_default();
    sha256_hex(&serialized)
}

/// Canonical form of a request body: null fields dropped, keys folded to
/// lower case and sorted, nested objects normalized the same way. When two
/// keys differ only by case the later one wins.
pub fn normalize_body(body: &Map<String, Value>) -> String {
    let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in body {
        if value.is_null() {
            continue;
        }
        sorted.insert(key.to_lowercase(), normalize_value(value));
    }
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.to_lowercase(), normalize_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

/// 64-character lower-case hex SHA-256 digest.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
