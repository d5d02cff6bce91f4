use crate::error::{AppError, Result};
use crate::request::{is_json, RequestContext};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Request field carrying the client's base64 signature.
pub const SIGN_FIELD: &str = "sign";

/// Verifies `SHA256withRSA` request signatures against a configured public key.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey<Sha256>,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self {
            key: VerifyingKey::<Sha256>::new(public_key),
        }
    }

    /// Loads a base64-encoded DER `SubjectPublicKeyInfo`.
    pub fn from_base64_public_key(encoded: &str) -> Result<Self> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AppError::Configuration(format!("Public key is not valid base64: {}", e)))?;
        let public_key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| AppError::Configuration(format!("Public key is not a valid RSA key: {}", e)))?;
        Ok(Self::new(public_key))
    }

    /// Checks the request's `sign` field against its other parameters.
    /// Anything short of a valid signature, including a missing one, fails.
    pub fn verify(&self, request: &RequestContext) -> bool {
        let mut params = match collect_sign_params(request) {
            Ok(params) => params,
            Err(e) => {
                warn!("Signature check failed, request parameters unreadable: {}", e);
                return false;
            }
        };

        let client_sign = match params.remove(SIGN_FIELD) {
            Some(sign) => sign,
            None => {
                warn!("Signature check failed: missing '{}' parameter", SIGN_FIELD);
                return false;
            }
        };

        let content = build_sign_content(&params);
        debug!("Verifying signature over content: {}", content);

        let verified = self.verify_content(&content, &client_sign);
        if verified {
            info!("Request signature verified");
        } else {
            warn!("Signature check failed, parameters may have been tampered with");
        }
        verified
    }

    /// Verifies a base64 signature over `content`.
    pub fn verify_content(&self, content: &str, signature_b64: &str) -> bool {
        let bytes = match STANDARD.decode(signature_b64.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Signature is not valid base64: {}", e);
                return false;
            }
        };

        let signature = match Signature::try_from(bytes.as_slice()) {
            Ok(sig) => sig,
            Err(e) => {
                debug!("Malformed signature: {}", e);
                return false;
            }
        };

        self.key.verify(content.as_bytes(), &signature).is_ok()
    }
}

/// Query/form parameters, then JSON body fields layered on top with their
/// values stringified.
pub fn collect_sign_params(request: &RequestContext) -> Result<BTreeMap<String, String>> {
    let mut params = request.parameters();

    if is_json(request.content_type()) && !request.body.iter().all(u8::is_ascii_whitespace) {
        let body: serde_json::Map<String, Value> = serde_json::from_slice(&request.body)
            .map_err(|e| AppError::SignatureInvalid(format!("Unreadable JSON body: {}", e)))?;
        for (key, value) in body {
            params.insert(key, stringify(&value));
        }
    }

    Ok(params)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `k1=v1&k2=v2...` over non-empty values, sorted by key.
pub fn build_sign_content(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<String>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;
    use serde_json::json;
    use std::sync::OnceLock;

    fn keys() -> &'static (SigningKey<Sha256>, String) {
        static KEYS: OnceLock<(SigningKey<Sha256>, String)> = OnceLock::new();
        KEYS.get_or_init(|| {
            let mut rng = rand::thread_rng();
            let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
            let public_der = private_key.to_public_key().to_public_key_der().unwrap();
            let encoded = STANDARD.encode(public_der.as_bytes());
            (SigningKey::<Sha256>::new(private_key), encoded)
        })
    }

    fn sign(content: &str) -> String {
        STANDARD.encode(keys().0.sign(content.as_bytes()).to_bytes())
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::from_base64_public_key(&keys().1).unwrap()
    }

    #[test]
    fn test_sign_content_is_sorted_and_skips_empty() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        params.insert("c".to_string(), String::new());
        assert_eq!(build_sign_content(&params), "a=1&b=2");
    }

    #[test]
    fn test_verify_content_round_trip() {
        let verifier = verifier();
        let signature = sign("a=1&b=2");
        assert!(verifier.verify_content("a=1&b=2", &signature));
        assert!(!verifier.verify_content("a=1&b=3", &signature));
    }

    #[test]
    fn test_garbage_signatures_fail_closed() {
        let verifier = verifier();
        assert!(!verifier.verify_content("a=1", "not base64!!"));
        assert!(!verifier.verify_content("a=1", &STANDARD.encode(b"short")));
        assert!(!verifier.verify_content("a=1", ""));
    }

    #[test]
    fn test_verify_query_request() {
        let verifier = verifier();
        let request = RequestContext::new()
            .with_query_param("b", "2")
            .with_query_param("a", "1")
            .with_query_param("sign", sign("a=1&b=2"));
        assert!(verifier.verify(&request));

        let tampered = RequestContext::new()
            .with_query_param("b", "20")
            .with_query_param("a", "1")
            .with_query_param("sign", sign("a=1&b=2"));
        assert!(!verifier.verify(&tampered));
    }

    #[test]
    fn test_json_body_merges_over_query() {
        let verifier = verifier();
        let request = RequestContext::new()
            .with_query_param("a", "from-query")
            .with_json_body(&json!({
                "a": 1,
                "flag": true,
                "empty": null,
                "sign": sign("a=1&flag=true")
            }));
        assert!(verifier.verify(&request));
    }

    #[test]
    fn test_missing_sign_fails() {
        let verifier = verifier();
        let request = RequestContext::new().with_query_param("a", "1");
        assert!(!verifier.verify(&request));
    }

    #[test]
    fn test_bad_public_key_is_configuration_error() {
        let err = SignatureVerifier::from_base64_public_key("%%%").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));

        let err = SignatureVerifier::from_base64_public_key(&STANDARD.encode(b"not a key")).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
