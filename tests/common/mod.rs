#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use idempotency_guard::idempotency::{
    FingerprintBuilder, IdempotencyGuard, MemoryReservationStore, OperationConfig,
    OperationRegistry, ReservationStore,
};
use idempotency_guard::request::RequestContext;
use idempotency_guard::services::OrderService;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde_json::Value;
use sha2::Sha256;
use std::sync::{Arc, OnceLock};

pub fn memory_store() -> Arc<MemoryReservationStore> {
    Arc::new(MemoryReservationStore::new())
}

/// Guard over `store` with the order service's operations plus `extra`.
pub fn guard_with(
    store: Arc<dyn ReservationStore>,
    extra: impl IntoIterator<Item = OperationConfig>,
) -> IdempotencyGuard {
    let registry = OperationRegistry::builder(["OrderService", "tests"])
        .register_all(OrderService::idempotent_operations())
        .register_all(extra)
        .build()
        .expect("Failed to build registry");

    IdempotencyGuard::new(store, Arc::new(registry), FingerprintBuilder::default())
}

pub fn order_request(token: &str, body: &Value) -> RequestContext {
    RequestContext::new()
        .with_header("token", token)
        .with_remote_addr("203.0.113.10:40000".parse().expect("valid socket address"))
        .with_json_body(body)
}

/// Test key pair, generated once: `(signing key, base64 DER public key)`.
pub fn signing_keys() -> &'static (SigningKey<Sha256>, String) {
    static KEYS: OnceLock<(SigningKey<Sha256>, String)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("Failed to generate key");
        let public_der = private_key
            .to_public_key()
            .to_public_key_der()
            .expect("Failed to encode public key");
        (
            SigningKey::<Sha256>::new(private_key),
            STANDARD.encode(public_der.as_bytes()),
        )
    })
}

pub fn sign(content: &str) -> String {
    STANDARD.encode(signing_keys().0.sign(content.as_bytes()).to_bytes())
}

pub fn order_guard(store: Arc<dyn ReservationStore>) -> IdempotencyGuard {
    guard_with(store, Vec::<OperationConfig>::new())
}
