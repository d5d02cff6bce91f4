use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::{Fingerprint, FingerprintBuilder, Invocation};
use crate::idempotency::operation::{OperationConfig, OperationId};
use crate::idempotency::registry::OperationRegistry;
use crate::idempotency::signature::SignatureVerifier;
use crate::idempotency::storage::ReservationStore;
use crate::observability::{get_metrics, mask_sensitive};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};

/// Metrics for guarded calls.
#[derive(Debug, Default)]
pub struct GuardMetrics {
    pub total_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub admitted_requests: AtomicU64,
    pub completed_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub signature_rejections: AtomicU64,
    pub store_failures: AtomicU64,
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signature_rejection(&self) {
        self.signature_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_rate(&self) -> f64 {
        self.snapshot().duplicate_rate()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            admitted_requests: self.admitted_requests.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            signature_rejections: self.signature_rejections.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub duplicate_requests: u64,
    pub admitted_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub signature_rejections: u64,
    pub store_failures: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.duplicate_requests as f64 / self.total_requests as f64
        }
    }
}

/// A call that won its reservation and may run.
#[derive(Debug, Clone)]
pub struct Admission {
    pub config: Arc<OperationConfig>,
    pub fingerprint: Fingerprint,
}

/// Wraps operations so that at most one call per fingerprint runs while its
/// reservation is held.
///
/// Each call makes a single non-blocking reservation attempt. Callers that
/// want to wait for a competing call must retry on
/// [`AppError::DuplicateRequest`] themselves.
pub struct IdempotencyGuard {
    store: Arc<dyn ReservationStore>,
    registry: Arc<OperationRegistry>,
    fingerprints: FingerprintBuilder,
    verifier: Option<Arc<SignatureVerifier>>,
    metrics: Arc<GuardMetrics>,
}

impl IdempotencyGuard {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        registry: Arc<OperationRegistry>,
        fingerprints: FingerprintBuilder,
    ) -> Self {
        Self {
            store,
            registry,
            fingerprints,
            verifier: None,
            metrics: Arc::new(GuardMetrics::new()),
        }
    }

    pub fn with_signature_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    pub fn metrics(&self) -> Arc<GuardMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> Arc<dyn ReservationStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<OperationRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs `operation` under the guard registered for `operation_id`.
    ///
    /// Rejections: unknown operation or bad key expression ->
    /// [`AppError::Configuration`]; failed signature ->
    /// [`AppError::SignatureInvalid`]; reservation held by another call ->
    /// [`AppError::DuplicateRequest`]; store unreachable ->
    /// [`AppError::StoreUnavailable`]. A failure of the operation itself is
    /// returned as [`AppError::Operation`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_id: &OperationId,
        invocation: &Invocation<'_>,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let span = tracing::info_span!("idempotency_guard", operation = %operation_id);

        async move {
            let admission = self.admit(operation_id, invocation).await?;

            match operation().await {
                Ok(value) => {
                    self.on_success(&admission).await;
                    Ok(value)
                }
                Err(e) => {
                    let err = e.into();
                    self.on_failure(&admission, &err).await;
                    Err(AppError::Operation(err))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Verifies, fingerprints and reserves. On success the caller holds the
    /// reservation and must finish with [`on_success`](Self::on_success) or
    /// [`on_failure`](Self::on_failure).
    pub async fn admit(&self, operation_id: &OperationId, invocation: &Invocation<'_>) -> Result<Admission> {
        self.metrics.record_request();
        let op_label = operation_id.name.as_str();

        let config = self.registry.resolve(operation_id)?;

        if config.verify_signature {
            let verifier = self.verifier.as_ref().ok_or_else(|| {
                AppError::Configuration(format!(
                    "Operation {} requires signature verification but no public key is configured",
                    operation_id
                ))
            })?;

            if !verifier.verify(invocation.request()) {
                self.metrics.record_signature_rejection();
                get_metrics().record_guard_outcome(op_label, "signature_invalid");
                return Err(AppError::SignatureInvalid(
                    "Signature invalid, parameters may have been tampered with".to_string(),
                ));
            }
        }

        let fingerprint = self.fingerprints.build(&config, invocation)?;

        let reserved = match self
            .store
            .try_reserve(fingerprint.key(), config.expire_time)
            .await
        {
            Ok(reserved) => reserved,
            Err(e) => {
                self.metrics.record_store_failure();
                get_metrics().record_guard_outcome(op_label, "store_unavailable");
                error!(
                    token = %mask_sensitive(fingerprint.token(), 2),
                    "Reservation outcome unknown, rejecting call: {}", e
                );
                return Err(e);
            }
        };

        if !reserved {
            self.metrics.record_duplicate();
            get_metrics().record_guard_outcome(op_label, "duplicate");
            warn!(
                token = %mask_sensitive(fingerprint.token(), 2),
                ip = %fingerprint.ip(),
                digest = %fingerprint.digest(),
                "Duplicate request intercepted"
            );
            return Err(AppError::DuplicateRequest(config.conflict_message.clone()));
        }

        // Rewrites the placeholder with the same TTL; exclusion already holds.
        if let Err(e) = self
            .store
            .refresh_ttl(fingerprint.key(), config.expire_time)
            .await
        {
            warn!("Failed to refresh reservation {}: {}", fingerprint.redacted(), e);
        }

        self.metrics.record_admitted();
        get_metrics().record_guard_outcome(op_label, "admitted");
        debug!("Reservation taken, key: {}", fingerprint.redacted());

        Ok(Admission { config, fingerprint })
    }

    /// Releases after a successful call: a delayed delete when the operation
    /// deletes on success, otherwise the reservation simply expires.
    pub async fn on_success(&self, admission: &Admission) {
        self.metrics.record_completed();
        let key = admission.fingerprint.key();
        let logged = admission.fingerprint.redacted();

        if admission.config.delete_on_success {
            match self
                .store
                .enqueue_delayed_delete(key, admission.config.delay_check_seconds)
                .await
            {
                Ok(due) => debug!("Business call completed, delete of {} scheduled at {}", logged, due),
                Err(e) => error!("Failed to schedule delayed delete, key: {}: {}", logged, e),
            }
        }
    }

    /// Releases after a failed call so a legitimate retry is not blocked. The
    /// delayed delete backs up an immediate delete that may not have landed.
    pub async fn on_failure(&self, admission: &Admission, cause: &anyhow::Error) {
        self.metrics.record_failed();
        get_metrics().record_guard_outcome(&admission.config.id.name, "operation_failed");
        let key = admission.fingerprint.key();
        let logged = admission.fingerprint.redacted();

        if admission.config.delete_on_success {
            if let Err(e) = self.store.delete_now(key).await {
                error!("Failed to delete reservation after failed call, key: {}: {}", logged, e);
            }
            if let Err(e) = self
                .store
                .enqueue_delayed_delete(key, admission.config.delay_check_seconds)
                .await
            {
                error!("Failed to schedule delayed delete, key: {}: {}", logged, e);
            }
            debug!("Business call failed ({}), reservation released, key: {}", cause, logged);
        }
    }
}
