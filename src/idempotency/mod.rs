pub mod cleanup;
pub mod expression;
pub mod fingerprint;
pub mod handler;
pub mod memory;
pub mod operation;
pub mod registry;
pub mod signature;
pub mod storage;

pub use cleanup::{CleanupReport, DelayedCleanupWorker, OrphanMonitor, OrphanSweepReport};
pub use expression::{FieldPathEvaluator, KeyExpressionEvaluator};
pub use fingerprint::{redact_key, Fingerprint, FingerprintBuilder, Invocation, KEY_PREFIX};
pub use handler::{Admission, GuardMetrics, IdempotencyGuard, MetricsSnapshot};
pub use memory::MemoryReservationStore;
pub use operation::{OperationConfig, OperationId};
pub use registry::{OperationRegistry, OperationRegistryBuilder};
pub use signature::SignatureVerifier;
pub use storage::{KeyTtl, RedisReservationStore, ReservationStore, DELAY_DELETE_QUEUE};
