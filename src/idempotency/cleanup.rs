use crate::error::Result;
use crate::idempotency::fingerprint::{redact_key, KEY_PREFIX};
use crate::idempotency::storage::{now_millis, KeyTtl, ReservationStore};
use crate::observability::get_metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(3600);

/// Outcome of one pass over the delayed-delete queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub processed: usize,
    pub deleted: usize,
    pub already_absent: usize,
    /// Tasks left queued because the store rejected them this pass.
    pub failed: usize,
}

/// Periodically deletes reservation keys whose scheduled delete has come due.
pub struct DelayedCleanupWorker {
    store: Arc<dyn ReservationStore>,
    interval: Duration,
}

impl DelayedCleanupWorker {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run_once(&self) -> Result<CleanupReport> {
        self.run_once_at(now_millis()).await
    }

    /// Processes every task due at or before `now_millis`. A task that
    /// fails stays queued for the next pass; it never aborts the others.
    pub async fn run_once_at(&self, now_millis: i64) -> Result<CleanupReport> {
        let due = self.store.drain_due(now_millis).await?;
        let mut report = CleanupReport::default();

        for key in due {
            report.processed += 1;
            match self.process(&key, now_millis).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.already_absent += 1,
                Err(e) => {
                    report.failed += 1;
                    error!("Delayed delete failed, key: {}: {}", redact_key(&key), e);
                }
            }
        }

        if report.processed > 0 {
            get_metrics().record_cleanup_pass(report.deleted as u64, report.failed as u64);
        }
        Ok(report)
    }

    async fn process(&self, key: &str, now_millis: i64) -> Result<bool> {
        let deleted = if self.store.exists(key).await? {
            let deleted = self.store.delete_now(key).await?;
            info!("Delayed delete executed, key: {}", redact_key(key));
            deleted
        } else {
            debug!("Delayed delete skipped, key already gone: {}", redact_key(key));
            false
        };
        // Conditional so a delete rescheduled since the drain survives.
        self.store.remove_due_from_queue(key, now_millis).await?;
        Ok(deleted)
    }

    /// Runs the worker on its own task until the handle is aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.processed > 0 => {
                        debug!(
                            "Cleanup pass: {} processed, {} deleted, {} failed",
                            report.processed, report.deleted, report.failed
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Cleanup pass failed: {}", e),
                }
            }
        })
    }
}

/// Outcome of one orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanSweepReport {
    pub scanned: usize,
    /// Keys found without an expiry and deleted.
    pub orphans: Vec<String>,
    pub failed: usize,
}

/// Finds reservation keys that carry no expiry and deletes them. Such keys
/// can only come from a writer that bypassed the reserve path, and would
/// block their fingerprint forever.
pub struct OrphanMonitor {
    store: Arc<dyn ReservationStore>,
    prefix: String,
    interval: Duration,
}

impl OrphanMonitor {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self {
            store,
            prefix: KEY_PREFIX.to_string(),
            interval: DEFAULT_MONITOR_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run_once(&self) -> Result<OrphanSweepReport> {
        let keys = self.store.list_keys_by_prefix(&self.prefix).await?;
        let mut report = OrphanSweepReport {
            scanned: keys.len(),
            ..Default::default()
        };

        for key in keys {
            match self.store.get_ttl(&key).await {
                Ok(KeyTtl::Persistent) => match self.store.delete_now(&key).await {
                    Ok(_) => {
                        error!("Found reservation key without expiry, deleted: {}", redact_key(&key));
                        get_metrics().record_orphan_deleted();
                        report.orphans.push(key);
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!("Failed to delete orphaned key {}: {}", redact_key(&key), e);
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to read ttl of {}: {}", redact_key(&key), e);
                }
            }
        }

        Ok(report)
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) => info!(
                        "Orphan sweep complete: {} scanned, {} deleted",
                        report.scanned,
                        report.orphans.len()
                    ),
                    Err(e) => error!("Orphan sweep failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::idempotency::memory::MemoryReservationStore;
    use crate::idempotency::storage::MockReservationStore;
    use mockall::predicate::*;

    #[tokio::test]
    async fn test_due_task_deletes_key_and_dequeues() {
        let store = Arc::new(MemoryReservationStore::new());
        store
            .try_reserve("idempotent:k", Duration::from_secs(60))
            .await
            .unwrap();
        store.schedule_delete("idempotent:k", 1_000).await.unwrap();

        let worker = DelayedCleanupWorker::new(store.clone());
        let report = worker.run_once_at(1_000).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.deleted, 1);
        assert!(!store.exists("idempotent:k").await.unwrap());
        assert!(store.queued().is_empty());
    }

    #[tokio::test]
    async fn test_task_not_yet_due_is_untouched() {
        let store = Arc::new(MemoryReservationStore::new());
        store
            .try_reserve("idempotent:k", Duration::from_secs(60))
            .await
            .unwrap();
        store.schedule_delete("idempotent:k", 5_000).await.unwrap();

        let worker = DelayedCleanupWorker::new(store.clone());
        let report = worker.run_once_at(4_999).await.unwrap();

        assert_eq!(report, CleanupReport::default());
        assert!(store.exists("idempotent:k").await.unwrap());
        assert_eq!(store.queued().len(), 1);
    }

    #[tokio::test]
    async fn test_absent_key_is_only_dequeued() {
        let store = Arc::new(MemoryReservationStore::new());
        store.schedule_delete("idempotent:gone", 0).await.unwrap();

        let worker = DelayedCleanupWorker::new(store.clone());
        let report = worker.run_once_at(10).await.unwrap();

        assert_eq!(report.already_absent, 1);
        assert!(store.queued().is_empty());
    }

    #[tokio::test]
    async fn test_failed_task_stays_queued_and_others_proceed() {
        let mut store = MockReservationStore::new();
        store
            .expect_drain_due()
            .returning(|_| Ok(vec!["idempotent:bad".to_string(), "idempotent:good".to_string()]));
        store
            .expect_exists()
            .with(eq("idempotent:bad"))
            .returning(|_| Err(AppError::StoreUnavailable("timeout".to_string())));
        store
            .expect_exists()
            .with(eq("idempotent:good"))
            .returning(|_| Ok(true));
        store
            .expect_delete_now()
            .with(eq("idempotent:good"))
            .times(1)
            .returning(|_| Ok(true));
        store
            .expect_remove_due_from_queue()
            .with(eq("idempotent:good"), eq(0))
            .times(1)
            .returning(|_, _| Ok(true));
        store
            .expect_remove_due_from_queue()
            .with(eq("idempotent:bad"), always())
            .never();

        let worker = DelayedCleanupWorker::new(Arc::new(store));
        let report = worker.run_once_at(0).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_rescheduled_task_survives_pass() {
        let mut store = MockReservationStore::new();
        store
            .expect_drain_due()
            .returning(|_| Ok(vec!["idempotent:k".to_string()]));
        store.expect_exists().returning(|_| Ok(false));
        // The task was pushed to a later due time after the drain.
        store
            .expect_remove_due_from_queue()
            .with(eq("idempotent:k"), eq(1_000))
            .times(1)
            .returning(|_, _| Ok(false));
        store.expect_remove_from_queue().never();

        let worker = DelayedCleanupWorker::new(Arc::new(store));
        let report = worker.run_once_at(1_000).await.unwrap();
        assert_eq!(report.already_absent, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_orphan_monitor_deletes_only_persistent_keys() {
        let store = Arc::new(MemoryReservationStore::new());
        store.insert_persistent("idempotent:orphan", "1");
        store
            .try_reserve("idempotent:live", Duration::from_secs(60))
            .await
            .unwrap();
        store.insert_persistent("session:other", "1");
        store.schedule_delete("idempotent:live", i64::MAX).await.unwrap();

        let monitor = OrphanMonitor::new(store.clone());
        let report = monitor.run_once().await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.orphans, vec!["idempotent:orphan".to_string()]);
        assert!(!store.exists("idempotent:orphan").await.unwrap());
        assert!(store.exists("idempotent:live").await.unwrap());
        assert!(store.exists("session:other").await.unwrap());
        assert_eq!(store.queued().len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_monitor_tolerates_vanishing_keys() {
        let mut store = MockReservationStore::new();
        store
            .expect_list_keys_by_prefix()
            .returning(|_| Ok(vec!["idempotent:gone".to_string()]));
        store.expect_get_ttl().returning(|_| Ok(KeyTtl::Absent));
        store.expect_delete_now().never();

        let monitor = OrphanMonitor::new(Arc::new(store));
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert!(report.orphans.is_empty());
    }

    #[tokio::test]
    async fn test_started_worker_processes_queue() {
        let store = Arc::new(MemoryReservationStore::new());
        store
            .try_reserve("idempotent:k", Duration::from_secs(60))
            .await
            .unwrap();
        store.schedule_delete("idempotent:k", 0).await.unwrap();

        let handle = DelayedCleanupWorker::new(store.clone())
            .with_interval(Duration::from_millis(10))
            .start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(!store.exists("idempotent:k").await.unwrap());
        assert!(store.queued().is_empty());
    }
}
