use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::KEY_PREFIX;
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ExistenceCheck, RedisResult, SetExpiry, SetOptions};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Sorted set holding `(key, due-time)` cleanup tasks.
pub const DELAY_DELETE_QUEUE: &str = "idempotent:delay:delete";

/// Placeholder value written when a reservation is taken.
pub const RESERVED_VALUE: &str = "1";

const SCAN_BATCH: usize = 200;

/// `ZSCORE` and `ZREM` in one step: removes the member only if its score is
/// still at or below the given bound.
const REMOVE_IF_DUE_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if score and tonumber(score) <= tonumber(ARGV[2]) then
    return redis.call('ZREM', KEYS[1], ARGV[1])
end
return 0
"#;

/// Remaining lifetime of a key as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Expiring(Duration),
    /// The key exists but will never expire.
    Persistent,
    Absent,
}

impl KeyTtl {
    /// Interprets a `PTTL` reply: -2 absent, -1 no expiry.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => KeyTtl::Absent,
            -1 => KeyTtl::Persistent,
            ms if ms < 0 => KeyTtl::Absent,
            ms => KeyTtl::Expiring(Duration::from_millis(ms as u64)),
        }
    }
}

/// Current wall-clock time in epoch milliseconds, the unit of queue scores.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared key-value store backing reservations and the cleanup queue.
///
/// `try_reserve` must be atomic across every process using the store; it is
/// the only mutual-exclusion primitive the guard relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Sets the key only if absent, with a TTL, in one store operation.
    /// Returns true when this caller now holds the reservation.
    async fn try_reserve(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Rewrites an existing key's placeholder and TTL. Never creates the key.
    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Deletes the key. Deleting an absent key is not an error.
    async fn delete_now(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Queues the key for deletion at `due_at_millis`.
    async fn schedule_delete(&self, key: &str, due_at_millis: i64) -> Result<()>;

    /// Queues the key for deletion `delay_seconds` from now and returns the
    /// due time.
    async fn enqueue_delayed_delete(&self, key: &str, delay_seconds: u64) -> Result<i64> {
        let due = now_millis() + (delay_seconds as i64).saturating_mul(1000);
        self.schedule_delete(key, due).await?;
        Ok(due)
    }

    /// Queued keys whose due time is at or before `now_millis`, earliest
    /// first. Entries stay queued until removed.
    async fn drain_due(&self, now_millis: i64) -> Result<Vec<String>>;

    async fn remove_from_queue(&self, key: &str) -> Result<bool>;

    /// Removes the task only while its due time is still at or before
    /// `due_by_millis`. A task rescheduled later in the meantime stays queued.
    async fn remove_due_from_queue(&self, key: &str, due_by_millis: i64) -> Result<bool>;

    /// Reservation keys under `prefix`. The cleanup queue is never listed.
    async fn list_keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn get_ttl(&self, key: &str) -> Result<KeyTtl>;

    async fn ping(&self) -> Result<()>;
}

/// Redis-backed reservation store.
///
/// Every command, including connecting, is bounded by `command_timeout`. A
/// timeout surfaces as [`AppError::StoreUnavailable`]: the outcome is unknown,
/// so the caller must not assume the command failed harmlessly.
///
/// One multiplexed connection is shared by all callers. An I/O failure or a
/// timeout discards it and the next command reconnects.
pub struct RedisReservationStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    command_timeout: Duration,
}

impl RedisReservationStore {
    pub fn new(client: redis::Client, command_timeout: Duration) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
            command_timeout,
        }
    }

    pub fn open(url: &str, command_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(AppError::store)?;
        Ok(Self::new(client, command_timeout))
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .bounded("connect", self.client.get_multiplexed_async_connection())
            .await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self, operation: &str) {
        if self.connection.lock().await.take().is_some() {
            warn!("Dropping Redis connection after failed {}, next command reconnects", operation);
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let timer = LatencyTimer::new();
        let (result, broken) = match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => (Ok(value), false),
            Ok(Err(e)) => {
                let broken = connection_broken(&e);
                (Err(AppError::store(e)), broken)
            }
            Err(_) => (
                Err(AppError::StoreUnavailable(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.command_timeout.as_millis()
                ))),
                true,
            ),
        };
        get_metrics().record_store_operation(operation, timer.elapsed_ms(), result.is_ok());

        // "connect" runs under the connection lock and never cached anything.
        if broken && operation != "connect" {
            self.reset_connection(operation).await;
        }
        result
    }
}

/// Errors after which the shared connection cannot be trusted again.
fn connection_broken(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

fn ttl_millis(ttl: Duration) -> usize {
    ttl.as_millis().max(1) as usize
}

fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl ReservationStore for RedisReservationStore {
    async fn try_reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(ttl_millis(ttl)));

        let result: Option<String> = self
            .bounded("try_reserve", conn.set_options(key, RESERVED_VALUE, options))
            .await?;

        Ok(result.is_some())
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::XX)
            .with_expiration(SetExpiry::PX(ttl_millis(ttl)));

        let _: Option<String> = self
            .bounded("refresh_ttl", conn.set_options(key, "", options))
            .await?;

        Ok(())
    }

    async fn delete_now(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self.bounded("delete", conn.del(key)).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        self.bounded("exists", conn.exists(key)).await
    }

    async fn schedule_delete(&self, key: &str, due_at_millis: i64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .bounded("schedule_delete", conn.zadd(DELAY_DELETE_QUEUE, key, due_at_millis))
            .await?;
        Ok(())
    }

    async fn drain_due(&self, now_millis: i64) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        self.bounded(
            "drain_due",
            conn.zrangebyscore(DELAY_DELETE_QUEUE, "-inf", now_millis),
        )
        .await
    }

    async fn remove_from_queue(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = self
            .bounded("remove_from_queue", conn.zrem(DELAY_DELETE_QUEUE, key))
            .await?;
        Ok(removed > 0)
    }

    async fn remove_due_from_queue(&self, key: &str, due_by_millis: i64) -> Result<bool> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(REMOVE_IF_DUE_SCRIPT);
        let mut invocation = script.key(DELAY_DELETE_QUEUE);
        invocation.arg(key).arg(due_by_millis);
        let removed: i64 = self
            .bounded("remove_due_from_queue", invocation.invoke_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", glob_escape(prefix));

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) =
                self.bounded("scan", cmd.query_async(&mut conn)).await?;

            keys.extend(batch.into_iter().filter(|key| key != DELAY_DELETE_QUEUE));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn get_ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.connection().await?;
        let millis: i64 = self.bounded("get_ttl", conn.pttl(key)).await?;
        Ok(KeyTtl::from_pttl(millis))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let cmd = redis::cmd("PING");
        let _: String = self.bounded("ping", cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}

/// Reservation keys always live under [`KEY_PREFIX`]; the queue shares the
/// namespace but is not a reservation.
pub fn is_reservation_key(key: &str) -> bool {
    key.starts_with(KEY_PREFIX) && key != DELAY_DELETE_QUEUE
}
