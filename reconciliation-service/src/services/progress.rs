//! Advisory progress mirror for in-flight batches.
//!
//! The mirror is a fast-path counter store keyed by batch id. It is
//! never authoritative: every write is best-effort with failures
//! logged and swallowed, and every reader must fall back to the
//! database. A deployment without Redis gets the no-op implementation.

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use uuid::Uuid;

/// Counter snapshot mirrored for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: i64,
    pub processed: i64,
    pub auto_matched: i64,
    pub needs_review: i64,
    pub unmatched: i64,
    pub status: Option<String>,
}

/// Per-chunk counter deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressDelta {
    pub processed: i64,
    pub auto_matched: i64,
    pub needs_review: i64,
    pub unmatched: i64,
}

#[async_trait]
pub trait ProgressMirror: Send + Sync {
    async fn init(&self, batch_id: Uuid);
    async fn set_total(&self, batch_id: Uuid, total: i64);
    async fn increment(&self, batch_id: Uuid, delta: ProgressDelta);
    async fn set_status(&self, batch_id: Uuid, status: &str);
    async fn get(&self, batch_id: Uuid) -> Option<BatchProgress>;
    async fn clear(&self, batch_id: Uuid);
}

/// Mirrored entries expire on their own so abandoned batches do not
/// accumulate in Redis.
const PROGRESS_TTL_SECONDS: i64 = 24 * 60 * 60;

fn progress_key(batch_id: Uuid) -> String {
    format!("reconciliation:progress:{batch_id}")
}

#[derive(Clone)]
pub struct RedisProgressMirror {
    manager: ConnectionManager,
}

impl RedisProgressMirror {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    async fn try_init(&self, batch_id: Uuid) -> Result<(), redis::RedisError> {
        let mut conn = self.manager.clone();
        let key = progress_key(batch_id);
        redis::pipe()
            .del(&key)
            .hset(&key, "total", 0i64)
            .hset(&key, "processed", 0i64)
            .hset(&key, "auto_matched", 0i64)
            .hset(&key, "needs_review", 0i64)
            .hset(&key, "unmatched", 0i64)
            .hset(&key, "status", "processing")
            .expire(&key, PROGRESS_TTL_SECONDS)
            .query_async::<_, ()>(&mut conn)
            .await
    }

    async fn try_increment(
        &self,
        batch_id: Uuid,
        delta: ProgressDelta,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.manager.clone();
        let key = progress_key(batch_id);
        let mut pipe = redis::pipe();
        for (field, amount) in [
            ("processed", delta.processed),
            ("auto_matched", delta.auto_matched),
            ("needs_review", delta.needs_review),
            ("unmatched", delta.unmatched),
        ] {
            if amount != 0 {
                pipe.cmd("HINCRBY").arg(&key).arg(field).arg(amount);
            }
        }
        pipe.expire(&key, PROGRESS_TTL_SECONDS)
            .query_async::<_, ()>(&mut conn)
            .await
    }

    async fn try_get(&self, batch_id: Uuid) -> Result<Option<BatchProgress>, redis::RedisError> {
        let mut conn = self.manager.clone();
        let raw: std::collections::HashMap<String, String> =
            conn.hgetall(progress_key(batch_id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| {
            raw.get(name)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };

        Ok(Some(BatchProgress {
            total: field("total"),
            processed: field("processed"),
            auto_matched: field("auto_matched"),
            needs_review: field("needs_review"),
            unmatched: field("unmatched"),
            status: raw.get("status").cloned(),
        }))
    }
}

#[async_trait]
impl ProgressMirror for RedisProgressMirror {
    async fn init(&self, batch_id: Uuid) {
        if let Err(e) = self.try_init(batch_id).await {
            tracing::warn!(batch_id = %batch_id, error = %e, "Progress mirror init failed");
        }
    }

    async fn set_total(&self, batch_id: Uuid, total: i64) {
        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> =
            conn.hset(progress_key(batch_id), "total", total).await;
        if let Err(e) = result {
            tracing::warn!(batch_id = %batch_id, error = %e, "Progress mirror set_total failed");
        }
    }

    async fn increment(&self, batch_id: Uuid, delta: ProgressDelta) {
        if let Err(e) = self.try_increment(batch_id, delta).await {
            tracing::warn!(batch_id = %batch_id, error = %e, "Progress mirror increment failed");
        }
    }

    async fn set_status(&self, batch_id: Uuid, status: &str) {
        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> =
            conn.hset(progress_key(batch_id), "status", status).await;
        if let Err(e) = result {
            tracing::warn!(batch_id = %batch_id, error = %e, "Progress mirror set_status failed");
        }
    }

    async fn get(&self, batch_id: Uuid) -> Option<BatchProgress> {
        match self.try_get(batch_id).await {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(batch_id = %batch_id, error = %e, "Progress mirror read failed");
                None
            }
        }
    }

    async fn clear(&self, batch_id: Uuid) {
        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> = conn.del(progress_key(batch_id)).await;
        if let Err(e) = result {
            tracing::warn!(batch_id = %batch_id, error = %e, "Progress mirror clear failed");
        }
    }
}

/// Selected at startup when no Redis URL is configured. Readers always
/// fall back to the authoritative store.
pub struct NoopProgressMirror;

#[async_trait]
impl ProgressMirror for NoopProgressMirror {
    async fn init(&self, _batch_id: Uuid) {}
    async fn set_total(&self, _batch_id: Uuid, _total: i64) {}
    async fn increment(&self, _batch_id: Uuid, _delta: ProgressDelta) {}
    async fn set_status(&self, _batch_id: Uuid, _status: &str) {}
    async fn get(&self, _batch_id: Uuid) -> Option<BatchProgress> {
        None
    }
    async fn clear(&self, _batch_id: Uuid) {}
}

/// In-memory mirror for tests.
#[derive(Default)]
pub struct InMemoryProgressMirror {
    entries: std::sync::Mutex<std::collections::HashMap<Uuid, BatchProgress>>,
}

#[async_trait]
impl ProgressMirror for InMemoryProgressMirror {
    async fn init(&self, batch_id: Uuid) {
        let mut entries = self.entries.lock().expect("mirror lock");
        entries.insert(
            batch_id,
            BatchProgress {
                status: Some("processing".to_string()),
                ..BatchProgress::default()
            },
        );
    }

    async fn set_total(&self, batch_id: Uuid, total: i64) {
        let mut entries = self.entries.lock().expect("mirror lock");
        entries.entry(batch_id).or_default().total = total;
    }

    async fn increment(&self, batch_id: Uuid, delta: ProgressDelta) {
        let mut entries = self.entries.lock().expect("mirror lock");
        let entry = entries.entry(batch_id).or_default();
        entry.processed += delta.processed;
        entry.auto_matched += delta.auto_matched;
        entry.needs_review += delta.needs_review;
        entry.unmatched += delta.unmatched;
    }

    async fn set_status(&self, batch_id: Uuid, status: &str) {
        let mut entries = self.entries.lock().expect("mirror lock");
        entries.entry(batch_id).or_default().status = Some(status.to_string());
    }

    async fn get(&self, batch_id: Uuid) -> Option<BatchProgress> {
        let entries = self.entries.lock().expect("mirror lock");
        entries.get(&batch_id).cloned()
    }

    async fn clear(&self, batch_id: Uuid) {
        let mut entries = self.entries.lock().expect("mirror lock");
        entries.remove(&batch_id);
    }
}
