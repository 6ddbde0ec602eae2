use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::sessions::backend::{AnswerBatch, BackendError, CommitOutcome, SessionBackend};

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<AsyncMutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(AsyncMutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    // Load .env so REDIS_PASSWORD and friends are available locally
    dotenvy::dotenv().ok();

    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", "1");
    std::env::remove_var("REDIS_PASSWORD");
}

pub(crate) async fn reset_redis(url: String) -> redis::RedisResult<()> {
    let client = redis::Client::open(url)?;
    let mut manager = redis::aio::ConnectionManager::new(client).await?;
    redis::cmd("FLUSHDB").query_async::<_, ()>(&mut manager).await?;
    Ok(())
}

type Interference = Box<dyn FnOnce(&mut MemoryState) + Send>;

#[derive(Default)]
pub(crate) struct MemoryState {
    pub(crate) kv: HashMap<String, String>,
    pub(crate) hashes: HashMap<String, HashMap<String, String>>,
    pub(crate) ttls: HashMap<String, u64>,
}

/// Deterministic in-memory `SessionBackend` mirroring the Redis semantics
/// the manager relies on: snapshot-compare commits, HSETNX first-write-wins,
/// EXPIRE as a no-op on absent keys, KEEPTTL rewrites.
///
/// Fault injection: `disconnect` makes every call fail with `NotConnected`;
/// `force_conflicts` makes the next N commits report a conflict without
/// applying anything; `interfere_once` runs a competing mutation inside the
/// next commit, before the snapshot comparison, exactly where a concurrent
/// writer would land.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    state: Mutex<MemoryState>,
    disconnected: AtomicBool,
    forced_conflicts: AtomicU32,
    interference: Mutex<Option<Interference>>,
    commit_calls: AtomicU32,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn force_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub(crate) fn interfere_once(&self, hook: impl FnOnce(&mut MemoryState) + Send + 'static) {
        *self.interference.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().kv.get(key).cloned()
    }

    pub(crate) fn put_raw(&self, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state.kv.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn hash_field(&self, key: &str, field: &str) -> Option<String> {
        self.state.lock().unwrap().hashes.get(key).and_then(|fields| fields.get(field)).cloned()
    }

    pub(crate) fn put_hash_field(&self, key: &str, field: &str, payload: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), payload.to_string());
    }

    pub(crate) fn ttl(&self, key: &str) -> Option<u64> {
        self.state.lock().unwrap().ttls.get(key).copied()
    }

    pub(crate) fn set_ttl(&self, key: &str, ttl_seconds: u64) {
        self.state.lock().unwrap().ttls.insert(key.to_string(), ttl_seconds);
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BackendError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.ensure_connected()?;
        Ok(self.raw(key))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        state.kv.insert(key.to_string(), value.to_string());
        state.ttls.insert(key.to_string(), ttl_seconds);
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        state.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        if state.kv.contains_key(key) || state.hashes.contains_key(key) {
            state.ttls.insert(key.to_string(), ttl_seconds);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        self.ensure_connected()?;
        Ok(self.state.lock().unwrap().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.kv.remove(*key);
            state.hashes.remove(*key);
            state.ttls.remove(*key);
        }
        Ok(())
    }

    async fn commit_answer(&self, batch: AnswerBatch<'_>) -> Result<CommitOutcome, BackendError> {
        self.ensure_connected()?;
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();

        if let Some(hook) = self.interference.lock().unwrap().take() {
            hook(&mut state);
        }

        let forced = self.forced_conflicts.load(Ordering::SeqCst);
        if forced > 0 {
            self.forced_conflicts.store(forced - 1, Ordering::SeqCst);
            return Ok(CommitOutcome::Conflict);
        }

        if state.kv.get(batch.session_key).map(String::as_str) != Some(batch.expected_session) {
            return Ok(CommitOutcome::Conflict);
        }

        let fields = state.hashes.entry(batch.questions_key.to_string()).or_default();
        let wrote_field = if batch.overwrite {
            fields.insert(batch.field.to_string(), batch.payload.to_string());
            true
        } else if fields.contains_key(batch.field) {
            false
        } else {
            fields.insert(batch.field.to_string(), batch.payload.to_string());
            true
        };

        state.kv.insert(batch.session_key.to_string(), batch.new_session.to_string());
        state.ttls.insert(batch.session_key.to_string(), batch.ttl_seconds);
        state.ttls.insert(batch.questions_key.to_string(), batch.ttl_seconds);

        Ok(CommitOutcome::Committed { wrote_field })
    }
}
