use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// One atomic answer commit: the hash-field write, the scalar session
/// rewrite, and the TTL refresh on the hash key, conditioned on the session
/// key still holding `expected_session`.
#[derive(Debug, Clone, Copy)]
pub struct AnswerBatch<'a> {
    pub session_key: &'a str,
    /// The exact serialized session the caller's ordering decision was based
    /// on. Any divergence means a concurrent writer won the race.
    pub expected_session: &'a str,
    pub new_session: &'a str,
    pub questions_key: &'a str,
    pub field: &'a str,
    pub payload: &'a str,
    /// `false` keeps first-write-wins semantics for the hash field (HSETNX);
    /// `true` replaces unconditionally (HSET).
    pub overwrite: bool,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The batch was applied. `wrote_field` is true when the answer payload
    /// was stored by this commit: always in overwrite mode, and only for a
    /// previously absent field otherwise.
    Committed { wrote_field: bool },
    /// The watched session key changed between snapshot and execution; the
    /// whole read-modify-write cycle must be retried.
    Conflict,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("session store backend is not connected")]
    NotConnected,
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Store operations the session manager needs. The production implementation
/// is `RedisHandle`; tests substitute a deterministic in-memory backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), BackendError>;

    /// Rewrites `key` while leaving its remaining TTL untouched
    /// (`SET ... KEEPTTL`).
    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Refreshes the TTL on `key`. A no-op if the key does not exist.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), BackendError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError>;

    async fn delete(&self, keys: &[&str]) -> Result<(), BackendError>;

    /// Executes the optimistic-lock transaction described by `batch`.
    async fn commit_answer(&self, batch: AnswerBatch<'_>) -> Result<CommitOutcome, BackendError>;
}
