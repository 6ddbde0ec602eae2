//! Ephemeral, Redis-backed storage for in-progress assessment attempts.
//!
//! One attempt is two store keys sharing a TTL lifecycle: a scalar session
//! blob and a hash of answered questions. Answer submissions go through an
//! optimistic-lock retry loop so concurrent writers can never lose,
//! duplicate, or reorder an answer. Grading, attempt numbering, and durable
//! persistence of finished attempts belong to the embedding service.

pub mod core;
pub mod sessions;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use crate::core::config::{ConfigError, SessionSettings, Settings};
pub use crate::core::redis::{RedisHandle, RedisHealth};
pub use crate::sessions::backend::{AnswerBatch, BackendError, CommitOutcome, SessionBackend};
pub use crate::sessions::error::SessionError;
pub use crate::sessions::keys::AttemptKeys;
pub use crate::sessions::model::{AnsweredQuestion, AttemptSession, FinalSummary, SessionView};
pub use crate::sessions::SessionManager;

/// Wires environment settings, telemetry, and a connected Redis handle into
/// a ready [`SessionManager`]. Services that manage their own telemetry or
/// Redis lifecycle should construct the pieces directly instead.
pub async fn connect() -> anyhow::Result<(SessionManager, RedisHandle)> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    core::telemetry::init_tracing(&settings)?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    redis.connect().await?;
    tracing::info!("Redis connected successfully");

    let manager = SessionManager::new(Arc::new(redis.clone()), settings.session().clone());

    Ok((manager, redis))
}
