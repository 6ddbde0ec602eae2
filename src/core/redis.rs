use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

use crate::sessions::backend::{AnswerBatch, BackendError, CommitOutcome, SessionBackend};

/// Shared Redis handle. Routine commands go through a multiplexed
/// `ConnectionManager`; the optimistic-lock transaction opens a dedicated
/// connection per commit, because WATCH state is per-connection and a
/// multiplexed connection would interleave other callers' commands into it.
#[derive(Clone)]
pub struct RedisHandle {
    url: String,
    client: Arc<RwLock<Option<Client>>>,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub fn new(url: String) -> Self {
        Self { url, client: Arc::new(RwLock::new(None)), manager: Arc::new(RwLock::new(None)) }
    }

    pub async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client.clone()).await?;
        let mut client_guard = self.client.write().await;
        let mut manager_guard = self.manager.write().await;
        *client_guard = Some(client);
        *manager_guard = Some(manager);
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut client_guard = self.client.write().await;
        let mut manager_guard = self.manager.write().await;
        *client_guard = None;
        *manager_guard = None;
    }

    pub async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    async fn manager(&self) -> Result<ConnectionManager, BackendError> {
        self.manager.read().await.clone().ok_or(BackendError::NotConnected)
    }

    async fn watch_connection(&self) -> Result<redis::aio::Connection, BackendError> {
        let client = { self.client.read().await.clone() }.ok_or(BackendError::NotConnected)?;
        Ok(client.get_async_connection().await?)
    }
}

#[async_trait]
impl SessionBackend for RedisHandle {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut manager = self.manager().await?;
        Ok(cmd("GET").arg(key).query_async(&mut manager).await?)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), BackendError> {
        let mut manager = self.manager().await?;
        cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut manager)
            .await?;
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut manager = self.manager().await?;
        cmd("SET").arg(key).arg(value).arg("KEEPTTL").query_async::<_, ()>(&mut manager).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), BackendError> {
        let mut manager = self.manager().await?;
        cmd("EXPIRE").arg(key).arg(ttl_seconds as i64).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        let mut manager = self.manager().await?;
        Ok(cmd("HGETALL").arg(key).query_async(&mut manager).await?)
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), BackendError> {
        let mut manager = self.manager().await?;
        cmd("DEL").arg(keys).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    /// WATCH-then-MULTI/EXEC. The snapshot comparison closes the window
    /// between the caller's read and the WATCH; the watch itself closes the
    /// window between the comparison and EXEC. A nil EXEC reply means the
    /// watched key was touched and the whole cycle must be retried.
    async fn commit_answer(&self, batch: AnswerBatch<'_>) -> Result<CommitOutcome, BackendError> {
        let mut conn = self.watch_connection().await?;

        cmd("WATCH").arg(batch.session_key).query_async::<_, ()>(&mut conn).await?;

        let current: Option<String> =
            cmd("GET").arg(batch.session_key).query_async(&mut conn).await?;
        if current.as_deref() != Some(batch.expected_session) {
            cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
            return Ok(CommitOutcome::Conflict);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        if batch.overwrite {
            pipe.cmd("HSET").arg(batch.questions_key).arg(batch.field).arg(batch.payload);
        } else {
            pipe.cmd("HSETNX").arg(batch.questions_key).arg(batch.field).arg(batch.payload);
        }
        pipe.cmd("SET")
            .arg(batch.session_key)
            .arg(batch.new_session)
            .arg("EX")
            .arg(batch.ttl_seconds);
        pipe.cmd("EXPIRE").arg(batch.questions_key).arg(batch.ttl_seconds as i64);

        let reply: Option<(i64, (), i64)> = pipe.query_async(&mut conn).await?;
        match reply {
            None => Ok(CommitOutcome::Conflict),
            Some((field_written, (), _)) => {
                Ok(CommitOutcome::Committed { wrote_field: batch.overwrite || field_written == 1 })
            }
        }
    }
}
