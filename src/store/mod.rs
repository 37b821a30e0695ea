//! Backing store adapter
//!
//! Every component that persists state talks to an `Arc<dyn KvStore>`. The
//! trait exposes the handful of primitives the job subsystem needs: hash-like
//! records with partial-field upsert and a rolling TTL, plus named lists with
//! a blocking pop.
//!
//! Two backends exist:
//! - [`FjallStore`]: embedded fjall keyspace on local disk (default)
//! - `RedisStore`: external Redis server, behind the `redis` cargo feature

mod fjall_store;
#[cfg(feature = "redis")]
mod redis_store;

pub use fjall_store::FjallStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Field map of a single record
pub type Fields = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("List entry is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backing store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Create the record or merge `fields` into it, then re-arm its TTL.
    /// Fields not named keep their current value.
    async fn set_fields(&self, key: &str, fields: &[(&str, String)], ttl: Duration)
    -> Result<()>;

    /// Merge `fields` and re-arm the TTL only if the record is still live.
    ///
    /// Returns `false` when the record does not exist; nothing is written.
    async fn update_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<bool>;

    /// Read all fields. Expired and never-written records both yield `None`.
    async fn get_fields(&self, key: &str) -> Result<Option<Fields>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append `value` to the tail of `list`
    async fn push(&self, list: &str, value: &str) -> Result<()>;

    /// Remove and return the head of `list`, waiting for as long as it takes
    async fn blocking_pop(&self, list: &str) -> Result<String>;

    async fn list_len(&self, list: &str) -> Result<usize>;

    /// Round-trip check used at startup and by `/health`
    async fn ping(&self) -> Result<()>;

    /// Physically drop records whose TTL has elapsed. Backends with native
    /// expiry have nothing to do.
    async fn prune_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Make pending writes durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the configured backend and verify it answers
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.backend {
        StoreBackend::Fjall => Arc::new(FjallStore::open(&config.path)?),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| StoreError::Unavailable("store.redis_url is not set".into()))?;
            Arc::new(RedisStore::connect(url).await?)
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            return Err(StoreError::Unavailable(
                "redis backend requested but fastunduh was built without the `redis` feature"
                    .into(),
            ));
        }
    };

    store.ping().await?;
    info!(backend = store.backend(), "Backing store ready");
    Ok(store)
}
