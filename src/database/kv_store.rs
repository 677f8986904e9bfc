use std::sync::Arc;

use anyhow::{Context, Result};
use mockall::automock;
use tracing::{info, warn};

use super::{ManagedKvStore, MemoryStore, RedisDatabase};
use crate::config::StorageBackend;

pub type DynKeyValueStore = Arc<dyn KeyValueStore + Send + Sync>;

/// the whole contract every backend has to honour, get and set by key and nothing else. No
/// transactions, callers that need read-modify-write serialize on their side
#[automock]
#[async_trait::async_trait]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// short name for logs
    fn backend_name(&self) -> &'static str;
}

/// opens whichever backend the config settled on
pub async fn connect_store(backend: &StorageBackend) -> anyhow::Result<DynKeyValueStore> {
    let store: DynKeyValueStore = match backend {
        StorageBackend::Managed { url, token } => {
            info!("using managed kv store for sessions");
            Arc::new(ManagedKvStore::new(url, token)?)
        }
        StorageBackend::Redis(url) => {
            info!("connecting to redis...");
            let redis = RedisDatabase::connect(url)
                .await
                .context("where is the redis connection!!")?;
            match redis.health_check().await {
                Ok(ms) => info!("redis ok, ping {:.2}ms", ms),
                Err(e) => warn!("redis connected but ping failed: {}", e),
            }
            Arc::new(redis)
        }
        StorageBackend::Memory => {
            warn!("no kv store configured, session tokens live in memory and die with the process");
            Arc::new(MemoryStore::new())
        }
    };

    Ok(store)
}
