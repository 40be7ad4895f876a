//! Named store connections
//!
//! Record types refer to their store by connection name. Connections are
//! long-lived and shared: several record types may use the same one.
//! Nothing here locks across processes; correctness of concurrent writes
//! comes from the atomic scripts.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{info, instrument};

use crate::error::{EntityError, ErrorCode};
use crate::redis_store::RedisHashStore;
use crate::store::HashStore;

/// Connection name used when none is configured.
pub const DEFAULT_CONNECTION: &str = "default";

/// Configuration for a store connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store URL (e.g., "redis://127.0.0.1:6379/0")
    pub url: String,
    /// Name record types use to find this connection (default: "default")
    pub connection_name: String,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: DEFAULT_CONNECTION.to_string(),
        }
    }

    /// Set the connection name
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - HASHRECORD_REDIS_URL (required)
    /// - HASHRECORD_CONNECTION (optional, default: "default")
    pub fn from_env() -> std::result::Result<Self, String> {
        let url =
            std::env::var("HASHRECORD_REDIS_URL").map_err(|_| "HASHRECORD_REDIS_URL not set")?;
        let connection_name = std::env::var("HASHRECORD_CONNECTION")
            .unwrap_or_else(|_| DEFAULT_CONNECTION.to_string());

        Ok(Self {
            url,
            connection_name,
        })
    }
}

/// Registry of named store handles.
#[derive(Default)]
pub struct Connections {
    stores: RwLock<HashMap<String, Arc<dyn HashStore>>>,
}

/// The process-wide connection registry used by [`crate::Record`].
pub fn global() -> &'static Connections {
    static CONNECTIONS: OnceLock<Connections> = OnceLock::new();
    CONNECTIONS.get_or_init(Connections::default)
}

impl Connections {
    /// Add a store under `name`. Fails if the name is taken.
    pub fn add(&self, name: &str, store: Arc<dyn HashStore>) -> Result<(), EntityError> {
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        if stores.contains_key(name) {
            return Err(EntityError::ConnectionExists {
                name: name.to_string(),
            });
        }
        stores.insert(name.to_string(), store);
        info!(connection = name, "store connection added");
        Ok(())
    }

    /// Look up a store for `entity`, failing with `noConnection` if absent.
    pub fn get(&self, name: &str, entity: &str) -> Result<Arc<dyn HashStore>, EntityError> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores.get(name).cloned().ok_or_else(|| {
            EntityError::operation(
                ErrorCode::NoConnection,
                entity,
                format!(
                    "store with connection name: \"{name}\" doesn't exist. \
                     Please add a new connection by add_connection(\"{name}\", ...);"
                ),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn HashStore>> {
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        stores.remove(name)
    }
}

/// Add a store to the process-wide registry.
pub fn add_connection(name: &str, store: Arc<dyn HashStore>) -> Result<(), EntityError> {
    global().add(name, store)
}

/// Connect to Redis and register the connection under its configured name.
#[instrument(skip(config), fields(connection = %config.connection_name))]
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn HashStore>, EntityError> {
    if global().contains(&config.connection_name) {
        return Err(EntityError::ConnectionExists {
            name: config.connection_name.clone(),
        });
    }

    let store: Arc<dyn HashStore> = Arc::new(RedisHashStore::connect(&config.url).await?);
    global().add(&config.connection_name, Arc::clone(&store))?;
    Ok(store)
}
