//! Redis-backed [`HashStore`]
//!
//! Atomic scripts are Lua (see `lua/`), loaded into the script cache at
//! connect time and invoked by SHA with zero KEYS; the storage key travels
//! in ARGV. The connection is a `ConnectionManager`, which reconnects on
//! its own and is cheap to clone per command.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::store::{AtomicScript, HashStore, ScanPage, ScriptCall, StoreResult};

/// Redis connection handle with the atomic scripts attached
#[derive(Clone)]
pub struct RedisHashStore {
    conn: ConnectionManager,
    scripts: Arc<HashMap<AtomicScript, Script>>,
}

impl RedisHashStore {
    /// Connect, load the atomic scripts and probe the server with `INFO`.
    #[instrument(skip_all)]
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("Invalid store url: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let scripts: HashMap<AtomicScript, Script> = AtomicScript::ALL
            .iter()
            .map(|script| (*script, Script::new(&script.lua_source())))
            .collect();

        let store = Self {
            conn,
            scripts: Arc::new(scripts),
        };
        store.load_scripts().await?;
        store.probe().await?;

        info!("Redis store connected and scripts loaded");
        Ok(store)
    }

    async fn load_scripts(&self) -> StoreResult<()> {
        for (kind, script) in self.scripts.iter() {
            let mut conn = self.conn.clone();
            let sha: String = script.prepare_invoke().load_async(&mut conn).await?;
            debug!(script = kind.name(), %sha, "loaded atomic script");
        }
        Ok(())
    }

    async fn probe(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _info: String = redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    #[instrument(skip(self))]
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(fields)
    }

    #[instrument(skip(self))]
    async fn del(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl)
    }

    #[instrument(skip(self))]
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    #[instrument(skip(self, call), fields(script = call.script().name(), key = call.storage_key()))]
    async fn run_script(&self, call: &ScriptCall) -> StoreResult<String> {
        let script = self.scripts.get(&call.script()).ok_or_else(|| {
            StoreError::Backend(format!("script {} not loaded", call.script().name()))
        })?;

        let mut invocation = script.prepare_invoke();
        for arg in call.args() {
            invocation.arg(arg);
        }

        let mut conn = self.conn.clone();
        let reply: String = invocation.invoke_async(&mut conn).await?;
        debug!(%reply, "script finished");
        Ok(reply)
    }
}
