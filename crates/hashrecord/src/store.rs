//! Key-value store boundary
//!
//! [`HashStore`] is the narrow slice of a hash-oriented key-value engine
//! that records need: hash reads, key deletion, TTL queries, cursor scans
//! and the three atomic scripts. Implementations:
//! - [`crate::redis_store::RedisHashStore`]: Redis, scripts run as Lua
//! - [`crate::fakes::MemoryHashStore`]: in-process, for tests
//!
//! A script call must execute as one indivisible step on the store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, StoreError};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// TTL reply for a key that exists without expiry.
pub const TTL_NO_EXPIRY: i64 = -1;
/// TTL reply for a key that does not exist.
pub const TTL_MISSING: i64 = -2;

const LUA_SHARED: &str = include_str!("../lua/shared.lua");
const LUA_CREATE: &str = include_str!("../lua/atomic_create.lua");
const LUA_UPDATE: &str = include_str!("../lua/atomic_update.lua");
const LUA_DELETE: &str = include_str!("../lua/atomic_delete.lua");

/// The server-side atomic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicScript {
    Create,
    Update,
    Delete,
}

impl AtomicScript {
    pub const ALL: [AtomicScript; 3] = [
        AtomicScript::Create,
        AtomicScript::Update,
        AtomicScript::Delete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AtomicScript::Create => "atomicCreate",
            AtomicScript::Update => "atomicUpdate",
            AtomicScript::Delete => "atomicDelete",
        }
    }

    /// Full Lua source: shared helpers followed by the script body.
    pub fn lua_source(&self) -> String {
        let body = match self {
            AtomicScript::Create => LUA_CREATE,
            AtomicScript::Update => LUA_UPDATE,
            AtomicScript::Delete => LUA_DELETE,
        };
        format!("{}\n{}", LUA_SHARED, body)
    }
}

/// One invocation of an atomic script with its positional arguments.
///
/// Field and condition maps travel as JSON objects of normalized values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCall {
    Create {
        id: String,
        storage_key: String,
        fields_json: String,
        ttl_seconds: i64,
    },
    Update {
        id: String,
        storage_key: String,
        fields_json: String,
        ttl_seconds: i64,
        conditions_json: String,
    },
    Delete {
        id: String,
        storage_key: String,
        conditions_json: String,
    },
}

impl ScriptCall {
    pub fn script(&self) -> AtomicScript {
        match self {
            ScriptCall::Create { .. } => AtomicScript::Create,
            ScriptCall::Update { .. } => AtomicScript::Update,
            ScriptCall::Delete { .. } => AtomicScript::Delete,
        }
    }

    pub fn storage_key(&self) -> &str {
        match self {
            ScriptCall::Create { storage_key, .. }
            | ScriptCall::Update { storage_key, .. }
            | ScriptCall::Delete { storage_key, .. } => storage_key,
        }
    }

    /// Script arguments in ARGV order.
    pub fn args(&self) -> Vec<String> {
        match self {
            ScriptCall::Create {
                id,
                storage_key,
                fields_json,
                ttl_seconds,
            } => vec![
                id.clone(),
                storage_key.clone(),
                fields_json.clone(),
                ttl_seconds.to_string(),
            ],
            ScriptCall::Update {
                id,
                storage_key,
                fields_json,
                ttl_seconds,
                conditions_json,
            } => vec![
                id.clone(),
                storage_key.clone(),
                fields_json.clone(),
                ttl_seconds.to_string(),
                conditions_json.clone(),
            ],
            ScriptCall::Delete {
                id,
                storage_key,
                conditions_json,
            } => vec![id.clone(), storage_key.clone(), conditions_json.clone()],
        }
    }
}

/// JSON reply of an atomic script: `{}` on success,
/// `{"errorCode": "...", "message": "..."}` on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptReply {
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScriptReply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code),
            message: Some(message.into()),
        }
    }

    pub fn parse(text: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> String {
        // a struct of Option<enum>/Option<String> always serializes
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A page of scan results. `cursor == 0` means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Hash-oriented key-value store with atomic scripting.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// All fields of the hash at `key`; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Delete a key, returning the number of keys removed.
    async fn del(&self, key: &str) -> StoreResult<u64>;

    /// Seconds to live: `>= 0` remaining, [`TTL_NO_EXPIRY`], or [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// One step of a cursor scan over keys matching a glob `pattern`.
    ///
    /// `count` is a hint for how much of the keyspace to visit per call;
    /// a page may be empty while the cursor is still non-zero.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage>;

    /// Execute an atomic script and return its raw JSON reply.
    async fn run_script(&self, call: &ScriptCall) -> StoreResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_parsing() {
        assert_eq!(ScriptReply::parse("{}").unwrap(), ScriptReply::ok());
        let reply =
            ScriptReply::parse(r#"{"errorCode":"entityNotExist","message":"entity not exist"}"#)
                .unwrap();
        assert_eq!(reply.error_code, Some(ErrorCode::EntityNotExist));
        assert_eq!(reply.message.as_deref(), Some("entity not exist"));
        assert!(ScriptReply::parse("not json").is_err());
    }

    #[test]
    fn test_reply_serialization_skips_empty_fields() {
        assert_eq!(ScriptReply::ok().to_json(), "{}");
        let json = ScriptReply::error(ErrorCode::ConditionNotMatch, "condition not match").to_json();
        assert_eq!(
            json,
            r#"{"errorCode":"conditionNotMatch","message":"condition not match"}"#
        );
    }

    #[test]
    fn test_script_args_order() {
        let call = ScriptCall::Update {
            id: "p-1".into(),
            storage_key: "Player:p-1".into(),
            fields_json: "{}".into(),
            ttl_seconds: 30,
            conditions_json: r#"{"n":"n|1"}"#.into(),
        };
        assert_eq!(call.script(), AtomicScript::Update);
        assert_eq!(call.storage_key(), "Player:p-1");
        assert_eq!(
            call.args(),
            ["p-1", "Player:p-1", "{}", "30", r#"{"n":"n|1"}"#]
        );
    }

    #[test]
    fn test_lua_sources_include_shared_helpers() {
        for script in AtomicScript::ALL {
            let source = script.lua_source();
            assert!(source.contains("local function reply"));
            assert!(source.contains("return"));
        }
    }
}
