//! Atomic persistence protocol (client side)
//!
//! Builds the script calls for create / update-if / delete-if, sends each
//! as a single round-trip, and turns the script's `{errorCode, message}`
//! reply into a typed [`EntityError`]. The store guarantees that a failed
//! script left the record untouched.
//!
//! Field maps are snapshots on create and merges on update: fields absent
//! from the map keep whatever the store already holds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::codec::{normalize, Values};
use crate::error::{EntityError, StoreError};
use crate::store::{HashStore, ScriptCall, ScriptReply};

/// When a saved record should expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expire {
    /// Relative TTL in seconds; `<= 0` means no expiry.
    Seconds(i64),
    /// Absolute instant, converted to whole seconds from now.
    At(DateTime<Utc>),
}

/// Options for create / update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    pub expire: Option<Expire>,
}

impl SaveOptions {
    pub fn expire_in(seconds: i64) -> Self {
        Self {
            expire: Some(Expire::Seconds(seconds)),
        }
    }

    pub fn expire_at(at: DateTime<Utc>) -> Self {
        Self {
            expire: Some(Expire::At(at)),
        }
    }

    /// TTL argument for the scripts; `0` disables expiry.
    pub fn ttl_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.expire {
            Some(Expire::Seconds(seconds)) => seconds.max(0),
            Some(Expire::At(at)) => {
                let millis = (at - now).num_milliseconds() as f64;
                (millis / 1000.0).round() as i64
            }
            None => 0,
        }
    }
}

/// Normalize every value of a field map.
pub fn normalize_values(values: &Values) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(column, value)| (column.clone(), normalize(value)))
        .collect()
}

fn encode_map(values: &Values) -> Result<String, EntityError> {
    serde_json::to_string(&normalize_values(values))
        .map_err(|e| EntityError::Store(StoreError::from(e)))
}

/// Address of one record in the store.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Type name for error messages
    pub entity: &'a str,
    pub id: &'a str,
    pub storage_key: &'a str,
}

/// Write a fresh record. Fails with `entityAlreadyExists` if one exists.
#[instrument(skip(store, fields, options), fields(entity = target.entity, key = target.storage_key))]
pub async fn create(
    store: &dyn HashStore,
    target: Target<'_>,
    fields: &Values,
    options: SaveOptions,
) -> Result<(), EntityError> {
    let call = ScriptCall::Create {
        id: target.id.to_string(),
        storage_key: target.storage_key.to_string(),
        fields_json: encode_map(fields)?,
        ttl_seconds: options.ttl_seconds(Utc::now()),
    };
    run(store, target.entity, &call).await
}

/// Merge `fields` into an existing record if every condition holds.
///
/// Fails with `entityNotExist` or `conditionNotMatch`. An empty condition
/// map always matches.
#[instrument(skip(store, fields, conditions, options), fields(entity = target.entity, key = target.storage_key))]
pub async fn update_if(
    store: &dyn HashStore,
    target: Target<'_>,
    fields: &Values,
    conditions: &Values,
    options: SaveOptions,
) -> Result<(), EntityError> {
    let call = ScriptCall::Update {
        id: target.id.to_string(),
        storage_key: target.storage_key.to_string(),
        fields_json: encode_map(fields)?,
        ttl_seconds: options.ttl_seconds(Utc::now()),
        conditions_json: encode_map(conditions)?,
    };
    run(store, target.entity, &call).await
}

/// Remove an existing record if every condition holds.
#[instrument(skip(store, conditions), fields(entity = target.entity, key = target.storage_key))]
pub async fn delete_if(
    store: &dyn HashStore,
    target: Target<'_>,
    conditions: &Values,
) -> Result<(), EntityError> {
    let call = ScriptCall::Delete {
        id: target.id.to_string(),
        storage_key: target.storage_key.to_string(),
        conditions_json: encode_map(conditions)?,
    };
    run(store, target.entity, &call).await
}

async fn run(store: &dyn HashStore, entity: &str, call: &ScriptCall) -> Result<(), EntityError> {
    let text = store.run_script(call).await?;
    let reply = ScriptReply::parse(&text)?;
    match reply.error_code {
        Some(code) => {
            debug!(%code, "atomic script rejected the operation");
            Err(EntityError::operation(
                code,
                entity,
                reply.message.unwrap_or_default(),
            ))
        }
        None => Ok(()),
    }
}
