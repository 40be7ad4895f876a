//! Record facade
//!
//! `Record<T>` is an in-memory instance of a registered record type. It is
//! never synchronized implicitly; every read and write is an explicit call:
//!
//! - `create`: full snapshot of every column, fails if the record exists
//! - `update` / `update_if`: merge every column into the existing hash
//! - `delete` / `delete_if`: remove the record if it exists (and matches)
//! - `force_delete`: remove the key unconditionally
//! - `find`, `find_all`, `find_all_ids`, `scan_all_ids`: lookups by id/prefix

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use crate::codec::{denormalize, Value, Values};
use crate::connection;
use crate::error::EntityError;
use crate::keys;
use crate::protocol::{self, SaveOptions, Target};
use crate::registry::{self, EntitySchema, EntityType, ID_COLUMN};
use crate::scan::{self, IdScan};
use crate::store::HashStore;

static UNDEFINED: Value = Value::Undefined;

/// An instance of record type `T`.
pub struct Record<T: EntityType> {
    values: Values,
    _marker: PhantomData<fn() -> T>,
}

impl<T: EntityType> Default for Record<T> {
    fn default() -> Self {
        Self {
            values: Values::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: EntityType> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: EntityType> std::fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(T::entity_name())
            .field("values", &self.values)
            .finish()
    }
}

impl<T: EntityType> Record<T> {
    fn schema() -> Result<EntitySchema, EntityError> {
        registry::global().schema_of::<T>()
    }

    fn store_for(schema: &EntitySchema) -> Result<Arc<dyn HashStore>, EntityError> {
        connection::global().get(&schema.meta.connection, schema.name)
    }

    /// Build an instance from `(column, value)` pairs.
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Self::default();
        record.set_values(values);
        record
    }

    /// Namespace of the record type.
    pub fn namespace() -> Result<String, EntityError> {
        Ok(registry::global()
            .entity_meta_of::<T>()?
            .namespace
            .clone())
    }

    /// Copy registered columns from `values`; unknown names are dropped.
    pub fn set_values<I, K, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let columns = registry::global().columns_of::<T>();
        for (column, value) in values {
            let column = column.into();
            if columns.iter().any(|c| c.name == column) {
                self.values.insert(column, value.into());
            } else {
                warn!(entity = T::entity_name(), %column, "ignoring unknown column");
            }
        }
        self
    }

    /// Every registered column, `Undefined` where unset.
    pub fn get_values(&self) -> Values {
        registry::global()
            .columns_of::<T>()
            .iter()
            .map(|c| (c.name.clone(), self.get(&c.name).clone()))
            .collect()
    }

    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&UNDEFINED)
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.set_values([(column, value.into())])
    }

    pub fn id(&self) -> &Value {
        self.get(ID_COLUMN)
    }

    fn storage_key(&self, schema: &EntitySchema) -> Result<(String, String), EntityError> {
        let id = keys::validate_id(schema.name, self.id())?;
        Ok((id.to_string(), keys::storage_key(&schema.meta.namespace, id)))
    }

    /// Persist as a new record. Fails with `entityAlreadyExists` if the id is taken.
    #[instrument(skip(self), fields(entity = T::entity_name(), id = ?self.id()))]
    pub async fn create(&self, options: SaveOptions) -> Result<(), EntityError> {
        let schema = Self::schema()?;
        let (id, storage_key) = self.storage_key(&schema)?;
        let store = Self::store_for(&schema)?;

        let target = Target {
            entity: schema.name,
            id: &id,
            storage_key: &storage_key,
        };
        protocol::create(store.as_ref(), target, &self.get_values(), options).await?;
        debug!("record created");
        Ok(())
    }

    /// Merge into the stored record. Fails with `entityNotExist` if absent.
    pub async fn update(&self, options: SaveOptions) -> Result<(), EntityError> {
        self.update_if(Values::new(), options).await
    }

    /// Merge into the stored record if every condition matches the stored
    /// value (type and content). Fails with `conditionNotMatch` otherwise.
    #[instrument(skip(self, conditions), fields(entity = T::entity_name(), id = ?self.id()))]
    pub async fn update_if(
        &self,
        conditions: Values,
        options: SaveOptions,
    ) -> Result<(), EntityError> {
        let schema = Self::schema()?;
        let (id, storage_key) = self.storage_key(&schema)?;
        let store = Self::store_for(&schema)?;

        let target = Target {
            entity: schema.name,
            id: &id,
            storage_key: &storage_key,
        };
        protocol::update_if(
            store.as_ref(),
            target,
            &self.get_values(),
            &conditions,
            options,
        )
        .await?;
        debug!("record updated");
        Ok(())
    }

    /// Remove the stored record. Fails with `entityNotExist` if absent.
    pub async fn delete(&self) -> Result<(), EntityError> {
        self.delete_if(Values::new()).await
    }

    /// Remove the stored record if every condition matches.
    #[instrument(skip(self, conditions), fields(entity = T::entity_name(), id = ?self.id()))]
    pub async fn delete_if(&self, conditions: Values) -> Result<(), EntityError> {
        let schema = Self::schema()?;
        let (id, storage_key) = self.storage_key(&schema)?;
        let store = Self::store_for(&schema)?;

        let target = Target {
            entity: schema.name,
            id: &id,
            storage_key: &storage_key,
        };
        protocol::delete_if(store.as_ref(), target, &conditions).await?;
        debug!("record deleted");
        Ok(())
    }

    /// Remove the key whether or not a record exists. Returns whether
    /// anything was removed.
    #[instrument(skip(self), fields(entity = T::entity_name(), id = ?self.id()))]
    pub async fn force_delete(&self) -> Result<bool, EntityError> {
        let schema = Self::schema()?;
        let (_, storage_key) = self.storage_key(&schema)?;
        let store = Self::store_for(&schema)?;
        Ok(store.del(&storage_key).await? == 1)
    }

    /// Seconds to live: `>= 0` remaining, `-1` no expiry, `-2` absent.
    pub async fn get_expire(&self) -> Result<i64, EntityError> {
        let schema = Self::schema()?;
        let (_, storage_key) = self.storage_key(&schema)?;
        let store = Self::store_for(&schema)?;
        Ok(store.ttl(&storage_key).await?)
    }

    /// Load a record by id; `None` if no record is stored under it.
    #[instrument(fields(entity = T::entity_name()))]
    pub async fn find(id: &str) -> Result<Option<Self>, EntityError> {
        let schema = Self::schema()?;
        let store = Self::store_for(&schema)?;
        let storage_key = keys::storage_key(&schema.meta.namespace, id);
        let stored = store.hgetall(&storage_key).await?;

        if !stored.contains_key(ID_COLUMN) {
            return Ok(None);
        }

        let mut record = Self::default();
        for column in schema.columns.iter() {
            if let Some(text) = stored.get(&column.name) {
                let value = denormalize(text, column.meta.decode_options());
                record.values.insert(column.name.clone(), value);
            }
        }
        Ok(Some(record))
    }

    /// Load every record whose id starts with `prefix`.
    ///
    /// Ids that stop resolving between the scan and the fetch (deleted or
    /// expired meanwhile) are left out.
    #[instrument(fields(entity = T::entity_name()))]
    pub async fn find_all(prefix: &str) -> Result<Vec<Self>, EntityError> {
        let ids = Self::find_all_ids(prefix).await?;
        let found = try_join_all(ids.iter().map(|id| Self::find(id))).await?;
        let records: Vec<Self> = found.into_iter().flatten().collect();
        debug!(scanned = ids.len(), found = records.len(), "find_all complete");
        Ok(records)
    }

    /// Ids of every record whose id starts with `prefix`.
    pub async fn find_all_ids(prefix: &str) -> Result<Vec<String>, EntityError> {
        let schema = Self::schema()?;
        let store = Self::store_for(&schema)?;
        scan::find_all_ids(store.as_ref(), &schema.meta.namespace, prefix).await
    }

    /// Lazily stream id batches for records whose id starts with `prefix`.
    pub fn scan_all_ids(prefix: &str) -> Result<IdScan, EntityError> {
        let schema = Self::schema()?;
        let store = Self::store_for(&schema)?;
        Ok(scan::scan_all_ids(store, &schema.meta.namespace, prefix))
    }
}
