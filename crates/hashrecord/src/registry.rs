//! Process-wide metadata registry
//!
//! Maps a record type to its namespace, connection name and column list.
//! Types are declared once at startup through [`EntityBuilder`] and the
//! registry is read-only afterwards. Registration is append-only: the
//! first registration of a type wins and later ones are ignored.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::codec::DecodeOptions;
use crate::error::EntityError;
use crate::keys;

/// Name of the mandatory id column.
pub const ID_COLUMN: &str = "id";

/// Marker trait for record types.
///
/// Implement it on a (usually empty) type and declare the type's columns
/// with [`EntityBuilder`] before using [`crate::Record`] with it.
pub trait EntityType: Send + Sync + 'static {
    /// Name reported in error messages.
    fn entity_name() -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Declared value type of a column.
///
/// Only used to assert at registration time that `id` is a string;
/// values themselves are dynamically typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    BigInt,
    Date,
    Json,
    Any,
}

/// Per-column options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Rehydrate ISO-8601 strings inside object values into dates.
    pub parse_date: bool,
}

impl ColumnMeta {
    pub fn parse_date() -> Self {
        Self { parse_date: true }
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            parse_date: self.parse_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub meta: ColumnMeta,
}

/// Per-type entity metadata. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    /// Key prefix; must be non-empty and free of `:`
    pub namespace: String,
    /// Name of the connection in [`crate::connection`]
    pub connection: String,
}

impl EntityMeta {
    pub fn new(namespace: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            connection: connection.into(),
        }
    }
}

/// Everything the facade needs to address and (de)serialize a type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: &'static str,
    pub meta: Arc<EntityMeta>,
    pub columns: Arc<Vec<ColumnDef>>,
}

impl EntitySchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    entities: HashMap<TypeId, Arc<EntityMeta>>,
    columns: HashMap<TypeId, Arc<Vec<ColumnDef>>>,
}

/// Registry of entity and column metadata keyed by type identity.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

/// The process-wide registry used by [`crate::Record`].
pub fn global() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

impl Registry {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a column to a type. Re-adding a column replaces its options.
    pub fn register_column<T: EntityType>(
        &self,
        name: &str,
        column_type: ColumnType,
        meta: ColumnMeta,
    ) -> Result<(), EntityError> {
        if name == ID_COLUMN && column_type != ColumnType::String {
            return Err(EntityError::declaration(
                T::entity_name(),
                "id must be in the type of string.",
            ));
        }

        let mut inner = self.write();
        let columns = Arc::make_mut(inner.columns.entry(TypeId::of::<T>()).or_default());
        let def = ColumnDef {
            name: name.to_string(),
            column_type,
            meta,
        };
        match columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = def,
            None => columns.push(def),
        }
        Ok(())
    }

    /// Register a type's entity metadata. Columns must be registered first.
    pub fn register_type<T: EntityType>(&self, meta: EntityMeta) -> Result<(), EntityError> {
        if !keys::is_valid_namespace(&meta.namespace) {
            return Err(EntityError::declaration(
                T::entity_name(),
                "namespace must not be empty or contains \":\".",
            ));
        }
        if !self.has_id::<T>() {
            return Err(EntityError::declaration(
                T::entity_name(),
                "No id exist for this entity.",
            ));
        }

        let mut inner = self.write();
        inner.entities.entry(TypeId::of::<T>()).or_insert_with(|| {
            debug!(
                entity = T::entity_name(),
                namespace = %meta.namespace,
                connection = %meta.connection,
                "registered entity type"
            );
            Arc::new(meta)
        });
        Ok(())
    }

    pub fn is_registered<T: EntityType>(&self) -> bool {
        self.read().entities.contains_key(&TypeId::of::<T>())
    }

    pub fn has_id<T: EntityType>(&self) -> bool {
        self.columns_of::<T>().iter().any(|c| c.name == ID_COLUMN)
    }

    /// Columns in declaration order; empty when none are registered.
    pub fn columns_of<T: EntityType>(&self) -> Arc<Vec<ColumnDef>> {
        self.read()
            .columns
            .get(&TypeId::of::<T>())
            .cloned()
            .unwrap_or_default()
    }

    pub fn entity_meta_of<T: EntityType>(&self) -> Result<Arc<EntityMeta>, EntityError> {
        self.read()
            .entities
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| EntityError::NotRegistered {
                entity: T::entity_name().to_string(),
            })
    }

    pub fn schema_of<T: EntityType>(&self) -> Result<EntitySchema, EntityError> {
        Ok(EntitySchema {
            name: T::entity_name(),
            meta: self.entity_meta_of::<T>()?,
            columns: self.columns_of::<T>(),
        })
    }
}

/// Declares a record type: its columns, namespace and connection.
///
/// ```ignore
/// struct Player;
/// impl EntityType for Player {}
///
/// EntityBuilder::<Player>::new("Player", "default")
///     .id()
///     .column("score", ColumnType::Number)
///     .column_with("profile", ColumnType::Json, ColumnMeta::parse_date())
///     .register()?;
/// ```
#[derive(Debug)]
pub struct EntityBuilder<T> {
    meta: EntityMeta,
    columns: Vec<ColumnDef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: EntityType> EntityBuilder<T> {
    pub fn new(namespace: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::new(namespace, connection),
            columns: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add the string-typed `id` column.
    pub fn id(self) -> Self {
        self.column(ID_COLUMN, ColumnType::String)
    }

    pub fn column(self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.column_with(name, column_type, ColumnMeta::default())
    }

    pub fn column_with(
        mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        meta: ColumnMeta,
    ) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            column_type,
            meta,
        });
        self
    }

    /// Register into the process-wide registry.
    pub fn register(self) -> Result<(), EntityError> {
        self.register_in(global())
    }

    pub fn register_in(self, registry: &Registry) -> Result<(), EntityError> {
        if registry.is_registered::<T>() {
            return Ok(());
        }
        for column in &self.columns {
            registry.register_column::<T>(&column.name, column.column_type, column.meta)?;
        }
        registry.register_type::<T>(self.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntityError;

    struct Player;
    impl EntityType for Player {}

    struct NoId;
    impl EntityType for NoId {}

    struct Named;
    impl EntityType for Named {
        fn entity_name() -> &'static str {
            "CustomName"
        }
    }

    #[test]
    fn test_entity_name_is_short_type_name() {
        assert_eq!(Player::entity_name(), "Player");
        assert_eq!(Named::entity_name(), "CustomName");
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::default();
        EntityBuilder::<Player>::new("Player", "default")
            .id()
            .column("score", ColumnType::Number)
            .column_with("profile", ColumnType::Json, ColumnMeta::parse_date())
            .register_in(&registry)
            .unwrap();

        let schema = registry.schema_of::<Player>().unwrap();
        assert_eq!(schema.meta.namespace, "Player");
        assert_eq!(schema.meta.connection, "default");
        let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "score", "profile"]);
        assert!(schema.column("profile").unwrap().meta.parse_date);
        assert!(registry.has_id::<Player>());
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = Registry::default();
        EntityBuilder::<Player>::new("First", "a")
            .id()
            .register_in(&registry)
            .unwrap();
        EntityBuilder::<Player>::new("Second", "b")
            .id()
            .column("extra", ColumnType::Any)
            .register_in(&registry)
            .unwrap();

        let schema = registry.schema_of::<Player>().unwrap();
        assert_eq!(schema.meta.namespace, "First");
        assert_eq!(schema.columns.len(), 1);
    }

    #[test]
    fn test_namespace_with_separator_is_rejected() {
        let registry = Registry::default();
        let err = EntityBuilder::<Player>::new("bad:ns", "default")
            .id()
            .register_in(&registry)
            .unwrap_err();
        assert!(matches!(err, EntityError::Declaration { .. }));
        assert!(!registry.is_registered::<Player>());
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let registry = Registry::default();
        let err = EntityBuilder::<NoId>::new("NoId", "default")
            .column("value", ColumnType::String)
            .register_in(&registry)
            .unwrap_err();
        assert_eq!(err.to_string(), "(NoId) No id exist for this entity.");
    }

    #[test]
    fn test_non_string_id_is_rejected() {
        let registry = Registry::default();
        let err = registry
            .register_column::<Player>(ID_COLUMN, ColumnType::Number, ColumnMeta::default())
            .unwrap_err();
        assert!(matches!(err, EntityError::Declaration { .. }));
        assert!(!registry.has_id::<Player>());
    }

    #[test]
    fn test_unregistered_lookup_fails() {
        let registry = Registry::default();
        let err = registry.entity_meta_of::<Player>().unwrap_err();
        assert!(matches!(err, EntityError::NotRegistered { .. }));
        assert!(registry.columns_of::<Player>().is_empty());
    }
}
