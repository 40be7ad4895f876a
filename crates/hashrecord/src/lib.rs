//! hashrecord: typed entity records over a hash-oriented key-value store
//!
//! Records are stored as hashes under `"{namespace}:{id}"`, one tagged
//! string per column. Creates, updates and deletes run as server-side
//! atomic scripts, so conditional writes never race with each other.
//!
//! ## Key Components
//!
//! - `codec`: lossless `Value` <-> tagged string encoding
//! - `registry`: per-type namespace, connection and columns (`EntityBuilder`)
//! - `protocol`: create / update-if / delete-if script orchestration
//! - `scan`: prefix enumeration, materialized or streamed
//! - `Record`: the facade tying the above together
//! - `HashStore`: the store boundary, with Redis and in-memory backends
//!
//! ## Example
//!
//! ```ignore
//! use hashrecord::{values, ColumnType, EntityBuilder, EntityType, Record, SaveOptions};
//!
//! struct Player;
//! impl EntityType for Player {}
//!
//! EntityBuilder::<Player>::new("Player", "default")
//!     .id()
//!     .column("score", ColumnType::Number)
//!     .register()?;
//! hashrecord::connect(&hashrecord::StoreConfig::from_env()?).await?;
//!
//! let player = Record::<Player>::new([("id", "p-1")]);
//! player.create(SaveOptions::expire_in(60)).await?;
//! player.update_if(values([("score", 0)]), SaveOptions::default()).await?;
//! ```

pub mod codec;
pub mod connection;
mod error;
pub mod fakes;
pub mod keys;
pub mod protocol;
mod record;
pub mod redis_store;
pub mod registry;
pub mod scan;
pub mod store;
pub mod telemetry;

pub use codec::{denormalize, normalize, values, DecodeOptions, Value, Values};
pub use connection::{add_connection, connect, StoreConfig};
pub use error::{EntityError, ErrorCode, StoreError};
pub use protocol::{Expire, SaveOptions};
pub use record::Record;
pub use redis_store::RedisHashStore;
pub use registry::{ColumnMeta, ColumnType, EntityBuilder, EntityMeta, EntityType};
pub use scan::IdScan;
pub use store::{HashStore, StoreResult};

/// Result type for hashrecord operations
pub type Result<T> = std::result::Result<T, EntityError>;
