//! hashrecord - inspect record namespaces on a live store
//!
//! ## Commands
//!
//! - `ids`: list the ids stored under a namespace, optionally by prefix
//! - `show`: print one record with every field decoded
//! - `ttl`: report the remaining lifetime of a record
//! - `delete`: remove a record unconditionally

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use hashrecord::store::{TTL_MISSING, TTL_NO_EXPIRY};
use hashrecord::{denormalize, keys, scan, DecodeOptions, HashStore, RedisHashStore, Value};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "hashrecord")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect hashrecord namespaces on a Redis store", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Store URL
    #[arg(long, env = "HASHRECORD_REDIS_URL")]
    url: String,

    /// Record namespace (usually the record type name)
    #[arg(short, long)]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List record ids in the namespace
    Ids {
        /// Only ids starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Print batches as the scan produces them instead of collecting first
        #[arg(long)]
        stream: bool,
    },

    /// Show one record with decoded field values
    Show {
        id: String,

        /// Rehydrate ISO-8601 strings nested in JSON fields as dates
        #[arg(long)]
        parse_date: bool,
    },

    /// Seconds until a record expires
    Ttl { id: String },

    /// Delete a record without checking conditions
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    hashrecord::telemetry::init_tracing(cli.json, level);

    if !keys::is_valid_namespace(&cli.namespace) {
        bail!(
            "Invalid namespace {:?}: must be non-empty and must not contain ':'",
            cli.namespace
        );
    }

    let store: Arc<dyn HashStore> = Arc::new(
        RedisHashStore::connect(&cli.url)
            .await
            .context("Failed to connect to the store")?,
    );

    match cli.command {
        Commands::Ids { prefix, stream } => {
            if stream {
                cmd_ids_stream(store, &cli.namespace, &prefix).await
            } else {
                cmd_ids(store.as_ref(), &cli.namespace, &prefix).await
            }
        }
        Commands::Show { id, parse_date } => {
            cmd_show(store.as_ref(), &cli.namespace, &id, parse_date).await
        }
        Commands::Ttl { id } => cmd_ttl(store.as_ref(), &cli.namespace, &id).await,
        Commands::Delete { id } => cmd_delete(store.as_ref(), &cli.namespace, &id).await,
    }
}

/// Build the storage key, rejecting ids no record could have.
fn record_key(namespace: &str, id: &str) -> Result<String> {
    let id = Value::from(id);
    let id = keys::validate_id(namespace, &id)?;
    Ok(keys::storage_key(namespace, id))
}

async fn cmd_ids(store: &dyn HashStore, namespace: &str, prefix: &str) -> Result<()> {
    let mut ids = scan::find_all_ids(store, namespace, prefix)
        .await
        .context("Scan failed")?;
    ids.sort();

    if ids.is_empty() {
        println!("No records under '{}'", keys::scan_pattern(namespace, prefix));
        return Ok(());
    }
    for id in &ids {
        println!("{}", id);
    }
    debug!(count = ids.len(), "listed ids");
    Ok(())
}

async fn cmd_ids_stream(store: Arc<dyn HashStore>, namespace: &str, prefix: &str) -> Result<()> {
    let mut batches = scan::scan_all_ids(store, namespace, prefix);
    let mut total = 0;
    while let Some(batch) = batches.next().await {
        let batch = batch.context("Scan failed")?;
        total += batch.len();
        for id in batch {
            println!("{}", id);
        }
    }
    debug!(count = total, "streamed ids");
    Ok(())
}

async fn cmd_show(store: &dyn HashStore, namespace: &str, id: &str, parse_date: bool) -> Result<()> {
    let key = record_key(namespace, id)?;
    let stored = store
        .hgetall(&key)
        .await
        .with_context(|| format!("Failed to read {}", key))?;

    if !stored.contains_key(hashrecord::registry::ID_COLUMN) {
        println!("No record '{}' in '{}'", id, namespace);
        return Ok(());
    }

    let options = DecodeOptions { parse_date };
    let decoded: BTreeMap<String, serde_json::Value> = stored
        .iter()
        .map(|(field, text)| (field.clone(), denormalize(text, options).to_json()))
        .collect();

    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

async fn cmd_ttl(store: &dyn HashStore, namespace: &str, id: &str) -> Result<()> {
    let key = record_key(namespace, id)?;
    let ttl = store
        .ttl(&key)
        .await
        .with_context(|| format!("Failed to read TTL of {}", key))?;

    match ttl {
        TTL_MISSING => println!("No record '{}' in '{}'", id, namespace),
        TTL_NO_EXPIRY => println!("{} does not expire", key),
        seconds => println!("{} expires in {}s", key, seconds),
    }
    Ok(())
}

async fn cmd_delete(store: &dyn HashStore, namespace: &str, id: &str) -> Result<()> {
    let key = record_key(namespace, id)?;
    let removed = store
        .del(&key)
        .await
        .with_context(|| format!("Failed to delete {}", key))?;

    if removed == 0 {
        println!("No record '{}' in '{}'", id, namespace);
    } else {
        println!("Deleted {}", key);
    }
    Ok(())
}
