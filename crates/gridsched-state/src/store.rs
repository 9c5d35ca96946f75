//! CacheStore — redb-backed persistence of the registry cache.
//!
//! The scheduler snapshots its servers, resources and users at shutdown
//! and restores them at startup. Values are JSON-serialized records in
//! redb's `&[u8]` value columns. Both on-disk and in-memory backends are
//! supported (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::registry::RegistryCache;
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe cache store backed by redb.
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Database>,
}

impl CacheStore {
    /// Open (or create) a persistent cache store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "cache store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory cache store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory cache store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVERS).map_err(map_err!(Table))?;
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Replace the stored snapshot with `cache` in a single transaction.
    pub fn save_cache(&self, cache: &RegistryCache) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        replace_table(&txn, SERVERS, &cache.servers)?;
        replace_table(&txn, RESOURCES, &cache.resources)?;
        replace_table(&txn, USERS, &cache.users)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            servers = cache.servers.len(),
            resources = cache.resources.len(),
            users = cache.users.len(),
            "registry cache saved"
        );
        Ok(())
    }

    /// Load the stored snapshot. An empty store yields an empty cache.
    pub fn load_cache(&self) -> StateResult<RegistryCache> {
        Ok(RegistryCache {
            servers: self.load_table(SERVERS)?,
            resources: self.load_table(RESOURCES)?,
            users: self.load_table(USERS)?,
        })
    }

    fn load_table<T: DeserializeOwned>(&self, def: Table) -> StateResult<BTreeMap<String, T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.insert(key.value().to_string(), record);
        }
        Ok(results)
    }
}

fn replace_table<T: Serialize>(
    txn: &WriteTransaction,
    def: Table,
    records: &BTreeMap<String, T>,
) -> StateResult<()> {
    txn.delete_table(def).map_err(map_err!(Table))?;
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    for (key, record) in records {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}
