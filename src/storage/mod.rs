//! SQLite storage layer -- schema, typed records, serialized writes.
//!
//! The store is the source of truth for agents and locations. Worker state
//! in memory is a cache that is rebuilt from here whenever a worker is
//! created.

pub mod agents;
pub mod locations;
pub mod schema;
pub mod systems;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use agents::Agent;
pub use locations::LocationRecord;
pub use systems::SystemRecord;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory database. Each in-memory connection is its
/// own database, so the pool is capped at one.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder()
        .max_size(1)
        .max_lifetime(None)
        .idle_timeout(None)
        .build(manager)?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Handle to the persistent store. Cheap to clone.
///
/// Every write is one statement issued under `write_lock`, so two writers
/// never interleave on the same record and readers see either the old or
/// the new row.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(%path, "Initializing database");
        Ok(Self::new(open_pool(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(open_memory_pool()?))
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.pool.get().context("Failed to get DB connection")?;
        Ok(f(&conn)?)
    }

    fn write(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<usize>) -> Result<usize> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let conn = self.pool.get().context("Failed to get DB connection")?;
        Ok(f(&conn)?)
    }
}
