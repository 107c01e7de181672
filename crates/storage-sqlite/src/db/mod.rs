//! SQLite pool, migrations and the single writer.

mod write_actor;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use tillsync_core::errors::{DatabaseError, Error, Result};

use crate::errors::StorageError;

pub use write_actor::{spawn_writer, WriteHandle};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

const SERVER_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/server");
const CLIENT_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/client");

const BUSY_TIMEOUT_MS: u64 = 5_000;
const POOL_SIZE: u32 = 8;

/// Which table set a database file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRole {
    /// Canonical entities and idempotency records.
    Server,
    /// Pending operation queue and local entity cache.
    Client,
}

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode = WAL; \
             PRAGMA busy_timeout = {}; \
             PRAGMA foreign_keys = ON; \
             PRAGMA synchronous = NORMAL;",
            BUSY_TIMEOUT_MS
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

/// Create the parent directory of `db_path` if needed.
pub fn init(db_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )))
            })?;
        }
    }
    Ok(())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .connection_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .map_err(StorageError::from)?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    Ok(pool.get().map_err(StorageError::from)?)
}

pub fn run_migrations(pool: &DbPool, role: DatabaseRole) -> Result<()> {
    let mut conn = get_connection(pool)?;
    let migrations = match role {
        DatabaseRole::Server => SERVER_MIGRATIONS,
        DatabaseRole::Client => CLIENT_MIGRATIONS,
    };
    let applied = conn
        .run_pending_migrations(migrations)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    if !applied.is_empty() {
        info!("Applied {} {:?} migration(s)", applied.len(), role);
    }
    Ok(())
}

/// An opened database: read pool plus the writer actor.
#[derive(Clone)]
pub struct Database {
    pub pool: Arc<DbPool>,
    pub writer: WriteHandle,
}

impl Database {
    /// Open (creating if needed) and migrate the database at `db_path`.
    pub fn open(db_path: &str, role: DatabaseRole) -> Result<Self> {
        init(db_path)?;
        let pool = create_pool(db_path)?;
        run_migrations(&pool, role)?;
        let writer = spawn_writer(Arc::clone(&pool))?;
        Ok(Self { pool, writer })
    }
}
