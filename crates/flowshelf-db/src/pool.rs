//! Database connection pool management.
//!
//! This module provides connection pooling for SQLite using r2d2. The pool is
//! an explicit value handed to whoever needs storage; there is no global pool.
//! Its size bounds the number of concurrent storage operations.

use std::time::Duration;

use flowshelf_common::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Default number of pooled connections for file-backed databases.
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// How long a connection waits on SQLite's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn configure_file_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
}

fn configure_memory_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn migrate(pool: &DbPool) -> Result<()> {
    let conn = pool
        .get()
        .map_err(|e| Error::storage(format!("Failed to get connection for migrations: {}", e)))?;

    migrations::run_migrations(&conn)
        .map_err(|e| Error::storage(format!("Failed to run migrations: {}", e)))?;

    Ok(())
}

/// Initialize a new database pool with the default size.
///
/// See [`init_pool_with_size`].
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    init_pool_with_size(db_path, DEFAULT_POOL_SIZE)
}

/// Initialize a new database pool with the given file path and size.
///
/// This function will:
/// - Create the SQLite database file if it doesn't exist
/// - Enable foreign key constraints, WAL journaling, and a busy timeout on
///   every connection
/// - Run pending database migrations
///
/// # Example
///
/// ```no_run
/// use flowshelf_db::pool::init_pool_with_size;
///
/// let pool = init_pool_with_size("/var/lib/flowshelf/images.db", 8).unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_pool_with_size(db_path: &str, pool_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(configure_file_connection);

    let pool = Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| Error::storage(format!("Failed to create connection pool: {}", e)))?;

    migrate(&pool)?;

    tracing::debug!(path = db_path, pool_size, "Database pool ready");

    Ok(pool)
}

/// Initialize an in-memory database pool for testing.
///
/// An in-memory SQLite database is private to the connection that opened it,
/// so this pool holds a single connection. Callers must release a connection
/// before asking for another one.
///
/// # Example
///
/// ```
/// use flowshelf_db::pool::init_memory_pool;
///
/// let pool = init_memory_pool().unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory().with_init(configure_memory_connection);

    // Recycling the connection would discard the database with it.
    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)
        .map_err(|e| Error::storage(format!("Failed to create in-memory pool: {}", e)))?;

    migrate(&pool)?;

    Ok(pool)
}

/// Get a connection from the pool.
///
/// Converts the r2d2 error into the common Error type.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::storage(format!("Failed to get connection from pool: {}", e)))
}

/// Run `f` inside an `IMMEDIATE` transaction on a pooled connection.
///
/// The write lock is taken when the transaction begins, so two writers never
/// interleave their read-then-write sequences. The transaction commits only if
/// `f` returns `Ok`; any error rolls every statement back.
pub fn write_transaction<T, F>(pool: &DbPool, f: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let mut conn = get_conn(pool)?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::storage(format!("Failed to begin transaction: {}", e)))?;

    // Dropping an uncommitted transaction rolls it back.
    let value = f(&tx)?;

    tx.commit()
        .map_err(|e| Error::storage(format!("Failed to commit transaction: {}", e)))?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory_pool() {
        let pool = init_memory_pool().unwrap();
        assert_eq!(pool.max_size(), 1);
    }

    #[test]
    fn test_get_conn_enables_foreign_keys() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        let enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_file_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = init_pool(path.to_str().unwrap()).unwrap();
        assert_eq!(pool.max_size(), DEFAULT_POOL_SIZE);

        let conn = get_conn(&pool).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_file_pool_shares_data_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let pool = init_pool_with_size(path.to_str().unwrap(), 2).unwrap();

        let conn1 = get_conn(&pool).unwrap();
        let conn2 = get_conn(&pool).unwrap();

        conn1
            .execute("CREATE TABLE scratch (v INTEGER)", [])
            .unwrap();
        conn1.execute("INSERT INTO scratch VALUES (7)", []).unwrap();

        let v: i64 = conn2
            .query_row("SELECT v FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn test_write_transaction_commits() {
        let pool = init_memory_pool().unwrap();

        write_transaction(&pool, |tx| {
            tx.execute("CREATE TABLE scratch (v INTEGER)", [])
                .map_err(|e| Error::storage(e.to_string()))?;
            tx.execute("INSERT INTO scratch VALUES (1)", [])
                .map_err(|e| Error::storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        let conn = get_conn(&pool).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_write_transaction_rolls_back_on_error() {
        let pool = init_memory_pool().unwrap();
        get_conn(&pool)
            .unwrap()
            .execute("CREATE TABLE scratch (v INTEGER)", [])
            .unwrap();

        let result: Result<()> = write_transaction(&pool, |tx| {
            tx.execute("INSERT INTO scratch VALUES (1)", [])
                .map_err(|e| Error::storage(e.to_string()))?;
            Err(Error::internal("boom"))
        });
        assert!(result.is_err());

        let conn = get_conn(&pool).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
