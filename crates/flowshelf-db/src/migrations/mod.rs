//! Schema migrations.
//!
//! SQL files are embedded at compile time and applied in version order. Each
//! one runs in its own transaction together with its `schema_migrations`
//! bookkeeping row, so a failed migration leaves the schema at the previous
//! version.

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration {version} ({name}) failed: {reason}")]
    Failed {
        version: usize,
        name: &'static str,
        reason: String,
    },
}

struct Migration {
    version: usize,
    name: &'static str,
    sql: &'static str,
}

impl Migration {
    fn apply(&self, conn: &Connection) -> Result<(), MigrationError> {
        let fail = |e: rusqlite::Error| MigrationError::Failed {
            version: self.version,
            name: self.name,
            reason: e.to_string(),
        };

        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(self.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at)
             VALUES (:version, :name, :applied_at)",
            rusqlite::named_params! {
                ":version": self.version,
                ":name": self.name,
                ":applied_at": super::queries::format_timestamp(chrono::Utc::now()),
            },
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)
    }
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial",
    sql: include_str!("001_initial.sql"),
}];

fn ensure_bookkeeping(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
}

fn recorded_version(conn: &Connection) -> rusqlite::Result<usize> {
    let version: Option<usize> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn apply_pending(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    ensure_bookkeeping(conn)?;
    let from = recorded_version(conn)?;

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > from) {
        migration.apply(conn)?;
        applied += 1;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(applied)
}

/// Bring the schema up to date, returning how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    apply_pending(conn, MIGRATIONS)
}

/// Schema version recorded in the database (0 for a fresh one).
pub fn current_version(conn: &Connection) -> Result<usize, MigrationError> {
    ensure_bookkeeping(conn)?;
    Ok(recorded_version(conn)?)
}

/// Highest version this build knows how to apply.
pub fn latest_version() -> usize {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_exists(conn: &Connection, kind: &str, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
            [kind, name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_fresh_database_reaches_latest() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);

        assert_eq!(run_migrations(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(current_version(&conn).unwrap(), latest_version());

        // Nothing left to do the second time.
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_storage_schema_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["blobs", "blob_variants", "blob_associations"] {
            assert!(object_exists(&conn, "table", table), "missing table {}", table);
        }
        assert!(object_exists(&conn, "index", "idx_blob_associations_primary"));
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let broken = [Migration {
            version: latest_version() + 1,
            name: "broken",
            sql: "CREATE TABLE half_done (id INTEGER); SELECT * FROM no_such_table;",
        }];

        let err = apply_pending(&conn, &broken).unwrap_err();
        assert!(matches!(err, MigrationError::Failed { name: "broken", .. }));
        assert!(!object_exists(&conn, "table", "half_done"));
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
