//! Blob database queries.
//!
//! Raw CRUD for original image rows. Nothing here checks reference counts;
//! callers that need cascade or orphan semantics compose these inside a
//! transaction (see [`delete_blob_if_unreferenced`] for the atomic form).

use chrono::{DateTime, Utc};
use flowshelf_common::{BlobId, Error, Result};
use rusqlite::Connection;

use super::{format_timestamp, is_unique_violation, now_timestamp, parse_column, parse_timestamp};
use crate::models::{Blob, BlobSummary, BlobUpdate, NewBlob};

/// Upper bound on numeric suffixes tried when resolving filename collisions.
const MAX_FILENAME_ATTEMPTS: u32 = 1000;

const BLOB_COLUMNS: &str =
    "id, filename, mime_type, byte_size, width, height, checksum, payload, created_at, updated_at";

/// Parse a blob from a database row.
///
/// Expects columns in the order of `BLOB_COLUMNS`.
fn parse_blob_row(row: &rusqlite::Row) -> rusqlite::Result<Blob> {
    Ok(Blob {
        id: parse_column(row, 0)?,
        filename: row.get(1)?,
        mime_type: row.get(2)?,
        byte_size: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        checksum: row.get(6)?,
        payload: row.get(7)?,
        created_at: parse_timestamp(&row.get::<_, String>(8)?),
        updated_at: parse_timestamp(&row.get::<_, String>(9)?),
    })
}

/// Build the `n`th alternative for a colliding filename.
///
/// `cover.png` becomes `cover-1.png`, `cover-2.png`, ...; names without an
/// extension get the suffix appended.
pub fn suffixed_filename(filename: &str, n: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, n, ext),
        _ => format!("{}-{}", filename, n),
    }
}

/// Insert a new blob, renaming it on filename collision.
///
/// `(filename, mime_type)` is unique. When the requested name is taken, the
/// insert is retried as `name-1.ext`, `name-2.ext`, ... until a free name is
/// found. The returned summary carries the name actually stored.
///
/// # Returns
///
/// * `Ok(BlobSummary)` - The stored blob's ID, final filename, and size
/// * `Err(Error)` - If a database error occurs or no free name was found
pub fn insert_blob(conn: &Connection, new: &NewBlob<'_>) -> Result<BlobSummary> {
    let id = BlobId::new();
    let (now, now_text) = now_timestamp();
    let byte_size = new.payload.len() as i64;

    let mut filename = new.filename.clone();
    let mut attempt = 0;

    loop {
        let result = conn.execute(
            "INSERT INTO blobs (id, filename, mime_type, byte_size, width, height, checksum,
                                payload, created_at, updated_at)
             VALUES (:id, :filename, :mime_type, :byte_size, :width, :height, :checksum,
                     :payload, :created_at, :updated_at)",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":filename": &filename,
                ":mime_type": &new.mime_type,
                ":byte_size": byte_size,
                ":width": new.width,
                ":height": new.height,
                ":checksum": &new.checksum,
                ":payload": new.payload,
                ":created_at": &now_text,
                ":updated_at": &now_text,
            },
        );

        match result {
            Ok(_) => break,
            Err(e) if is_unique_violation(&e) && attempt < MAX_FILENAME_ATTEMPTS => {
                attempt += 1;
                filename = suffixed_filename(&new.filename, attempt);
            }
            Err(e) => return Err(Error::storage(e.to_string())),
        }
    }

    if attempt > 0 {
        tracing::debug!(
            requested = %new.filename,
            stored = %filename,
            "Resolved blob filename collision"
        );
    }

    Ok(BlobSummary {
        id,
        filename,
        mime_type: new.mime_type.clone(),
        byte_size,
        created_at: now,
    })
}

/// Get a blob by ID, including its payload.
///
/// # Returns
///
/// * `Ok(Some(Blob))` - The blob if found
/// * `Ok(None)` - If the blob does not exist
/// * `Err(Error)` - If a database error occurs
pub fn get_blob(conn: &Connection, id: BlobId) -> Result<Option<Blob>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM blobs WHERE id = :id", BLOB_COLUMNS),
        rusqlite::named_params! { ":id": id.to_string() },
        parse_blob_row,
    );

    match result {
        Ok(blob) => Ok(Some(blob)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::storage(e.to_string())),
    }
}

/// Check whether a blob exists without loading its payload.
pub fn blob_exists(conn: &Connection, id: BlobId) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM blobs WHERE id = :id)",
        rusqlite::named_params! { ":id": id.to_string() },
        |row| row.get(0),
    )
    .map_err(|e| Error::storage(e.to_string()))
}

/// Update blob metadata. Fields left as `None` keep their stored value.
///
/// # Returns
///
/// * `Ok(Some(Blob))` - The updated blob
/// * `Ok(None)` - If the blob does not exist
/// * `Err(Error::Validation)` - If the new filename is already taken
/// * `Err(Error)` - If a database error occurs
pub fn update_blob(conn: &Connection, id: BlobId, update: &BlobUpdate) -> Result<Option<Blob>> {
    let (_, now_text) = now_timestamp();

    let rows_affected = conn
        .execute(
            "UPDATE blobs SET
                filename = COALESCE(:filename, filename),
                width = COALESCE(:width, width),
                height = COALESCE(:height, height),
                updated_at = :updated_at
             WHERE id = :id",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":filename": &update.filename,
                ":width": update.width,
                ":height": update.height,
                ":updated_at": now_text,
            },
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::validation(format!(
                    "Filename {:?} is already in use",
                    update.filename.as_deref().unwrap_or_default()
                ))
            } else {
                Error::storage(e.to_string())
            }
        })?;

    if rows_affected == 0 {
        return Ok(None);
    }

    get_blob(conn, id)
}

/// Delete a blob row unconditionally.
///
/// Variants and associations referencing the blob are removed by the
/// `ON DELETE CASCADE` foreign keys.
///
/// # Returns
///
/// * `Ok(Some(Blob))` - The removed blob
/// * `Ok(None)` - If the blob did not exist
/// * `Err(Error)` - If a database error occurs
pub fn delete_blob(conn: &Connection, id: BlobId) -> Result<Option<Blob>> {
    let Some(blob) = get_blob(conn, id)? else {
        return Ok(None);
    };

    conn.execute(
        "DELETE FROM blobs WHERE id = :id",
        rusqlite::named_params! { ":id": id.to_string() },
    )
    .map_err(|e| Error::storage(e.to_string()))?;

    Ok(Some(blob))
}

/// Delete a blob only if no association references it.
///
/// The reference check and the delete are one statement, so no association
/// can slip in between them.
///
/// # Returns
///
/// * `Ok(true)` - If the blob was deleted
/// * `Ok(false)` - If the blob is still referenced or did not exist
/// * `Err(Error)` - If a database error occurs
pub fn delete_blob_if_unreferenced(conn: &Connection, id: BlobId) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "DELETE FROM blobs
             WHERE id = :id
               AND NOT EXISTS (SELECT 1 FROM blob_associations WHERE blob_id = :id)",
            rusqlite::named_params! { ":id": id.to_string() },
        )
        .map_err(|e| Error::storage(e.to_string()))?;

    Ok(rows_affected > 0)
}

/// List blobs that no association references, oldest first.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `created_before` - Only include blobs created before this instant
pub fn list_orphans(
    conn: &Connection,
    created_before: Option<DateTime<Utc>>,
) -> Result<Vec<BlobSummary>> {
    let cutoff = created_before.map(format_timestamp);

    let mut stmt = conn
        .prepare(
            "SELECT b.id, b.filename, b.mime_type, b.byte_size, b.created_at
             FROM blobs b
             WHERE NOT EXISTS (SELECT 1 FROM blob_associations a WHERE a.blob_id = b.id)
               AND (:cutoff IS NULL OR b.created_at < :cutoff)
             ORDER BY b.created_at ASC",
        )
        .map_err(|e| Error::storage(e.to_string()))?;

    let blobs = stmt
        .query_map(rusqlite::named_params! { ":cutoff": cutoff }, |row| {
            Ok(BlobSummary {
                id: parse_column(row, 0)?,
                filename: row.get(1)?,
                mime_type: row.get(2)?,
                byte_size: row.get(3)?,
                created_at: parse_timestamp(&row.get::<_, String>(4)?),
            })
        })
        .map_err(|e| Error::storage(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::storage(e.to_string()))?;

    Ok(blobs)
}

/// Count all stored blobs.
pub fn count_blobs(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))
        .map_err(|e| Error::storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use crate::queries::associations;
    use flowshelf_common::EntityType;

    fn new_blob<'a>(filename: &str, payload: &'a [u8]) -> NewBlob<'a> {
        NewBlob {
            filename: filename.to_string(),
            mime_type: "image/png".to_string(),
            width: Some(64),
            height: Some(32),
            checksum: "abc123".to_string(),
            payload,
        }
    }

    #[test]
    fn test_insert_and_get_blob() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        let payload = vec![0u8, 1, 2, 3, 255];
        let blob = insert_blob(&conn, &new_blob("cover.png", &payload)).unwrap();

        let found = get_blob(&conn, blob.id).unwrap().unwrap();
        assert_eq!(found.filename, "cover.png");
        assert_eq!(found.mime_type, "image/png");
        assert_eq!(found.byte_size, 5);
        assert_eq!(found.width, Some(64));
        assert_eq!(found.height, Some(32));
        assert_eq!(found.payload, payload);
    }

    #[test]
    fn test_get_blob_not_found() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        assert!(get_blob(&conn, BlobId::new()).unwrap().is_none());
    }

    #[test]
    fn test_blob_exists() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let stored = insert_blob(&conn, &new_blob("e.png", b"e")).unwrap();

        assert!(blob_exists(&conn, stored.id).unwrap());
        assert!(!blob_exists(&conn, BlobId::new()).unwrap());
    }

    #[test]
    fn test_filename_collision_gets_suffix() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        let first = insert_blob(&conn, &new_blob("cover.png", b"a")).unwrap();
        let second = insert_blob(&conn, &new_blob("cover.png", b"b")).unwrap();
        let third = insert_blob(&conn, &new_blob("cover.png", b"c")).unwrap();

        assert_eq!(first.filename, "cover.png");
        assert_eq!(second.filename, "cover-1.png");
        assert_eq!(third.filename, "cover-2.png");
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_same_filename_different_type_does_not_collide() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        insert_blob(&conn, &new_blob("logo", b"a")).unwrap();
        let mut svg = new_blob("logo", b"<svg/>");
        svg.mime_type = "image/svg+xml".to_string();
        let stored = insert_blob(&conn, &svg).unwrap();

        assert_eq!(stored.filename, "logo");
    }

    #[test]
    fn test_suffixed_filename() {
        assert_eq!(suffixed_filename("cover.png", 1), "cover-1.png");
        assert_eq!(suffixed_filename("archive.tar.gz", 2), "archive.tar-2.gz");
        assert_eq!(suffixed_filename("README", 3), "README-3");
        assert_eq!(suffixed_filename(".hidden", 1), ".hidden-1");
    }

    #[test]
    fn test_update_blob() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let blob = insert_blob(&conn, &new_blob("old.png", b"x")).unwrap();

        let updated = update_blob(
            &conn,
            blob.id,
            &BlobUpdate {
                filename: Some("new.png".to_string()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(updated.filename, "new.png");
        assert_eq!(updated.width, Some(64));
    }

    #[test]
    fn test_update_blob_filename_conflict() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        insert_blob(&conn, &new_blob("taken.png", b"x")).unwrap();
        let blob = insert_blob(&conn, &new_blob("mine.png", b"y")).unwrap();

        let result = update_blob(
            &conn,
            blob.id,
            &BlobUpdate {
                filename: Some("taken.png".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_missing_blob() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        let result = update_blob(&conn, BlobId::new(), &BlobUpdate::default()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_delete_blob_returns_row() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let blob = insert_blob(&conn, &new_blob("gone.png", b"x")).unwrap();

        let deleted = delete_blob(&conn, blob.id).unwrap().unwrap();
        assert_eq!(deleted.id, blob.id);
        assert!(get_blob(&conn, blob.id).unwrap().is_none());
        assert!(delete_blob(&conn, blob.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_if_unreferenced() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let blob = insert_blob(&conn, &new_blob("kept.png", b"x")).unwrap();

        associations::link(&conn, blob.id, EntityType::Workflow, "wf-1", "thumbnail", true, 0)
            .unwrap();
        assert!(!delete_blob_if_unreferenced(&conn, blob.id).unwrap());
        assert!(get_blob(&conn, blob.id).unwrap().is_some());

        associations::unlink(&conn, EntityType::Workflow, "wf-1", "thumbnail").unwrap();
        assert!(delete_blob_if_unreferenced(&conn, blob.id).unwrap());
        assert!(get_blob(&conn, blob.id).unwrap().is_none());
    }

    #[test]
    fn test_list_orphans() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let bound = insert_blob(&conn, &new_blob("bound.png", b"x")).unwrap();
        let orphan = insert_blob(&conn, &new_blob("orphan.png", b"y")).unwrap();
        associations::link(&conn, bound.id, EntityType::Author, "7", "avatar", true, 0).unwrap();

        let orphans = list_orphans(&conn, None).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, orphan.id);

        let cutoff = orphan.created_at - chrono::Duration::hours(1);
        assert!(list_orphans(&conn, Some(cutoff)).unwrap().is_empty());
    }

    #[test]
    fn test_count_blobs() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert_eq!(count_blobs(&conn).unwrap(), 0);

        insert_blob(&conn, &new_blob("a.png", b"x")).unwrap();
        insert_blob(&conn, &new_blob("b.png", b"y")).unwrap();
        assert_eq!(count_blobs(&conn).unwrap(), 2);
    }
}
