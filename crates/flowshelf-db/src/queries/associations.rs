//! Association database queries.
//!
//! An association binds a blob to a `(entity_type, entity_id, usage_type)`
//! slot. A row is identified by the blob plus its slot, and a partial unique
//! index allows at most one primary row per slot.

use flowshelf_common::{AssociationId, BlobId, EntityType, Error, Result};
use rusqlite::Connection;

use super::{now_timestamp, parse_column, parse_timestamp};
use crate::models::Association;

const ASSOCIATION_COLUMNS: &str =
    "id, blob_id, entity_type, entity_id, usage_type, is_primary, sort_order, created_at";

/// Primary first, then sort order, then newest first.
const ASSOCIATION_ORDER: &str = "is_primary DESC, sort_order ASC, created_at DESC, rowid DESC";

/// Parse an association from a database row.
///
/// Expects columns in the order of `ASSOCIATION_COLUMNS`.
fn parse_association_row(row: &rusqlite::Row) -> rusqlite::Result<Association> {
    Ok(Association {
        id: parse_column(row, 0)?,
        blob_id: parse_column(row, 1)?,
        entity_type: parse_column(row, 2)?,
        entity_id: row.get(3)?,
        usage_type: row.get(4)?,
        is_primary: row.get(5)?,
        sort_order: row.get(6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?),
    })
}

fn query_associations(
    conn: &Connection,
    filter: &str,
    params: &[(&str, &dyn rusqlite::ToSql)],
) -> Result<Vec<Association>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM blob_associations WHERE {} ORDER BY {}",
            ASSOCIATION_COLUMNS, filter, ASSOCIATION_ORDER
        ))
        .map_err(|e| Error::storage(e.to_string()))?;

    let rows = stmt
        .query_map(params, parse_association_row)
        .map_err(|e| Error::storage(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::storage(e.to_string()))?;

    Ok(rows)
}

/// Bind a blob into a slot.
///
/// When `is_primary` is set, the primary flag is first cleared on every other
/// row of the slot. The row for this blob and slot is then inserted, or
/// updated in place if it already exists, so repeating an identical call
/// leaves exactly one unchanged row.
///
/// Run this inside a transaction: the clear and the upsert must land together.
///
/// # Returns
///
/// * `Ok(Association)` - The row as stored
/// * `Err(Error)` - If a database error occurs (including a missing blob)
pub fn link(
    conn: &Connection,
    blob_id: BlobId,
    entity_type: EntityType,
    entity_id: &str,
    usage_type: &str,
    is_primary: bool,
    sort_order: i32,
) -> Result<Association> {
    if is_primary {
        conn.execute(
            "UPDATE blob_associations SET is_primary = 0
             WHERE entity_type = :entity_type AND entity_id = :entity_id
               AND usage_type = :usage_type AND blob_id != :blob_id AND is_primary = 1",
            rusqlite::named_params! {
                ":entity_type": entity_type.to_string(),
                ":entity_id": entity_id,
                ":usage_type": usage_type,
                ":blob_id": blob_id.to_string(),
            },
        )
        .map_err(|e| Error::storage(e.to_string()))?;
    }

    let (_, now_text) = now_timestamp();

    conn.execute(
        "INSERT INTO blob_associations
             (id, blob_id, entity_type, entity_id, usage_type, is_primary, sort_order, created_at)
         VALUES (:id, :blob_id, :entity_type, :entity_id, :usage_type, :is_primary, :sort_order,
                 :created_at)
         ON CONFLICT (blob_id, entity_type, entity_id, usage_type) DO UPDATE SET
             is_primary = excluded.is_primary,
             sort_order = excluded.sort_order",
        rusqlite::named_params! {
            ":id": AssociationId::new().to_string(),
            ":blob_id": blob_id.to_string(),
            ":entity_type": entity_type.to_string(),
            ":entity_id": entity_id,
            ":usage_type": usage_type,
            ":is_primary": is_primary,
            ":sort_order": sort_order,
            ":created_at": now_text,
        },
    )
    .map_err(|e| Error::storage(e.to_string()))?;

    let result = conn.query_row(
        &format!(
            "SELECT {} FROM blob_associations
             WHERE blob_id = :blob_id AND entity_type = :entity_type
               AND entity_id = :entity_id AND usage_type = :usage_type",
            ASSOCIATION_COLUMNS
        ),
        rusqlite::named_params! {
            ":blob_id": blob_id.to_string(),
            ":entity_type": entity_type.to_string(),
            ":entity_id": entity_id,
            ":usage_type": usage_type,
        },
        parse_association_row,
    );

    result.map_err(|e| Error::storage(e.to_string()))
}

/// Get every row occupying a slot, in listing order.
pub fn get_slot(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    usage_type: &str,
) -> Result<Vec<Association>> {
    let entity_type = entity_type.to_string();
    query_associations(
        conn,
        "entity_type = :entity_type AND entity_id = :entity_id AND usage_type = :usage_type",
        rusqlite::named_params! {
            ":entity_type": entity_type,
            ":entity_id": entity_id,
            ":usage_type": usage_type,
        },
    )
}

fn delete_association(conn: &Connection, id: AssociationId) -> Result<()> {
    conn.execute(
        "DELETE FROM blob_associations WHERE id = :id",
        rusqlite::named_params! { ":id": id.to_string() },
    )
    .map_err(|e| Error::storage(e.to_string()))?;
    Ok(())
}

/// Remove the leading row of a slot (the primary one, if any).
///
/// # Returns
///
/// * `Ok(Some(Association))` - The removed row, so the caller can inspect the freed blob
/// * `Ok(None)` - If the slot was empty
/// * `Err(Error)` - If a database error occurs
pub fn unlink(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    usage_type: &str,
) -> Result<Option<Association>> {
    let Some(first) = get_slot(conn, entity_type, entity_id, usage_type)?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };

    delete_association(conn, first.id)?;
    Ok(Some(first))
}

/// Remove every row of a slot, returning them.
pub fn unlink_slot(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    usage_type: &str,
) -> Result<Vec<Association>> {
    let rows = get_slot(conn, entity_type, entity_id, usage_type)?;
    for row in &rows {
        delete_association(conn, row.id)?;
    }
    Ok(rows)
}

/// Remove every row owned by an entity, across all of its slots.
pub fn unlink_entity(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Vec<Association>> {
    let rows = list_by_entity(conn, entity_type, entity_id)?;
    for row in &rows {
        delete_association(conn, row.id)?;
    }
    Ok(rows)
}

/// List an entity's associations: primary first, then sort order, then newest.
pub fn list_by_entity(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Vec<Association>> {
    let entity_type = entity_type.to_string();
    query_associations(
        conn,
        "entity_type = :entity_type AND entity_id = :entity_id",
        rusqlite::named_params! {
            ":entity_type": entity_type,
            ":entity_id": entity_id,
        },
    )
}

/// List every association that references a blob.
pub fn list_by_blob(conn: &Connection, blob_id: BlobId) -> Result<Vec<Association>> {
    let blob_id = blob_id.to_string();
    query_associations(
        conn,
        "blob_id = :blob_id",
        rusqlite::named_params! { ":blob_id": blob_id },
    )
}

/// Number of associations referencing a blob.
pub fn reference_count(conn: &Connection, blob_id: BlobId) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM blob_associations WHERE blob_id = :blob_id",
        rusqlite::named_params! { ":blob_id": blob_id.to_string() },
        |row| row.get(0),
    )
    .map_err(|e| Error::storage(e.to_string()))
}
