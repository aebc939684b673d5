//! Variant database queries.
//!
//! Variants are keyed by `(blob_id, variant_type)`; writing one is always an
//! upsert so regenerating a rendition never duplicates rows.

use flowshelf_common::{BlobId, Error, Result};
use rusqlite::Connection;

use super::{format_timestamp, parse_column, parse_timestamp};
use crate::models::Variant;

const VARIANT_COLUMNS: &str =
    "blob_id, variant_type, mime_type, width, height, quality, byte_size, payload, created_at";

fn parse_variant_row(row: &rusqlite::Row) -> rusqlite::Result<Variant> {
    Ok(Variant {
        blob_id: parse_column(row, 0)?,
        variant_type: row.get(1)?,
        mime_type: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        quality: row.get(5)?,
        byte_size: row.get(6)?,
        payload: row.get(7)?,
        created_at: parse_timestamp(&row.get::<_, String>(8)?),
    })
}

/// Insert a variant, replacing any existing row for the same blob and type.
///
/// # Returns
///
/// * `Ok(())` - The variant is stored
/// * `Err(Error)` - If a database error occurs (including a missing parent blob)
pub fn upsert_variant(conn: &Connection, variant: &Variant) -> Result<()> {
    conn.execute(
        "INSERT INTO blob_variants
             (blob_id, variant_type, mime_type, width, height, quality, byte_size, payload,
              created_at)
         VALUES (:blob_id, :variant_type, :mime_type, :width, :height, :quality, :byte_size,
                 :payload, :created_at)
         ON CONFLICT (blob_id, variant_type) DO UPDATE SET
             mime_type = excluded.mime_type,
             width = excluded.width,
             height = excluded.height,
             quality = excluded.quality,
             byte_size = excluded.byte_size,
             payload = excluded.payload,
             created_at = excluded.created_at",
        rusqlite::named_params! {
            ":blob_id": variant.blob_id.to_string(),
            ":variant_type": &variant.variant_type,
            ":mime_type": &variant.mime_type,
            ":width": variant.width,
            ":height": variant.height,
            ":quality": variant.quality,
            ":byte_size": variant.byte_size,
            ":payload": &variant.payload,
            ":created_at": format_timestamp(variant.created_at),
        },
    )
    .map_err(|e| Error::storage(e.to_string()))?;

    Ok(())
}

/// Get a variant of a blob.
///
/// # Returns
///
/// * `Ok(Some(Variant))` - The variant if it has been generated
/// * `Ok(None)` - If it has not (yet) been generated
/// * `Err(Error)` - If a database error occurs
pub fn get_variant(
    conn: &Connection,
    blob_id: BlobId,
    variant_type: &str,
) -> Result<Option<Variant>> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM blob_variants WHERE blob_id = :blob_id AND variant_type = :variant_type",
            VARIANT_COLUMNS
        ),
        rusqlite::named_params! {
            ":blob_id": blob_id.to_string(),
            ":variant_type": variant_type,
        },
        parse_variant_row,
    );

    match result {
        Ok(variant) => Ok(Some(variant)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::storage(e.to_string())),
    }
}

/// List all generated variants of a blob, ordered by type name.
pub fn list_variants(conn: &Connection, blob_id: BlobId) -> Result<Vec<Variant>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM blob_variants WHERE blob_id = :blob_id ORDER BY variant_type",
            VARIANT_COLUMNS
        ))
        .map_err(|e| Error::storage(e.to_string()))?;

    let variants = stmt
        .query_map(
            rusqlite::named_params! { ":blob_id": blob_id.to_string() },
            parse_variant_row,
        )
        .map_err(|e| Error::storage(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::storage(e.to_string()))?;

    Ok(variants)
}

/// Number of variant rows stored for a blob.
pub fn count_variants(conn: &Connection, blob_id: BlobId) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM blob_variants WHERE blob_id = :blob_id",
        rusqlite::named_params! { ":blob_id": blob_id.to_string() },
        |row| row.get(0),
    )
    .map_err(|e| Error::storage(e.to_string()))
}
