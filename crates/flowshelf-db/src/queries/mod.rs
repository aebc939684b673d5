//! Database query modules.
//!
//! Operations are grouped per table:
//! - blobs: original image rows, filename collision handling, orphan listing
//! - variants: rendition upserts and lookups
//! - associations: slot binding with the primary-flag invariant
//!
//! Every function takes a `&Connection`, so callers can pass either a pooled
//! connection or a `Transaction` to compose several calls atomically.

pub mod associations;
pub mod blobs;
pub mod variants;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

/// Current time formatted the way every timestamp column stores it.
///
/// Fixed precision keeps lexical and chronological order identical.
pub(crate) fn now_timestamp() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let text = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    (now, text)
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a text column with `FromStr`, reporting failures as conversion errors.
pub(crate) fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}

/// Whether an error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
