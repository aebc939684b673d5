//! Rust models matching the database schema.
//!
//! Payload-bearing models skip their bytes when serialized; callers stream
//! payloads directly instead of embedding them in JSON.

use chrono::{DateTime, Utc};
use flowshelf_common::{AssociationId, BlobId, EntityType};
use serde::{Deserialize, Serialize};

/// A stored original image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blob {
    pub id: BlobId,
    pub filename: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Hex-encoded SHA-256 of the payload.
    pub checksum: String,
    #[serde(skip_serializing, default)]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A blob row without its payload, for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobSummary {
    pub id: BlobId,
    pub filename: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new blob.
#[derive(Debug, Clone)]
pub struct NewBlob<'a> {
    pub filename: String,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub checksum: String,
    pub payload: &'a [u8],
}

/// Metadata fields that may change after upload. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobUpdate {
    pub filename: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A derived rendition of a blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub blob_id: BlobId,
    pub variant_type: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub byte_size: i64,
    #[serde(skip_serializing, default)]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A blob bound to one owner's named usage slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Association {
    pub id: AssociationId,
    pub blob_id: BlobId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub usage_type: String,
    pub is_primary: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}
