//! Blob repository: persistence of original uploads.
//!
//! The repository owns its pool handle and does no validation and no
//! reference counting; both belong to [`LifecycleManager`](super::LifecycleManager).

use std::io::Cursor;

use chrono::{TimeDelta, Utc};
use flowshelf_common::{mime, BlobId, Error, Result};
use flowshelf_db::models::{Blob, BlobSummary, BlobUpdate, NewBlob};
use flowshelf_db::pool::{get_conn, DbPool};
use flowshelf_db::queries::blobs;
use sha2::{Digest, Sha256};

/// Caller-supplied metadata for an upload.
#[derive(Debug, Clone)]
pub struct UploadMeta {
    pub filename: String,
    pub mime_type: String,
}

impl UploadMeta {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Stores and retrieves original image blobs.
#[derive(Clone)]
pub struct BlobRepository {
    pool: DbPool,
}

impl BlobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The pool this repository reads and writes through.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Persist an original image.
    ///
    /// Computes the checksum and, for raster formats, the pixel dimensions.
    /// A filename already used by another blob of the same mime type is
    /// renamed with a numeric suffix.
    pub fn store(&self, bytes: &[u8], meta: &UploadMeta) -> Result<BlobSummary> {
        let dimensions = probe_dimensions(bytes, &meta.mime_type);

        let new = NewBlob {
            filename: meta.filename.clone(),
            mime_type: meta.mime_type.clone(),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            checksum: compute_checksum(bytes),
            payload: bytes,
        };

        let conn = get_conn(&self.pool)?;
        let stored = blobs::insert_blob(&conn, &new)?;

        tracing::debug!(
            blob_id = %stored.id,
            filename = %stored.filename,
            bytes = stored.byte_size,
            "Stored blob"
        );

        Ok(stored)
    }

    /// Fetch a blob with its payload.
    pub fn get(&self, blob_id: BlobId) -> Result<Option<Blob>> {
        let conn = get_conn(&self.pool)?;
        blobs::get_blob(&conn, blob_id)
    }

    /// Update metadata fields.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the blob does not exist
    /// * `Error::Validation` - the new filename is taken
    pub fn update_meta(&self, blob_id: BlobId, update: &BlobUpdate) -> Result<Blob> {
        let conn = get_conn(&self.pool)?;
        blobs::update_blob(&conn, blob_id, update)?
            .ok_or_else(|| Error::not_found(format!("blob {}", blob_id)))
    }

    /// Remove the blob row unconditionally, returning what was removed.
    pub fn delete(&self, blob_id: BlobId) -> Result<Option<Blob>> {
        let conn = get_conn(&self.pool)?;
        blobs::delete_blob(&conn, blob_id)
    }

    /// Blobs without any association, optionally only those older than `min_age`.
    ///
    /// # Errors
    ///
    /// * `Error::Validation` - `min_age` reaches past the representable dates
    pub fn list_orphans(&self, min_age: Option<TimeDelta>) -> Result<Vec<BlobSummary>> {
        let cutoff = match min_age {
            Some(age) => Some(Utc::now().checked_sub_signed(age).ok_or_else(|| {
                Error::validation(format!("Orphan age {} is out of range", age))
            })?),
            None => None,
        };
        let conn = get_conn(&self.pool)?;
        blobs::list_orphans(&conn, cutoff)
    }
}

/// Hex-encoded SHA-256 of a payload.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Read pixel dimensions from a raster image header.
///
/// Returns `None` for vector formats and for payloads the decoder does not
/// recognize; dimensions are informational and never block a store.
pub fn probe_dimensions(data: &[u8], mime_type: &str) -> Option<(u32, u32)> {
    if mime::is_vector(mime_type) {
        return None;
    }

    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
