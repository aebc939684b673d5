//! Lifecycle manager: upload, confirm and reference-counted deletion.
//!
//! A blob moves through three states:
//!
//! * **Temp** - stored by [`LifecycleManager::upload_temp`], bound to nothing
//! * **Bound** - referenced by at least one association after
//!   [`LifecycleManager::confirm`]
//! * **Deleted** - removed once nothing references it, or when forced
//!
//! Every sequence that touches more than one row runs inside a single
//! `IMMEDIATE` transaction. A failure anywhere rolls the whole sequence back.

use std::sync::Arc;

use flowshelf_common::{mime, BlobId, EntityType, Error, Result};
use flowshelf_db::models::Association;
use flowshelf_db::pool::{get_conn, write_transaction, DbPool};
use flowshelf_db::queries::{associations, blobs};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ImagesConfig;

use super::associations::{AssociationManager, LinkOptions};
use super::queue::VariantQueue;
use super::repository::{BlobRepository, UploadMeta};
use super::validate::{validate_upload, UploadLimits};
use super::variants::VariantGenerator;

/// Response returned to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub blob_id: BlobId,
    /// Stored filename, after collision suffixing.
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
}

/// Where a stored blob sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobState {
    /// Stored but not bound to any entity.
    Temp,
    /// Referenced by at least one association.
    Bound,
}

/// Result of removing an entity's images.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Associations that were removed.
    pub unlinked: Vec<Association>,
    /// Blobs physically deleted.
    pub deleted: Vec<BlobId>,
    /// Blobs kept because another entity still references them.
    pub retained: Vec<BlobId>,
}

/// Payload served for an image request.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub mime_type: String,
    pub payload: Vec<u8>,
    /// True when the original was served because no variant was available.
    pub is_original: bool,
}

/// Orchestrates the repository, variant generator and association manager.
pub struct LifecycleManager {
    blobs: BlobRepository,
    variants: Arc<VariantGenerator>,
    associations: AssociationManager,
    limits: UploadLimits,
    queue: Option<VariantQueue>,
}

impl LifecycleManager {
    pub fn new(
        blobs: BlobRepository,
        variants: Arc<VariantGenerator>,
        associations: AssociationManager,
        limits: UploadLimits,
    ) -> Self {
        Self {
            blobs,
            variants,
            associations,
            limits,
            queue: None,
        }
    }

    /// Build all components over one pool from the `[images]` section.
    pub fn from_config(pool: DbPool, config: &ImagesConfig) -> Self {
        Self::new(
            BlobRepository::new(pool.clone()),
            Arc::new(VariantGenerator::new(pool.clone(), config.variants.clone())),
            AssociationManager::new(pool),
            UploadLimits::from_config(config),
        )
    }

    /// Hand uploads to a background queue for variant generation.
    ///
    /// Without a queue, renditions are generated on first request.
    pub fn with_queue(mut self, queue: VariantQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn blobs(&self) -> &BlobRepository {
        &self.blobs
    }

    pub fn variants(&self) -> &Arc<VariantGenerator> {
        &self.variants
    }

    pub fn associations(&self) -> &AssociationManager {
        &self.associations
    }

    pub fn queue(&self) -> Option<&VariantQueue> {
        self.queue.as_ref()
    }

    fn pool(&self) -> &DbPool {
        self.blobs.pool()
    }

    /// Store an upload as a temp blob and schedule its renditions.
    ///
    /// Validation runs before any storage access, so a rejected upload leaves
    /// no trace. Returns as soon as the original is stored.
    ///
    /// # Errors
    ///
    /// * `Error::Validation` - empty, oversized, or a disallowed mime type
    /// * `Error::Storage` - the blob could not be written
    pub fn upload_temp(&self, bytes: &[u8], meta: UploadMeta) -> Result<UploadReceipt> {
        let mime_type = validate_upload(bytes, &meta.mime_type, &self.limits)?;

        let filename = if meta.filename.trim().is_empty() {
            match mime::extension_for(&mime_type) {
                Some(ext) => format!("upload.{}", ext),
                None => "upload".to_string(),
            }
        } else {
            meta.filename
        };

        let stored = self
            .blobs
            .store(bytes, &UploadMeta::new(filename, mime_type))?;

        match &self.queue {
            Some(queue) => {
                queue.schedule(stored.id);
            }
            None => debug!(blob_id = %stored.id, "No variant queue; renditions deferred"),
        }

        info!(
            blob_id = %stored.id,
            filename = %stored.filename,
            bytes = stored.byte_size,
            "Uploaded temp blob"
        );

        Ok(UploadReceipt {
            blob_id: stored.id,
            filename: stored.filename,
            size: stored.byte_size,
            mime_type: stored.mime_type,
        })
    }

    /// Bind a blob into an entity's slot, replacing whatever held it.
    ///
    /// Every association in the slot is removed first. Each displaced blob
    /// that is left with no references is deleted together with its variants.
    /// The new binding is then written. All of this is one transaction.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - the blob does not exist
    /// * `Error::Storage` - the transaction failed and was rolled back
    pub fn confirm(
        &self,
        blob_id: BlobId,
        entity_type: EntityType,
        entity_id: &str,
        options: &LinkOptions,
    ) -> Result<Association> {
        let (association, reclaimed) = write_transaction(self.pool(), |tx| {
            if !blobs::blob_exists(tx, blob_id)? {
                return Err(Error::not_found(format!("blob {}", blob_id)));
            }

            let displaced =
                associations::unlink_slot(tx, entity_type, entity_id, &options.usage_type)?;

            let association = associations::link(
                tx,
                blob_id,
                entity_type,
                entity_id,
                &options.usage_type,
                options.is_primary,
                options.sort_order,
            )?;

            let mut reclaimed = Vec::new();
            for id in distinct_blobs(&displaced) {
                if id == blob_id {
                    continue;
                }
                if blobs::delete_blob_if_unreferenced(tx, id)? {
                    reclaimed.push(id);
                }
            }

            Ok((association, reclaimed))
        })?;

        info!(
            blob_id = %blob_id,
            entity_type = %entity_type,
            entity_id = %entity_id,
            usage_type = %options.usage_type,
            reclaimed = reclaimed.len(),
            "Confirmed blob"
        );
        for id in &reclaimed {
            debug!(blob_id = %id, "Deleted superseded blob");
        }

        Ok(association)
    }

    /// Remove an entity's image from one slot.
    ///
    /// A freed blob is deleted only when `force` is set or nothing else
    /// references it. Forcing also removes the blob's other associations.
    pub fn delete_entity_image(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        usage_type: &str,
        force: bool,
    ) -> Result<DeleteOutcome> {
        let outcome = write_transaction(self.pool(), |tx| {
            let unlinked = associations::unlink_slot(tx, entity_type, entity_id, usage_type)?;
            release(tx, unlinked, force)
        })?;

        log_outcome(entity_type, entity_id, &outcome);
        Ok(outcome)
    }

    /// Remove every image an entity holds, across all of its slots.
    pub fn delete_entity_images(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        force: bool,
    ) -> Result<DeleteOutcome> {
        let outcome = write_transaction(self.pool(), |tx| {
            let unlinked = associations::unlink_entity(tx, entity_type, entity_id)?;
            release(tx, unlinked, force)
        })?;

        log_outcome(entity_type, entity_id, &outcome);
        Ok(outcome)
    }

    /// Delete a temp blob whose upload was abandoned.
    ///
    /// Returns `false` without touching anything if the blob is missing or
    /// has been bound in the meantime.
    pub fn cleanup_orphan_temp(&self, blob_id: BlobId) -> Result<bool> {
        let conn = get_conn(self.pool())?;
        let deleted = blobs::delete_blob_if_unreferenced(&conn, blob_id)?;

        if deleted {
            info!(blob_id = %blob_id, "Discarded temp blob");
        } else {
            debug!(blob_id = %blob_id, "Temp blob missing or bound; kept");
        }

        Ok(deleted)
    }

    /// Current state of a blob, or `None` if it does not exist.
    pub fn blob_state(&self, blob_id: BlobId) -> Result<Option<BlobState>> {
        let conn = get_conn(self.pool())?;
        if !blobs::blob_exists(&conn, blob_id)? {
            return Ok(None);
        }

        let state = if associations::reference_count(&conn, blob_id)? > 0 {
            BlobState::Bound
        } else {
            BlobState::Temp
        };
        Ok(Some(state))
    }

    /// Number of associations referencing a blob.
    pub fn reference_count(&self, blob_id: BlobId) -> Result<i64> {
        self.associations.reference_count(blob_id)
    }

    /// Payload to serve for `(blob, variant_type)`.
    ///
    /// Serves the stored variant when there is one. A configured preset that
    /// has not been generated yet is built on the spot. If that fails, or the
    /// variant type is unknown, the original is served instead.
    pub fn fetch_rendition(&self, blob_id: BlobId, variant_type: &str) -> Result<Option<Rendition>> {
        if let Some(variant) = self.variants.get_variant(blob_id, variant_type)? {
            return Ok(Some(Rendition {
                mime_type: variant.mime_type,
                payload: variant.payload,
                is_original: false,
            }));
        }

        if self.variants.presets().contains_key(variant_type) {
            match self.variants.ensure_preset(blob_id, variant_type) {
                Ok(()) => {
                    if let Some(variant) = self.variants.get_variant(blob_id, variant_type)? {
                        return Ok(Some(Rendition {
                            mime_type: variant.mime_type,
                            payload: variant.payload,
                            is_original: false,
                        }));
                    }
                }
                Err(Error::NotFound(_)) => return Ok(None),
                Err(e) => {
                    warn!(
                        blob_id = %blob_id,
                        variant = variant_type,
                        error = %e,
                        "On-demand variant failed; serving original"
                    );
                }
            }
        }

        Ok(self.blobs.get(blob_id)?.map(|blob| Rendition {
            mime_type: blob.mime_type,
            payload: blob.payload,
            is_original: true,
        }))
    }

    /// Wait for queued variant jobs to finish.
    pub async fn shutdown(self) {
        if let Some(queue) = self.queue {
            queue.shutdown().await;
        }
    }
}

/// Delete or keep each blob freed by removing `unlinked`.
fn release(conn: &Connection, unlinked: Vec<Association>, force: bool) -> Result<DeleteOutcome> {
    let freed = distinct_blobs(&unlinked);
    let mut outcome = DeleteOutcome {
        unlinked,
        ..Default::default()
    };

    for id in freed {
        let deleted = if force {
            blobs::delete_blob(conn, id)?.is_some()
        } else {
            blobs::delete_blob_if_unreferenced(conn, id)?
        };

        if deleted {
            outcome.deleted.push(id);
        } else {
            outcome.retained.push(id);
        }
    }

    Ok(outcome)
}

/// Blob ids referenced by `rows`, first occurrence order.
fn distinct_blobs(rows: &[Association]) -> Vec<BlobId> {
    let mut ids: Vec<BlobId> = Vec::with_capacity(rows.len());
    for row in rows {
        if !ids.contains(&row.blob_id) {
            ids.push(row.blob_id);
        }
    }
    ids
}

fn log_outcome(entity_type: EntityType, entity_id: &str, outcome: &DeleteOutcome) {
    info!(
        entity_type = %entity_type,
        entity_id = %entity_id,
        unlinked = outcome.unlinked.len(),
        deleted = outcome.deleted.len(),
        retained = outcome.retained.len(),
        "Removed entity images"
    );
}
