//! Association manager: binds blobs to entity usage slots.

use flowshelf_common::{BlobId, EntityType, Result};
use flowshelf_db::models::Association;
use flowshelf_db::pool::{get_conn, write_transaction, DbPool};
use flowshelf_db::queries::associations;

/// Slot and ordering options for [`AssociationManager::link`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub usage_type: String,
    pub is_primary: bool,
    pub sort_order: i32,
}

impl LinkOptions {
    /// A primary binding at sort position 0.
    pub fn primary(usage_type: impl Into<String>) -> Self {
        Self {
            usage_type: usage_type.into(),
            is_primary: true,
            sort_order: 0,
        }
    }

    /// A non-primary binding at the given sort position.
    pub fn secondary(usage_type: impl Into<String>, sort_order: i32) -> Self {
        Self {
            usage_type: usage_type.into(),
            is_primary: false,
            sort_order,
        }
    }
}

/// Reads and writes blob-to-entity bindings.
#[derive(Clone)]
pub struct AssociationManager {
    pool: DbPool,
}

impl AssociationManager {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Bind a blob into a slot.
    ///
    /// Clearing the previous primary and writing the new row happen in one
    /// write transaction. Repeating an identical call is a no-op.
    pub fn link(
        &self,
        blob_id: BlobId,
        entity_type: EntityType,
        entity_id: &str,
        options: &LinkOptions,
    ) -> Result<Association> {
        write_transaction(&self.pool, |tx| {
            associations::link(
                tx,
                blob_id,
                entity_type,
                entity_id,
                &options.usage_type,
                options.is_primary,
                options.sort_order,
            )
        })
    }

    /// Remove the leading (primary) row of a slot and return it.
    pub fn unlink(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        usage_type: &str,
    ) -> Result<Option<Association>> {
        write_transaction(&self.pool, |tx| {
            associations::unlink(tx, entity_type, entity_id, usage_type)
        })
    }

    /// An entity's bindings: primary first, then sort order, then newest.
    pub fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<Association>> {
        let conn = get_conn(&self.pool)?;
        associations::list_by_entity(&conn, entity_type, entity_id)
    }

    /// Every binding that references a blob.
    pub fn list_by_blob(&self, blob_id: BlobId) -> Result<Vec<Association>> {
        let conn = get_conn(&self.pool)?;
        associations::list_by_blob(&conn, blob_id)
    }

    /// Number of bindings that reference a blob.
    pub fn reference_count(&self, blob_id: BlobId) -> Result<i64> {
        let conn = get_conn(&self.pool)?;
        associations::reference_count(&conn, blob_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::repository::{BlobRepository, UploadMeta};
    use flowshelf_common::Error;
    use flowshelf_db::pool::init_memory_pool;

    fn setup() -> (BlobRepository, AssociationManager) {
        let pool = init_memory_pool().unwrap();
        (BlobRepository::new(pool.clone()), AssociationManager::new(pool))
    }

    fn store(repo: &BlobRepository, name: &str) -> BlobId {
        repo.store(b"img", &UploadMeta::new(name, "image/png"))
            .unwrap()
            .id
    }

    #[test]
    fn test_link_and_list() {
        let (repo, manager) = setup();
        let blob = store(&repo, "a.png");

        manager
            .link(blob, EntityType::Author, "17", &LinkOptions::primary("avatar"))
            .unwrap();

        let listed = manager.list_by_entity(EntityType::Author, "17").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].blob_id, blob);
        assert!(listed[0].is_primary);
    }

    #[test]
    fn test_repeated_link_is_idempotent() {
        let (repo, manager) = setup();
        let blob = store(&repo, "a.png");
        let options = LinkOptions::primary("thumbnail");

        manager.link(blob, EntityType::Workflow, "wf", &options).unwrap();
        manager.link(blob, EntityType::Workflow, "wf", &options).unwrap();

        assert_eq!(manager.reference_count(blob).unwrap(), 1);
    }

    #[test]
    fn test_single_primary_per_slot() {
        let (repo, manager) = setup();
        let a = store(&repo, "a.png");
        let b = store(&repo, "b.png");
        let c = store(&repo, "c.png");

        manager
            .link(a, EntityType::Workflow, "wf", &LinkOptions::primary("gallery"))
            .unwrap();
        manager
            .link(b, EntityType::Workflow, "wf", &LinkOptions::secondary("gallery", 1))
            .unwrap();
        manager
            .link(c, EntityType::Workflow, "wf", &LinkOptions::primary("gallery"))
            .unwrap();

        let listed = manager.list_by_entity(EntityType::Workflow, "wf").unwrap();
        let primaries: Vec<BlobId> = listed
            .iter()
            .filter(|a| a.is_primary)
            .map(|a| a.blob_id)
            .collect();
        assert_eq!(primaries, vec![c]);
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn test_unlink() {
        let (repo, manager) = setup();
        let blob = store(&repo, "a.png");
        manager
            .link(blob, EntityType::Category, "c1", &LinkOptions::primary("icon"))
            .unwrap();

        let removed = manager.unlink(EntityType::Category, "c1", "icon").unwrap();
        assert_eq!(removed.map(|a| a.blob_id), Some(blob));
        assert!(manager
            .unlink(EntityType::Category, "c1", "icon")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_link_unknown_blob_rolls_back() {
        let (repo, manager) = setup();
        let existing = store(&repo, "a.png");
        manager
            .link(existing, EntityType::Workflow, "wf", &LinkOptions::primary("thumbnail"))
            .unwrap();

        // The primary clear runs before the failing insert; both must roll back.
        let result = manager.link(
            BlobId::new(),
            EntityType::Workflow,
            "wf",
            &LinkOptions::primary("thumbnail"),
        );
        assert!(matches!(result, Err(Error::Storage(_))));

        let listed = manager.list_by_entity(EntityType::Workflow, "wf").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_primary);
    }

    #[test]
    fn test_list_by_blob() {
        let (repo, manager) = setup();
        let blob = store(&repo, "shared.png");
        manager
            .link(blob, EntityType::Workflow, "wf-1", &LinkOptions::primary("thumbnail"))
            .unwrap();
        manager
            .link(blob, EntityType::Workflow, "wf-2", &LinkOptions::primary("thumbnail"))
            .unwrap();

        assert_eq!(manager.list_by_blob(blob).unwrap().len(), 2);
    }
}
