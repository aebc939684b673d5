//! Image blob storage and entity associations.
//!
//! Four components, leaves first:
//!
//! * [`BlobRepository`] persists originals and resolves filename collisions
//! * [`VariantGenerator`] derives fixed-size renditions, keyed by preset name
//! * [`AssociationManager`] binds blobs to `(entity, usage)` slots
//! * [`LifecycleManager`] composes them into upload, confirm and delete
//!
//! Renditions are generated off the request path by a [`VariantQueue`].
//! All components share one [`DbPool`](flowshelf_db::pool::DbPool) handed in
//! at construction.

mod associations;
mod lifecycle;
mod queue;
mod repository;
mod validate;
mod variants;

pub use associations::{AssociationManager, LinkOptions};
pub use lifecycle::{BlobState, DeleteOutcome, LifecycleManager, Rendition, UploadReceipt};
pub use queue::{VariantEvent, VariantJob, VariantQueue};
pub use repository::{compute_checksum, probe_dimensions, BlobRepository, UploadMeta};
pub use validate::{validate_upload, UploadLimits};
pub use variants::{render, GenerationReport, Rendered, VariantGenerator};
