//! Flowshelf-Common: Shared types, IDs, and errors.
//!
//! This crate provides common functionality used across flowshelf:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for blobs and associations
//! - **Core Types**: The kinds of marketplace records that own images
//! - **Mime Utilities**: Normalization and classification of image mime types
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use flowshelf_common::{BlobId, EntityType, Error, Result};
//! use flowshelf_common::mime::is_vector;
//!
//! let blob_id = BlobId::new();
//! let owner = EntityType::Workflow;
//!
//! assert!(is_vector("image/svg+xml"));
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("blob"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod mime;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
