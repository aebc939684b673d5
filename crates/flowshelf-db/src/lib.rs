//! SQLite persistence for flowshelf image blobs.
//!
//! Blobs hold the original upload bytes, `blob_variants` the resized
//! renditions and `blob_associations` the links from application entities to
//! blobs. A blob with no association rows is an orphan (a temp upload).
//!
//! Query functions take a plain `&Connection`; anything that must read and
//! write atomically goes through [`pool::write_transaction`].
//!
//! # Example
//!
//! ```no_run
//! use flowshelf_db::pool::{init_pool, get_conn};
//! use flowshelf_db::queries::blobs;
//!
//! let pool = init_pool("/var/lib/flowshelf/images.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! for orphan in blobs::list_orphans(&conn, None).unwrap() {
//!     println!("{} {}", orphan.id, orphan.filename);
//! }
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
