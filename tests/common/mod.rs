//! Shared test harness for integration tests.
//!
//! [`TestHarness`] opens a file-backed database in a temp directory, so the
//! pool really hands out several connections and concurrent writers contend
//! for SQLite's write lock the way they do in production.

#![allow(dead_code)]

use std::io::Cursor;

use flowshelf::config::ImagesConfig;
use flowshelf::images::{LifecycleManager, UploadMeta};
use flowshelf_common::BlobId;
use flowshelf_db::pool::{init_pool_with_size, DbPool, PooledConnection};
use image::{ImageFormat, RgbImage};
use tempfile::TempDir;

pub const POOL_SIZE: u32 = 8;

pub struct TestHarness {
    pub manager: LifecycleManager,
    pub pool: DbPool,
    _dir: TempDir,
}

impl TestHarness {
    /// Harness with the default `[images]` configuration.
    pub fn new() -> Self {
        Self::with_config(ImagesConfig::default())
    }

    pub fn with_config(images: ImagesConfig) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("flowshelf.db");
        let pool = init_pool_with_size(path.to_str().expect("utf-8 temp path"), POOL_SIZE)
            .expect("failed to open file pool");
        let manager = LifecycleManager::from_config(pool.clone(), &images);

        Self {
            manager,
            pool,
            _dir: dir,
        }
    }

    pub fn conn(&self) -> PooledConnection {
        self.pool.get().expect("failed to get connection")
    }

    /// Upload a small solid PNG and return its id.
    pub fn upload_png(&self, name: &str) -> BlobId {
        self.manager
            .upload_temp(&png_bytes(48, 32), UploadMeta::new(name, "image/png"))
            .expect("upload failed")
            .blob_id
    }

    pub fn blob_count(&self) -> i64 {
        flowshelf_db::queries::blobs::count_blobs(&self.conn()).expect("count failed")
    }
}

/// Encode a solid-colour PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([30, 120, 210]));
    encode_png(&img)
}

/// Encode a PNG of pseudo-random pixels. Noise does not compress, so the
/// file ends up slightly larger than `width * height * 3` bytes.
pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    let img = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        image::Rgb([r, g, b])
    });
    encode_png(&img)
}

fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("failed to encode png");
    buf.into_inner()
}

pub const SVG: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="80"><rect width="120" height="80" fill="#3a7"/></svg>"##;
