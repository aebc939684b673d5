use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database file holding blobs, variants and associations
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Number of pooled connections; bounds concurrent storage operations
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("flowshelf.db")
}

fn default_pool_size() -> u32 {
    flowshelf_db::pool::DEFAULT_POOL_SIZE
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImagesConfig {
    /// Largest accepted upload in bytes (default: 5 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Declared mime types accepted for upload
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    /// Named rendition presets generated for every upload
    #[serde(default = "default_variants")]
    pub variants: BTreeMap<String, VariantPreset>,
}

/// Target box and encoder quality for one named rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct VariantPreset {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl VariantPreset {
    pub const fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality,
        }
    }
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/svg+xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_variants() -> BTreeMap<String, VariantPreset> {
    BTreeMap::from([
        ("thumbnail".to_string(), VariantPreset::new(200, 200, 80)),
        ("medium".to_string(), VariantPreset::new(600, 600, 85)),
        ("large".to_string(), VariantPreset::new(1200, 1200, 90)),
    ])
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
            variants: default_variants(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Pending generation jobs held before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Attempts per job before it is given up (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}
