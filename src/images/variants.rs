//! Variant generation.
//!
//! Renders fixed-size renditions of stored blobs and upserts them keyed by
//! `(blob_id, variant_type)`. Raster sources are shrunk to fit the preset box
//! and re-encoded as JPEG at the preset quality; vector sources are copied
//! byte for byte.

use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::Utc;
use flowshelf_common::{mime, BlobId, Error, Result};
use flowshelf_db::models::{Blob, Variant};
use flowshelf_db::pool::{get_conn, DbPool};
use flowshelf_db::queries::{blobs, variants};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::config::VariantPreset;

/// Encoded output of one rendition.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub payload: Vec<u8>,
}

/// Outcome of generating a set of presets for one blob.
#[derive(Debug, Default)]
pub struct GenerationReport {
    /// Presets stored successfully.
    pub built: Vec<String>,
    /// Presets that failed, with the reason. The rest were unaffected.
    pub failed: Vec<(String, Error)>,
}

impl GenerationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_types(&self) -> Vec<String> {
        self.failed.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Builds and looks up renditions of stored blobs.
pub struct VariantGenerator {
    pool: DbPool,
    presets: BTreeMap<String, VariantPreset>,
}

impl VariantGenerator {
    pub fn new(pool: DbPool, presets: BTreeMap<String, VariantPreset>) -> Self {
        Self { pool, presets }
    }

    /// Configured presets by name.
    pub fn presets(&self) -> &BTreeMap<String, VariantPreset> {
        &self.presets
    }

    fn load_blob(&self, blob_id: BlobId) -> Result<Blob> {
        let conn = get_conn(&self.pool)?;
        blobs::get_blob(&conn, blob_id)?
            .ok_or_else(|| Error::not_found(format!("blob {}", blob_id)))
    }

    fn store(
        &self,
        blob_id: BlobId,
        variant_type: &str,
        preset: VariantPreset,
        rendered: Rendered,
    ) -> Result<()> {
        let variant = Variant {
            blob_id,
            variant_type: variant_type.to_string(),
            mime_type: rendered.mime_type,
            width: rendered.width,
            height: rendered.height,
            quality: preset.quality,
            byte_size: rendered.payload.len() as i64,
            payload: rendered.payload,
            created_at: Utc::now(),
        };

        let conn = get_conn(&self.pool)?;
        variants::upsert_variant(&conn, &variant)
    }

    /// Create or replace one rendition of a blob.
    ///
    /// The payload is rendered without holding a pooled connection. Calling
    /// this twice leaves a single row, holding the second result.
    ///
    /// # Errors
    ///
    /// * `Error::Validation` - the preset cannot produce a rendition
    /// * `Error::NotFound` - the blob does not exist
    /// * `Error::Image` - the raster payload could not be decoded or encoded
    pub fn ensure_variant(
        &self,
        blob_id: BlobId,
        variant_type: &str,
        preset: VariantPreset,
    ) -> Result<()> {
        let blob = self.load_blob(blob_id)?;
        let rendered = render(&blob, preset)?;
        self.store(blob_id, variant_type, preset, rendered)?;

        tracing::debug!(blob_id = %blob_id, variant = variant_type, "Generated variant");
        Ok(())
    }

    /// [`ensure_variant`](Self::ensure_variant) for a configured preset.
    pub fn ensure_preset(&self, blob_id: BlobId, variant_type: &str) -> Result<()> {
        let preset = *self
            .presets
            .get(variant_type)
            .ok_or_else(|| Error::not_found(format!("variant preset {}", variant_type)))?;
        self.ensure_variant(blob_id, variant_type, preset)
    }

    /// Generate the named presets (all presets when `only` is empty).
    ///
    /// A failing preset is logged and recorded in the report; it does not
    /// stop the others. Only a missing blob or an unreadable one fails the
    /// whole call.
    pub fn ensure_presets(&self, blob_id: BlobId, only: &[String]) -> Result<GenerationReport> {
        let blob = self.load_blob(blob_id)?;
        let mut report = GenerationReport::default();

        for (name, preset) in &self.presets {
            if !only.is_empty() && !only.contains(name) {
                continue;
            }

            let outcome = render(&blob, *preset)
                .and_then(|rendered| self.store(blob_id, name, *preset, rendered));

            match outcome {
                Ok(()) => report.built.push(name.clone()),
                Err(e) => {
                    tracing::warn!(
                        blob_id = %blob_id,
                        variant = %name,
                        error = %e,
                        "Variant generation failed"
                    );
                    report.failed.push((name.clone(), e));
                }
            }
        }

        Ok(report)
    }

    /// Generate every configured preset.
    pub fn ensure_all(&self, blob_id: BlobId) -> Result<GenerationReport> {
        self.ensure_presets(blob_id, &[])
    }

    /// Fetch a rendition. `None` means it has not been generated (yet).
    pub fn get_variant(&self, blob_id: BlobId, variant_type: &str) -> Result<Option<Variant>> {
        let conn = get_conn(&self.pool)?;
        variants::get_variant(&conn, blob_id, variant_type)
    }

    /// All renditions currently stored for a blob.
    pub fn list_variants(&self, blob_id: BlobId) -> Result<Vec<Variant>> {
        let conn = get_conn(&self.pool)?;
        variants::list_variants(&conn, blob_id)
    }
}

/// Render one preset from a blob.
///
/// Vector images pass through unchanged and report the preset box as their
/// size. Raster images larger than the box are downscaled to fit it with
/// their aspect ratio kept; smaller ones keep their size. Either way the
/// result is re-encoded as JPEG.
///
/// # Errors
///
/// * `Error::Validation` - the preset has a zero dimension or a quality
///   outside 1-100
/// * `Error::Image` - the raster payload could not be decoded or encoded
pub fn render(blob: &Blob, preset: VariantPreset) -> Result<Rendered> {
    check_preset(preset)?;

    if mime::is_vector(&blob.mime_type) {
        return Ok(Rendered {
            mime_type: blob.mime_type.clone(),
            width: preset.width,
            height: preset.height,
            payload: blob.payload.clone(),
        });
    }

    let img = image::load_from_memory(&blob.payload)
        .map_err(|e| Error::image(format!("Failed to decode blob {}: {}", blob.id, e)))?;

    let img = if img.width() > preset.width || img.height() > preset.height {
        img.resize(preset.width, preset.height, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, preset.quality)
        .encode_image(&rgb)
        .map_err(|e| Error::image(format!("Failed to encode variant of {}: {}", blob.id, e)))?;

    Ok(Rendered {
        mime_type: mime::RASTER_VARIANT_MIME.to_string(),
        width: rgb.width(),
        height: rgb.height(),
        payload: buf.into_inner(),
    })
}

fn check_preset(preset: VariantPreset) -> Result<()> {
    if preset.width == 0 || preset.height == 0 {
        return Err(Error::validation(format!(
            "Variant box {}x{} has a zero dimension",
            preset.width, preset.height
        )));
    }
    if !(1..=100).contains(&preset.quality) {
        return Err(Error::validation(format!(
            "Variant quality must be between 1 and 100, got {}",
            preset.quality
        )));
    }
    Ok(())
}
