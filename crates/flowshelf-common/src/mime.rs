//! Mime type helpers for uploaded images.
//!
//! Declared mime types arrive from the upload layer in whatever case and with
//! whatever parameters the client sent; they are normalized before any
//! allow-list comparison.

/// Mime types for vector images, which are stored unchanged as every variant.
const VECTOR_MIME_TYPES: &[&str] = &["image/svg+xml"];

/// Mime type used for re-encoded raster variants.
pub const RASTER_VARIANT_MIME: &str = "image/jpeg";

/// Normalize a declared mime type: lowercase, trimmed, parameters stripped.
///
/// # Examples
///
/// ```
/// use flowshelf_common::mime::normalize;
///
/// assert_eq!(normalize(" Image/PNG; charset=binary"), "image/png");
/// ```
pub fn normalize(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Check if a mime type names a vector image format.
///
/// # Examples
///
/// ```
/// use flowshelf_common::mime::is_vector;
///
/// assert!(is_vector("image/svg+xml"));
/// assert!(!is_vector("image/png"));
/// ```
pub fn is_vector(mime: &str) -> bool {
    VECTOR_MIME_TYPES.contains(&normalize(mime).as_str())
}

/// Check if a mime type is an image type at all.
pub fn is_image(mime: &str) -> bool {
    normalize(mime).starts_with("image/")
}

/// Preferred file extension for a mime type, used when renaming exports.
pub fn extension_for(mime: &str) -> Option<&'static str> {
    match normalize(mime).as_str() {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}
