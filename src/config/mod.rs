mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;

    normalize_mime_types(&mut config.images);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./flowshelf.toml",
        "~/.config/flowshelf/config.toml",
        "/etc/flowshelf/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn normalize_mime_types(images: &mut ImagesConfig) {
    for mime in images.allowed_mime_types.iter_mut() {
        *mime = flowshelf_common::mime::normalize(mime);
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.database.pool_size == 0 {
        anyhow::bail!("Database pool size cannot be 0");
    }

    if config.images.max_upload_bytes == 0 {
        anyhow::bail!("Maximum upload size cannot be 0");
    }

    if config.images.allowed_mime_types.is_empty() {
        anyhow::bail!("At least one mime type must be allowed");
    }

    for mime in &config.images.allowed_mime_types {
        if !flowshelf_common::mime::is_image(mime) {
            tracing::warn!(mime = %mime, "Allowed mime type is not an image type");
        }
    }

    for (name, preset) in &config.images.variants {
        if preset.width == 0 || preset.height == 0 {
            anyhow::bail!("Variant '{}' must have non-zero dimensions", name);
        }
        if !(1..=100).contains(&preset.quality) {
            anyhow::bail!(
                "Variant '{}' quality must be between 1 and 100, got {}",
                name,
                preset.quality
            );
        }
    }

    if config.queue.capacity == 0 {
        anyhow::bail!("Queue capacity cannot be 0");
    }

    if config.queue.max_attempts == 0 {
        anyhow::bail!("Queue max_attempts cannot be 0");
    }

    Ok(())
}
