mod cli;

use flowshelf::config::{self, Config};
use flowshelf::images::{
    LifecycleManager, LinkOptions, UploadMeta, VariantEvent, VariantJob, VariantQueue,
};
use flowshelf_common::{BlobId, EntityType};
use flowshelf_db::pool::{init_pool_with_size, DbPool};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

fn open_pool(config: &Config) -> Result<DbPool> {
    let path = config.database.path.to_string_lossy();
    let path = shellexpand::tilde(&path);
    tracing::debug!("Opening database at {}", path);

    let pool = init_pool_with_size(&path, config.database.pool_size)
        .with_context(|| format!("Failed to open database {}", path))?;
    Ok(pool)
}

fn open_manager(config_path: Option<&Path>) -> Result<(Config, LifecycleManager)> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let manager = LifecycleManager::from_config(pool, &config.images);
    Ok((config, manager))
}

fn parse_blob_id(value: &str) -> Result<BlobId> {
    value
        .parse::<BlobId>()
        .with_context(|| format!("Invalid blob id: {}", value))
}

fn parse_entity_type(value: &str) -> Result<EntityType> {
    value
        .parse::<EntityType>()
        .map_err(|e| anyhow::anyhow!(e))
}

async fn upload_file(file: &Path, mime: Option<String>, config_path: Option<&Path>) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read upload: {:?}", file))?;

    let mime_type = mime.unwrap_or_else(|| {
        mime_guess::from_path(file)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (config, manager) = open_manager(config_path)?;
    let queue = VariantQueue::new(Arc::clone(manager.variants()), &config.queue);
    let manager = manager.with_queue(queue);

    let receipt = manager.upload_temp(&bytes, UploadMeta::new(filename, mime_type));

    // Let scheduled variants finish before the runtime goes away.
    manager.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&receipt?)?);
    Ok(())
}

fn confirm_blob(
    blob: &str,
    entity_type: &str,
    entity_id: &str,
    options: LinkOptions,
    config_path: Option<&Path>,
) -> Result<()> {
    let blob_id = parse_blob_id(blob)?;
    let entity_type = parse_entity_type(entity_type)?;
    let (_, manager) = open_manager(config_path)?;

    let association = manager.confirm(blob_id, entity_type, entity_id, &options)?;
    println!("{}", serde_json::to_string_pretty(&association)?);
    Ok(())
}

fn delete_image(
    entity_type: &str,
    entity_id: &str,
    usage: Option<&str>,
    force: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let entity_type = parse_entity_type(entity_type)?;
    let (_, manager) = open_manager(config_path)?;

    let outcome = match usage {
        Some(usage) => manager.delete_entity_image(entity_type, entity_id, usage, force)?,
        None => manager.delete_entity_images(entity_type, entity_id, force)?,
    };
    if outcome.unlinked.is_empty() {
        match usage {
            Some(usage) => println!("No image in {} {} slot {}", entity_type, entity_id, usage),
            None => println!("No images for {} {}", entity_type, entity_id),
        }
        return Ok(());
    }

    for association in &outcome.unlinked {
        println!("Unlinked {} from slot {}", association.blob_id, association.usage_type);
    }

    for id in &outcome.deleted {
        println!("Deleted blob {}", id);
    }
    for id in &outcome.retained {
        println!("Kept blob {} (still referenced)", id);
    }
    Ok(())
}

fn discard_blob(blob: &str, config_path: Option<&Path>) -> Result<()> {
    let blob_id = parse_blob_id(blob)?;
    let (_, manager) = open_manager(config_path)?;

    if manager.cleanup_orphan_temp(blob_id)? {
        println!("Discarded blob {}", blob_id);
    } else {
        println!("Blob {} is missing or in use; nothing discarded", blob_id);
    }
    Ok(())
}

fn list_images(entity_type: &str, entity_id: &str, config_path: Option<&Path>) -> Result<()> {
    let entity_type = parse_entity_type(entity_type)?;
    let (_, manager) = open_manager(config_path)?;

    let associations = manager
        .associations()
        .list_by_entity(entity_type, entity_id)?;

    if associations.is_empty() {
        println!("No images for {} {}", entity_type, entity_id);
        return Ok(());
    }

    for association in associations {
        let variants = manager.variants().list_variants(association.blob_id)?;
        let names: Vec<&str> = variants.iter().map(|v| v.variant_type.as_str()).collect();
        println!(
            "{:<12} {} {}sort={} variants=[{}]",
            association.usage_type,
            association.blob_id,
            if association.is_primary { "primary " } else { "" },
            association.sort_order,
            names.join(", ")
        );
    }
    Ok(())
}

fn export_blob(
    blob: &str,
    variant: Option<&str>,
    output: &Path,
    config_path: Option<&Path>,
) -> Result<()> {
    let blob_id = parse_blob_id(blob)?;
    let (_, manager) = open_manager(config_path)?;

    let (mime_type, payload) = match variant {
        Some(variant) => {
            let rendition = manager
                .fetch_rendition(blob_id, variant)?
                .with_context(|| format!("Blob {} not found", blob_id))?;
            if rendition.is_original {
                tracing::warn!("Variant {} unavailable; exporting original", variant);
            }
            (rendition.mime_type, rendition.payload)
        }
        None => {
            let blob = manager
                .blobs()
                .get(blob_id)?
                .with_context(|| format!("Blob {} not found", blob_id))?;
            (blob.mime_type, blob.payload)
        }
    };

    std::fs::write(output, &payload)
        .with_context(|| format!("Failed to write {:?}", output))?;
    println!("Wrote {} bytes ({}) to {:?}", payload.len(), mime_type, output);
    Ok(())
}

async fn regenerate_variants(
    blob: &str,
    variants: Vec<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let blob_id = parse_blob_id(blob)?;
    let (config, manager) = open_manager(config_path)?;

    if manager.blob_state(blob_id)?.is_none() {
        anyhow::bail!("Blob {} not found", blob_id);
    }
    if let Some(unknown) = variants
        .iter()
        .find(|name| !manager.variants().presets().contains_key(*name))
    {
        anyhow::bail!("Unknown variant preset '{}'", unknown);
    }

    let queue = VariantQueue::new(Arc::clone(manager.variants()), &config.queue);
    let mut events = queue.subscribe();
    queue
        .submit(VariantJob {
            blob_id,
            variant_types: variants,
        })
        .await?;
    queue.shutdown().await;

    let mut built = Vec::new();
    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            VariantEvent::Generated { variant_types, .. } => built.extend(variant_types),
            VariantEvent::Failed {
                variant_type,
                error,
                ..
            } => {
                println!("Failed {}: {}", variant_type, error);
                failed += 1;
            }
        }
    }
    println!("Built {} variant(s): {}", built.len(), built.join(", "));

    if failed > 0 {
        anyhow::bail!("{} variant(s) failed", failed);
    }
    Ok(())
}

fn list_orphans(older_than_hours: Option<i64>, config_path: Option<&Path>) -> Result<()> {
    let min_age = older_than_hours
        .map(|hours| {
            chrono::TimeDelta::try_hours(hours)
                .filter(|age| *age >= chrono::TimeDelta::zero())
                .with_context(|| format!("--older-than-hours {} is out of range", hours))
        })
        .transpose()?;
    let (_, manager) = open_manager(config_path)?;

    let orphans = manager.blobs().list_orphans(min_age)?;

    println!("Orphaned blobs: {}", orphans.len());
    for blob in orphans {
        println!(
            "  {} {} {} {} bytes, created {}",
            blob.id, blob.filename, blob.mime_type, blob.byte_size, blob.created_at
        );
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_summary(&Config::default());
        }
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Database: {}", config.database.path.display());
    println!("  Pool size: {}", config.database.pool_size);
    println!("  Max upload: {} bytes", config.images.max_upload_bytes);
    println!(
        "  Allowed types: {}",
        config.images.allowed_mime_types.join(", ")
    );
    println!("  Variants: {}", config.images.variants.len());
    for (name, preset) in &config.images.variants {
        println!(
            "    {}: {}x{} q{}",
            name, preset.width, preset.height, preset.quality
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "flowshelf=debug,flowshelf_db=debug,flowshelf_common=debug".to_string()
        } else {
            "flowshelf=info,flowshelf_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Upload { file, mime } => {
            // The variant queue needs a runtime
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(upload_file(&file, mime, config_path))
        }
        Commands::Confirm {
            blob,
            entity_type,
            entity_id,
            usage,
            primary,
            sort_order,
        } => {
            let options = LinkOptions {
                usage_type: usage,
                is_primary: primary,
                sort_order,
            };
            confirm_blob(&blob, &entity_type, &entity_id, options, config_path)
        }
        Commands::Delete {
            entity_type,
            entity_id,
            usage,
            all: _,
            force,
        } => delete_image(&entity_type, &entity_id, usage.as_deref(), force, config_path),
        Commands::Discard { blob } => discard_blob(&blob, config_path),
        Commands::List {
            entity_type,
            entity_id,
        } => list_images(&entity_type, &entity_id, config_path),
        Commands::Export {
            blob,
            variant,
            output,
        } => export_blob(&blob, variant.as_deref(), &output, config_path),
        Commands::Regenerate { blob, variants } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(regenerate_variants(&blob, variants, config_path))
        }
        Commands::Orphans { older_than_hours } => list_orphans(older_than_hours, config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            validate_config(validate_path.as_deref().or(config_path))
        }
        Commands::Version => {
            println!("flowshelf {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
