use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowshelf")]
#[command(author, version, about = "Image blob storage for workflow templates")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store an image as a temp blob and generate its variants
    Upload {
        /// Image file to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Declared mime type (guessed from the extension if omitted)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Bind a blob into an entity's image slot
    Confirm {
        /// Blob id returned by upload
        blob: String,

        /// Owning entity type (workflow, category, author)
        entity_type: String,

        /// Owning entity id
        entity_id: String,

        /// Slot name, e.g. thumbnail or avatar
        usage: String,

        /// Mark the binding as the slot's primary image
        #[arg(long)]
        primary: bool,

        /// Position among the entity's images
        #[arg(long, default_value = "0")]
        sort_order: i32,
    },

    /// Remove an entity's image from a slot, or from every slot with --all
    Delete {
        entity_type: String,
        entity_id: String,

        /// Slot to clear
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        usage: Option<String>,

        /// Clear every slot the entity holds
        #[arg(long)]
        all: bool,

        /// Delete the blob even if other entities still use it
        #[arg(long)]
        force: bool,
    },

    /// Delete a temp blob that was never confirmed
    Discard {
        blob: String,
    },

    /// List an entity's images
    List {
        entity_type: String,
        entity_id: String,
    },

    /// Write a blob or one of its variants to a file
    Export {
        blob: String,

        /// Variant preset to export (original if omitted)
        #[arg(long)]
        variant: Option<String>,

        /// Output file
        #[arg(short, long, required = true)]
        output: PathBuf,
    },

    /// Rebuild a blob's variants through the background queue
    Regenerate {
        blob: String,

        /// Preset to rebuild (repeatable; every preset if omitted)
        #[arg(long = "variant")]
        variants: Vec<String>,
    },

    /// List blobs that no entity references
    Orphans {
        /// Only list blobs older than this many hours
        #[arg(long)]
        older_than_hours: Option<i64>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
