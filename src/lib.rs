//! Flowshelf - image blob storage for the workflow-template marketplace
//!
//! This library crate exposes the storage core to the CLI and to integration
//! tests.

pub mod config;
pub mod images;
