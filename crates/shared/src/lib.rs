//! Shared library for the anime theme song catalog.
//!
//! This crate provides common functionality used by the song processor:
//! - Configuration management
//! - Catalog data models and scalar types
//! - Catalog storage and the metadata gatherer contract
//! - File path utilities
//! - Logging infrastructure

pub mod catalog;
pub mod config;
pub mod gatherer;
pub mod logging;
pub mod models;
pub mod paths;
pub mod scalars;

// Re-export commonly used types
pub use catalog::{CatalogStore, JsonCatalogStore, SaveNewOptions};
pub use config::Config;
pub use gatherer::{GatherOptions, JsonFileGatherer, MetadataGatherer};
pub use logging::LogConfig;
pub use models::*;
pub use paths::DataPaths;
pub use scalars::{AspectRatio, SongType, SongTypeAndPosition, VolumeModifier};

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
