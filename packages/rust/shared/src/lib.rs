//! Shared types, error model, and configuration for phdharvest.
//!
//! This crate is the foundation depended on by all other phdharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`Doctorate`], [`DoctorateId`], [`Stage`], [`Source`])
//! - Configuration ([`AppConfig`] and the per-stage runtime configs)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CleanConfig, CleaningSection, DefaultsConfig, DownloadConfig, DownloadSection,
    GrobidConfig, GrobidSection, PortalSection, ScrapeConfig, config_dir, config_file_path,
    init_config, init_config_at, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{Doctorate, DoctorateId, Source, Stage};
