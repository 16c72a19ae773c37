//! Shared types, error model, and configuration for dealscout.
//!
//! This crate is the foundation depended on by all other dealscout crates.
//! It provides:
//! - [`DealscoutError`] — the unified error type
//! - Domain types ([`CanonicalCompany`], [`DiscoveredCompany`],
//!   [`MergeCandidate`], [`ReviewTask`], [`DiscoveryRun`], [`CompanyId`])
//! - Configuration ([`AppConfig`], [`MatchingConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, MatchingConfig, SourceEntry, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{DealscoutError, Result};
pub use types::{
    Blocker, BlockerReason, CURRENT_SCHEMA_VERSION, CanonicalCompany, CompanyId,
    DiscoveredCompany, DiscoveryRun, EnrichmentState, FieldProvenance, MatchMethod, MatchOutcome,
    MergeCandidate, MergeStatus, MergeSubject, ReviewTask, RunCounter, RunStatus, SourceType,
    TaskContext, TaskStatus, TaskType, is_valid_country,
};
