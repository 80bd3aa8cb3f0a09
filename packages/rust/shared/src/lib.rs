//! Shared types, error model, and configuration for Quarry.
//!
//! This crate is the foundation depended on by all other Quarry crates.
//! It provides:
//! - [`QuarryError`] — the unified error type
//! - Domain types ([`Job`], [`Claim`], [`ProviderResult`], [`Citation`], [`Conflict`], [`Report`])
//! - Progress events streamed to observers ([`ProgressEvent`])
//! - Configuration ([`AppConfig`], [`DispatchConfig`], [`SynthesisConfig`], config loading)

pub mod config;
pub mod error;
pub mod events;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DispatchConfig, DispatchSection, ProviderConfig, ProviderKind, RenderSection,
    ServerConfig, StorageConfig, SynthesisConfig, SynthesisSection, config_dir, config_file_path,
    init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{QuarryError, Result};
pub use events::{ProgressEvent, ProviderStatus};
pub use types::{
    Citation, Claim, Conflict, ContextDocument, DocumentKind, Job, JobId, JobSummary,
    ProviderResult, Report, ReportId, ReportRecord, Stage, normalize_claim_text, truncate_chars,
};
