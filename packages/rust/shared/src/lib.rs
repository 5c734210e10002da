//! Shared types, error model, and configuration for PostForge.
//!
//! This crate is the foundation depended on by all other PostForge crates.
//! It provides:
//! - [`PostForgeError`], the unified error type
//! - Domain types ([`Keyword`], [`Topic`], [`Post`], [`JobRun`], [`ScheduleConfig`])
//! - Configuration ([`AppConfig`], [`GenerationConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, GenerationConfig, GenerationOverrides, GenerationServiceConfig,
    PipelineConfig, QualityRules, SchedulerConfig, SiteConfig, Tone, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
    validate_config,
};
pub use error::{PostForgeError, Result};
pub use types::{
    FULL_GENERATION_JOB, FaqItem, JobLogLine, JobRun, JobStatus, Keyword, KeywordStatus, Post,
    PostStatus, ScheduleConfig, SearchIntent, TocEntry, TokenUsage, Topic, TopicStatus, new_id,
};
