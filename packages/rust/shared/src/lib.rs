//! Shared types, error model, and configuration for TrendScout.
//!
//! This crate is the foundation depended on by all other TrendScout crates.
//! It provides:
//! - [`TrendScoutError`], the unified error type
//! - Domain types ([`Candidate`], [`TimeRange`], [`SummaryCacheEntry`], [`SummaryOutcome`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)
//! - [`RetryPolicy`], the backoff loop used by fetch and summarization

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, CacheConfig, FetchConfig, FetchPoliciesConfig, FilterConfig,
    KeywordConfig, MatchField, MatchMode, NotifyConfig, PeriodFloors, ProviderConfig,
    RateLimiterConfig, StorageConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key,
};
pub use error::{Result, TrendScoutError};
pub use retry::RetryPolicy;
pub use types::{
    Candidate, FALLBACK_MARKER, NotifiedCandidate, SummaryCacheEntry, SummaryOutcome, TimeRange,
};
