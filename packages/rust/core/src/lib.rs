//! Core pipeline orchestration and domain logic for TrendScout.
//!
//! This crate ties together the listing source, selection filters, the
//! summary cache, AI providers and notification into a single run
//! (`PipelineOrchestrator::run`).

pub mod cache_policy;
pub mod collaborators;
pub mod notify;
pub mod pipeline;
pub mod providers;
pub mod report;
pub mod source;
pub mod summarizer;

pub use cache_policy::{CacheDecision, CachePolicy, RegenReason};
pub use collaborators::{ListingSource, Notifier, TrendStore};
pub use notify::{LogNotifier, WebhookNotifier, digest_text};
pub use pipeline::{PipelineOrchestrator, ProgressReporter, RunOutcome, RunRequest, SilentProgress};
pub use providers::{CompletionRequest, OpenAiCompatibleProvider, ProviderError, SummaryProvider, build_providers};
pub use report::{FaqEntry, IntegrationExample, ProjectReport, ReportScores, ScoreDimension, parse_report};
pub use source::TrendingSource;
pub use summarizer::{ReportEvent, ReportOutcome, Summarizer, fill_prompt};
