//! Candidate selection: seen-set deduplication, star/language thresholds,
//! and keyword subscription narrowing.

pub mod dedup;
pub mod keyword;
pub mod threshold;

pub use dedup::{DedupOutcome, deduplicate};
pub use keyword::{KeywordMatch, KeywordMatcher, similarity};
pub use threshold::{FilterDecision, FilterReason, ThresholdFilter};
