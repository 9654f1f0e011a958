//! Seams between the pipeline and the outside world.
//!
//! The orchestrator only talks to storage, the listing source and the
//! notifier through these traits, so runs can be exercised with in-memory
//! stubs.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use trendscout_shared::{Candidate, NotifiedCandidate, Result, SummaryCacheEntry, TimeRange};
use trendscout_storage::Storage;

/// Persistence used by a run: seen-sets, observations and the summary cache.
#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Identities already observed for `range`.
    async fn get_seen_identities(&self, range: TimeRange) -> Result<HashSet<String>>;

    /// Idempotent upsert keyed by identity, range and date. Returns rows written.
    async fn save_candidates(
        &self,
        candidates: &[Candidate],
        range: TimeRange,
        observed_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Newest cached summary for `identity`.
    async fn get_cached_summary(&self, identity: &str) -> Result<Option<SummaryCacheEntry>>;

    /// Star count from the most recent stored observation.
    async fn get_latest_star_count(&self, identity: &str) -> Result<Option<u64>>;

    async fn save_summary(&self, identity: &str, text: &str, model: &str) -> Result<bool>;
}

#[async_trait]
impl TrendStore for Storage {
    async fn get_seen_identities(&self, range: TimeRange) -> Result<HashSet<String>> {
        Storage::get_seen_identities(self, range).await
    }

    async fn save_candidates(
        &self,
        candidates: &[Candidate],
        range: TimeRange,
        observed_at: DateTime<Utc>,
    ) -> Result<usize> {
        Storage::save_candidates(self, candidates, range, observed_at).await
    }

    async fn get_cached_summary(&self, identity: &str) -> Result<Option<SummaryCacheEntry>> {
        Storage::get_cached_summary(self, identity).await
    }

    async fn get_latest_star_count(&self, identity: &str) -> Result<Option<u64>> {
        Storage::get_latest_star_count(self, identity).await
    }

    async fn save_summary(&self, identity: &str, text: &str, model: &str) -> Result<bool> {
        Storage::save_summary(self, identity, text, model).await
    }
}

/// Where a run's survivors are delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the digest. `Ok(false)` means the receiver rejected it.
    async fn send(&self, items: &[NotifiedCandidate], range: TimeRange) -> Result<bool>;
}

/// Produces the raw candidate list for a time-range.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_candidates(&self, range: TimeRange, language: Option<&str>) -> Result<Vec<Candidate>>;
}
