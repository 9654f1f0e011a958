//! Summary cache staleness rules.

use chrono::{DateTime, Duration, Utc};

use trendscout_shared::{Candidate, CacheConfig, SummaryCacheEntry};

/// Why a summary must be generated again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegenReason {
    ForceRefresh,
    NoCache,
    Expired,
    DescriptionChanged,
    /// Relative star growth since the cached count.
    StarGrowth(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheDecision {
    Reuse,
    Regenerate(RegenReason),
}

impl CacheDecision {
    pub fn is_reuse(&self) -> bool {
        matches!(self, Self::Reuse)
    }
}

/// Decides whether a cached summary can stand in for a fresh one.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    expiry: Duration,
    star_growth_threshold: f64,
    force_refresh: bool,
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            expiry: Duration::days(i64::from(config.expiry_days)),
            star_growth_threshold: config.star_growth_threshold,
            force_refresh: config.force_refresh,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl CachePolicy {
    /// Copy of this policy with `force_refresh` turned on when `force` is set.
    pub fn forcing(&self, force: bool) -> Self {
        Self {
            force_refresh: self.force_refresh || force,
            ..self.clone()
        }
    }

    /// First matching rule wins: force, missing, expired, description, growth.
    pub fn decide(
        &self,
        candidate: &Candidate,
        cached: Option<&SummaryCacheEntry>,
        now: DateTime<Utc>,
    ) -> CacheDecision {
        if self.force_refresh {
            return CacheDecision::Regenerate(RegenReason::ForceRefresh);
        }
        let Some(entry) = cached else {
            return CacheDecision::Regenerate(RegenReason::NoCache);
        };
        if now - entry.created_at > self.expiry {
            return CacheDecision::Regenerate(RegenReason::Expired);
        }
        if entry.source_description != candidate.description {
            return CacheDecision::Regenerate(RegenReason::DescriptionChanged);
        }
        if let Some(ratio) = growth_ratio(entry.source_star_count, candidate.stars) {
            if ratio >= self.star_growth_threshold {
                return CacheDecision::Regenerate(RegenReason::StarGrowth(ratio));
            }
        }
        CacheDecision::Reuse
    }
}

/// `(current - previous) / previous`; undefined without a positive previous count.
fn growth_ratio(previous: Option<u64>, current: u64) -> Option<f64> {
    let previous = previous.filter(|&p| p > 0)? as f64;
    Some((current as f64 - previous) / previous)
}
