//! Star and language threshold rules.

use tracing::{debug, info};

use trendscout_shared::{Candidate, FilterConfig, TimeRange};

/// Why a candidate was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Passed,
    BelowStarFloor,
    BelowIncrementFloor,
    LanguageNotAllowed,
    LanguageDenied,
}

/// Per-candidate filter verdict. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDecision {
    pub keep: bool,
    pub reason: FilterReason,
}

impl FilterDecision {
    fn keep() -> Self {
        Self {
            keep: true,
            reason: FilterReason::Passed,
        }
    }

    fn reject(reason: FilterReason) -> Self {
        Self { keep: false, reason }
    }
}

/// Applies, in order: the total-star floor, the per-range increment floor,
/// the language allow-list, then the deny-list.
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    config: FilterConfig,
}

impl ThresholdFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Judge one candidate. Cold start skips both star rules.
    pub fn decide(&self, candidate: &Candidate, range: TimeRange, cold_start: bool) -> FilterDecision {
        if !cold_start {
            if candidate.stars < self.config.min_total_stars {
                return FilterDecision::reject(FilterReason::BelowStarFloor);
            }

            // An increment of 0 means it was not measured; the star floor stands in for it.
            let floor = self.config.min_period_increment.for_range(range);
            if floor > 0 && candidate.period_stars > 0 && candidate.period_stars < floor {
                return FilterDecision::reject(FilterReason::BelowIncrementFloor);
            }
        }

        let language = candidate.language.trim();
        let allow = &self.config.language_allowlist;
        if !allow.is_empty() && !allow.iter().any(|l| l.eq_ignore_ascii_case(language)) {
            return FilterDecision::reject(FilterReason::LanguageNotAllowed);
        }
        if self
            .config
            .language_denylist
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
        {
            return FilterDecision::reject(FilterReason::LanguageDenied);
        }

        FilterDecision::keep()
    }

    /// Keep the candidates that pass every rule, preserving order.
    pub fn apply(&self, candidates: Vec<Candidate>, range: TimeRange, cold_start: bool) -> Vec<Candidate> {
        let total = candidates.len();
        if cold_start {
            info!(%range, "cold start: ignoring star thresholds");
        }

        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                let decision = self.decide(c, range, cold_start);
                if !decision.keep {
                    debug!(identity = %c.identity, reason = ?decision.reason, "filtered out");
                }
                decision.keep
            })
            .collect();

        info!(%range, total, kept = kept.len(), removed = total - kept.len(), "threshold filter applied");
        kept
    }
}
