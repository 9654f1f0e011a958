//! Seen-set deduplication.

use std::collections::HashSet;

use tracing::info;

use trendscout_shared::{Candidate, TimeRange};

/// Candidates left after deduplication, plus how many were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub kept: Vec<Candidate>,
    pub removed: usize,
}

/// Drop every candidate whose identity is already in the range's seen-set.
/// Input order is preserved.
pub fn deduplicate(range: TimeRange, candidates: Vec<Candidate>, seen: &HashSet<String>) -> DedupOutcome {
    let total = candidates.len();
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| !seen.contains(&c.identity))
        .collect();
    let removed = total - kept.len();

    info!(%range, total, kept = kept.len(), removed, "deduplicated against seen-set");
    DedupOutcome { kept, removed }
}
