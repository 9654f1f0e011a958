//! Core domain types shared by the fetch, selection and enrichment layers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrendScoutError;

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

/// Reporting granularity a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Daily,
    Weekly,
    Monthly,
}

impl TimeRange {
    /// All ranges, in ascending granularity.
    pub const ALL: [TimeRange; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Value used for the listing `since=` parameter and as a storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = TrendScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(TrendScoutError::validation(format!(
                "unknown time range '{other}': expected daily, weekly, or monthly"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One parsed listing entry, before filtering and enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// `owner/name` identity.
    pub identity: String,
    /// Absolute project URL.
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: String,
    /// Total star count.
    pub stars: u64,
    #[serde(default)]
    pub forks: u64,
    /// Stars gained during the listing's period. 0 means "not measured".
    pub period_stars: u64,
    pub observed_at: DateTime<Utc>,
}

impl Candidate {
    /// Repository name without the owner prefix.
    pub fn short_name(&self) -> &str {
        self.identity
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.identity)
    }
}

// ---------------------------------------------------------------------------
// Summary cache
// ---------------------------------------------------------------------------

/// A previously generated summary, joined with the star count it was based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCacheEntry {
    pub identity: String,
    pub text: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    /// Description the summary was generated from.
    pub source_description: String,
    /// Star count recorded before this run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_star_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Result of summarizing one candidate. Fallbacks carry the original description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub identity: String,
    pub text: String,
    /// Model that produced `text`; `None` for fallbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub fallback: bool,
}

impl SummaryOutcome {
    /// Fallback outcome built from the candidate's own description.
    pub fn fallback(candidate: &Candidate) -> Self {
        Self {
            identity: candidate.identity.clone(),
            text: format!("{FALLBACK_MARKER} {}", candidate.description),
            model: None,
            fallback: true,
        }
    }
}

/// Prefix marking summary text that was not produced by a model.
pub const FALLBACK_MARKER: &str = "Summary unavailable (fallback):";

/// A candidate paired with the summary handed to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifiedCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Candidate {
        Candidate {
            identity: "tokio-rs/tokio".into(),
            url: "https://github.com/tokio-rs/tokio".into(),
            description: "A runtime for writing reliable asynchronous applications".into(),
            language: "Rust".into(),
            stars: 27_000,
            forks: 2_400,
            period_stars: 120,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn time_range_parse_and_display() {
        assert_eq!("daily".parse::<TimeRange>().unwrap(), TimeRange::Daily);
        assert_eq!(" Weekly ".parse::<TimeRange>().unwrap(), TimeRange::Weekly);
        assert_eq!(TimeRange::Monthly.to_string(), "monthly");
        assert!("hourly".parse::<TimeRange>().is_err());
    }

    #[test]
    fn time_range_serde_lowercase() {
        let json = serde_json::to_string(&TimeRange::Weekly).unwrap();
        assert_eq!(json, r#""weekly""#);
    }

    #[test]
    fn short_name_strips_owner() {
        assert_eq!(sample().short_name(), "tokio");
    }

    #[test]
    fn fallback_outcome_keeps_description() {
        let candidate = sample();
        let outcome = SummaryOutcome::fallback(&candidate);
        assert!(outcome.fallback);
        assert!(outcome.model.is_none());
        assert!(outcome.text.starts_with(FALLBACK_MARKER));
        assert!(outcome.text.contains(&candidate.description));
    }

    #[test]
    fn notified_candidate_flattens() {
        let item = NotifiedCandidate {
            candidate: sample(),
            summary: None,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["identity"], "tokio-rs/tokio");
        assert!(value.get("summary").is_none());
    }
}
