//! Trending listing source: fetch one listing page and parse it.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use trendscout_crawler::{FetchClient, FetchOutcome, PageParser, listing_url};
use trendscout_shared::{Candidate, Result, TimeRange};

use crate::collaborators::ListingSource;

/// [`ListingSource`] backed by the polite fetch client and the page parser.
pub struct TrendingSource {
    client: FetchClient,
    parser: PageParser,
    base_url: String,
}

impl TrendingSource {
    pub fn new(client: FetchClient, base_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            parser: PageParser::new(base_url)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ListingSource for TrendingSource {
    /// Denied and exhausted fetches yield an empty list, not an error.
    #[instrument(skip(self), fields(%range))]
    async fn fetch_candidates(&self, range: TimeRange, language: Option<&str>) -> Result<Vec<Candidate>> {
        let url = listing_url(&self.base_url, range, language);

        let html = match self.client.fetch(&url).await {
            FetchOutcome::Fetched(body) => body,
            FetchOutcome::Denied => {
                info!(%url, "listing disallowed by robots.txt");
                return Ok(Vec::new());
            }
            FetchOutcome::Exhausted { attempts, last_error } => {
                warn!(%url, attempts, error = %last_error, "listing fetch failed");
                return Ok(Vec::new());
            }
        };

        let parsed = self.parser.parse(&html, Utc::now());
        Ok(collapse_duplicates(parsed))
    }
}

/// Keep the first occurrence of each identity.
pub(crate) fn collapse_duplicates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.identity.clone()))
        .collect()
}
