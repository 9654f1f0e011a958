//! Listing fetch layer: adaptive rate limiting, robots.txt politeness,
//! retrying HTTP fetch, and trending page parsing.
//!
//! This crate provides:
//! - [`RateLimiter`]: adaptive request spacing shared by async and blocking callers
//! - [`PolitenessChecker`]: per-origin robots.txt policies behind an LRU cache
//! - [`FetchClient`]: gated, retrying fetch returning a [`FetchOutcome`]
//! - [`PageParser`]: listing entries to [`Candidate`](trendscout_shared::Candidate)s

pub mod client;
pub mod parser;
pub mod politeness;
pub mod rate_limiter;

pub use client::{FetchClient, FetchError, FetchErrorKind, FetchOutcome, listing_url};
pub use parser::{PageParser, parse_compact_number};
pub use politeness::{POLICY_CACHE_CAPACITY, PolitenessChecker, RobotsPolicy};
pub use rate_limiter::{LimiterStats, RateLimiter};
