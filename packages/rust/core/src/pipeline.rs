//! End-to-end run pipeline: listing → dedup → filters → cache → summaries → notify.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use trendscout_selection::{KeywordMatcher, ThresholdFilter, deduplicate};
use trendscout_shared::{AppConfig, Candidate, NotifiedCandidate, SummaryCacheEntry, SummaryOutcome, TimeRange};

use crate::cache_policy::{CacheDecision, CachePolicy};
use crate::collaborators::{ListingSource, Notifier, TrendStore};
use crate::source::collapse_duplicates;
use crate::summarizer::Summarizer;

const CANCELLED: &str = "run cancelled";

/// Parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub range: TimeRange,
    /// Skip the star thresholds (first run against an empty history).
    pub cold_start: bool,
    /// Skip dedup and regenerate every summary.
    pub force_refresh: bool,
    /// Restrict the listing to one language.
    pub language: Option<String>,
}

impl RunRequest {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            cold_start: false,
            force_refresh: false,
            language: None,
        }
    }
}

/// Stage counts and status of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub range: TimeRange,
    pub found: usize,
    pub after_dedup: usize,
    pub after_filter: usize,
    pub after_keywords: usize,
    pub saved: usize,
    /// Candidates sent to the summarizer.
    pub summarized: usize,
    pub cache_hits: usize,
    pub fallbacks: usize,
    pub notified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// What was handed to the notifier.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<NotifiedCandidate>,
}

impl RunOutcome {
    fn new(range: TimeRange) -> Self {
        Self {
            success: false,
            range,
            found: 0,
            after_dedup: 0,
            after_filter: 0,
            after_keywords: 0,
            saved: 0,
            summarized: 0,
            cache_hits: 0,
            fallbacks: 0,
            notified: false,
            error: None,
            duration: Duration::ZERO,
            items: Vec::new(),
        }
    }

    fn failed(range: TimeRange, error: String, duration: Duration) -> Self {
        Self {
            error: Some(error),
            duration,
            ..Self::new(range)
        }
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a stage finishes with `remaining` candidates.
    fn stage_done(&self, stage: &str, remaining: usize);
    /// Called when the run completes, successfully or not.
    fn done(&self, outcome: &RunOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_done(&self, _stage: &str, _remaining: usize) {}
    fn done(&self, _outcome: &RunOutcome) {}
}

/// Runs the full pipeline against injected collaborators.
pub struct PipelineOrchestrator {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn TrendStore>,
    summarizer: Arc<Summarizer>,
    notifier: Arc<dyn Notifier>,
    filter: ThresholdFilter,
    matcher: KeywordMatcher,
    cache_policy: CachePolicy,
    progress: Arc<dyn ProgressReporter>,
}

impl PipelineOrchestrator {
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn TrendStore>,
        summarizer: Arc<Summarizer>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            source,
            store,
            summarizer,
            notifier,
            filter: ThresholdFilter::new(config.filters.clone()),
            matcher: KeywordMatcher::new(config.keywords.clone()),
            cache_policy: CachePolicy::from(&config.cache),
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every stage in order. Never returns an error; failures land in
    /// [`RunOutcome::error`].
    #[instrument(skip_all, fields(range = %request.range, cold_start = request.cold_start))]
    pub async fn run(&self, request: RunRequest, cancel: &CancellationToken) -> RunOutcome {
        let start = Instant::now();
        let mut outcome = RunOutcome::new(request.range);

        info!(force_refresh = request.force_refresh, language = ?request.language, "starting run");

        if let Err(message) = self.execute(&request, cancel, &mut outcome).await {
            outcome.error = Some(message);
        }
        outcome.success = outcome.error.is_none();
        outcome.duration = start.elapsed();

        self.progress.done(&outcome);
        info!(
            success = outcome.success,
            found = outcome.found,
            after_dedup = outcome.after_dedup,
            after_filter = outcome.after_filter,
            after_keywords = outcome.after_keywords,
            summarized = outcome.summarized,
            cache_hits = outcome.cache_hits,
            fallbacks = outcome.fallbacks,
            notified = outcome.notified,
            error = outcome.error.as_deref().unwrap_or(""),
            elapsed_ms = outcome.duration.as_millis(),
            "run complete"
        );
        outcome
    }

    /// Run on a separate task so a panic in any stage becomes a failed outcome.
    pub async fn run_isolated(self: Arc<Self>, request: RunRequest, cancel: CancellationToken) -> RunOutcome {
        let range = request.range;
        let start = Instant::now();
        let handle = tokio::spawn(async move { self.run(request, &cancel).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "run task aborted");
                RunOutcome::failed(range, format!("run aborted: {e}"), start.elapsed())
            }
        }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        outcome: &mut RunOutcome,
    ) -> Result<(), String> {
        let range = request.range;
        if cancel.is_cancelled() {
            return Err(CANCELLED.into());
        }

        // --- Phase 1: Listing ---
        self.progress.phase("Fetching listing");
        let listed = guarded(cancel, self.source.fetch_candidates(range, request.language.as_deref()))
            .await?
            .map_err(|e| format!("listing failed: {e}"))?;
        let candidates = collapse_duplicates(listed);
        outcome.found = candidates.len();
        self.progress.stage_done("listing", outcome.found);
        if candidates.is_empty() {
            info!("no candidates listed");
            return Ok(());
        }

        // --- Phase 2: Dedup ---
        let candidates = if request.force_refresh {
            info!("force refresh: skipping dedup");
            candidates
        } else {
            self.progress.phase("Deduplicating");
            let seen = match guarded(cancel, self.store.get_seen_identities(range)).await? {
                Ok(seen) => seen,
                Err(e) => {
                    warn!(error = %e, "seen-set unavailable, treating as empty");
                    HashSet::new()
                }
            };
            deduplicate(range, candidates, &seen).kept
        };
        outcome.after_dedup = candidates.len();
        self.progress.stage_done("dedup", outcome.after_dedup);
        if candidates.is_empty() {
            return Ok(());
        }

        // --- Phase 3: Thresholds ---
        self.progress.phase("Filtering");
        let candidates = self.filter.apply(candidates, range, request.cold_start);
        outcome.after_filter = candidates.len();
        self.progress.stage_done("filter", outcome.after_filter);
        if candidates.is_empty() {
            return Ok(());
        }

        // --- Phase 4: Keywords ---
        let candidates = self.matcher.filter(candidates);
        outcome.after_keywords = candidates.len();
        self.progress.stage_done("keywords", outcome.after_keywords);
        if candidates.is_empty() {
            return Ok(());
        }

        // --- Phase 5: Cache lookups (before this run's observations are saved) ---
        self.progress.phase("Checking summary cache");
        let cached = guarded(cancel, join_all(candidates.iter().map(|c| self.lookup_cache(c)))).await?;

        // --- Phase 6: Persist observations ---
        self.progress.phase("Saving candidates");
        match guarded(cancel, self.store.save_candidates(&candidates, range, Utc::now())).await? {
            Ok(saved) => outcome.saved = saved,
            Err(e) => warn!(error = %e, "failed to save candidates, continuing"),
        }

        // --- Phase 7: Summaries ---
        let policy = self.cache_policy.forcing(request.force_refresh);
        let now = Utc::now();
        let mut summaries: Vec<Option<SummaryOutcome>> = Vec::with_capacity(candidates.len());
        let mut regenerate: Vec<Candidate> = Vec::new();

        for (candidate, entry) in candidates.iter().zip(&cached) {
            match (policy.decide(candidate, entry.as_ref(), now), entry) {
                (CacheDecision::Reuse, Some(entry)) => {
                    outcome.cache_hits += 1;
                    summaries.push(Some(SummaryOutcome {
                        identity: candidate.identity.clone(),
                        text: entry.text.clone(),
                        model: Some(entry.model.clone()),
                        fallback: false,
                    }));
                }
                (decision, _) => {
                    info!(identity = %candidate.identity, ?decision, "summary needed");
                    regenerate.push(candidate.clone());
                    summaries.push(None);
                }
            }
        }

        outcome.summarized = regenerate.len();
        let generated = if regenerate.is_empty() {
            Vec::new()
        } else {
            self.progress.phase(&format!("Summarizing {} projects", regenerate.len()));
            guarded(cancel, self.summarizer.summarize_batch(&regenerate, None)).await?
        };
        outcome.fallbacks = generated.iter().filter(|s| s.fallback).count();

        // --- Phase 8: Persist new summaries ---
        for summary in generated.iter().filter(|s| !s.fallback) {
            let model = summary.model.as_deref().unwrap_or_default();
            if let Err(e) = guarded(cancel, self.store.save_summary(&summary.identity, &summary.text, model)).await? {
                warn!(identity = %summary.identity, error = %e, "failed to cache summary");
            }
        }

        let mut generated = generated.into_iter();
        let items: Vec<NotifiedCandidate> = candidates
            .into_iter()
            .zip(summaries)
            .map(|(candidate, summary)| NotifiedCandidate {
                candidate,
                summary: summary.or_else(|| generated.next()),
            })
            .collect();

        // --- Phase 9: Notify ---
        self.progress.phase("Sending notification");
        let delivery = guarded(cancel, self.notifier.send(&items, range)).await?;
        outcome.items = items;
        match delivery {
            Ok(true) => {
                outcome.notified = true;
                Ok(())
            }
            Ok(false) => Err("notification was not accepted".into()),
            Err(e) => Err(format!("notification failed: {e}")),
        }
    }

    /// Cached summary for `candidate`, with the star count from the previous run.
    async fn lookup_cache(&self, candidate: &Candidate) -> Option<SummaryCacheEntry> {
        let identity = candidate.identity.as_str();
        let (entry, latest) = tokio::join!(
            self.store.get_cached_summary(identity),
            self.store.get_latest_star_count(identity)
        );

        let mut entry = match entry {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(identity, error = %e, "cache lookup failed");
                return None;
            }
        };
        match latest {
            Ok(Some(stars)) => entry.source_star_count = Some(stars),
            Ok(None) => {}
            Err(e) => warn!(identity, error = %e, "star count lookup failed"),
        }
        Some(entry)
    }
}

/// Await `fut` unless the run is cancelled first.
async fn guarded<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CANCELLED.to_string()),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;
    use trendscout_shared::{AiConfig, Result, RetryPolicy, TrendScoutError};

    use super::*;
    use crate::providers::{CompletionRequest, ProviderError, SummaryProvider};

    fn candidate(identity: &str, stars: u64) -> Candidate {
        Candidate {
            identity: identity.into(),
            url: format!("https://github.com/{identity}"),
            description: format!("{identity} description"),
            language: "Rust".into(),
            stars,
            forks: 1,
            period_stars: 0,
            observed_at: Utc::now(),
        }
    }

    // --- stubs -----------------------------------------------------------

    struct StubSource {
        candidates: Vec<Candidate>,
        delay: Duration,
        panic: bool,
    }

    impl StubSource {
        fn new(candidates: Vec<Candidate>) -> Self {
            Self {
                candidates,
                delay: Duration::ZERO,
                panic: false,
            }
        }
    }

    #[async_trait]
    impl ListingSource for StubSource {
        async fn fetch_candidates(&self, _range: TimeRange, _language: Option<&str>) -> Result<Vec<Candidate>> {
            if self.panic {
                panic!("listing exploded");
            }
            tokio::time::sleep(self.delay).await;
            Ok(self.candidates.clone())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        seen: HashSet<String>,
        cached: HashMap<String, SummaryCacheEntry>,
        latest_stars: HashMap<String, u64>,
        saved_summaries: Mutex<Vec<(String, String)>>,
        saved_candidates: AtomicUsize,
        broken: bool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<()> {
            if self.broken {
                Err(TrendScoutError::Storage("database is locked".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TrendStore for MemoryStore {
        async fn get_seen_identities(&self, _range: TimeRange) -> Result<HashSet<String>> {
            self.check()?;
            Ok(self.seen.clone())
        }

        async fn save_candidates(
            &self,
            candidates: &[Candidate],
            _range: TimeRange,
            _observed_at: DateTime<Utc>,
        ) -> Result<usize> {
            self.check()?;
            self.saved_candidates.fetch_add(candidates.len(), Ordering::SeqCst);
            Ok(candidates.len())
        }

        async fn get_cached_summary(&self, identity: &str) -> Result<Option<SummaryCacheEntry>> {
            self.check()?;
            Ok(self.cached.get(identity).cloned())
        }

        async fn get_latest_star_count(&self, identity: &str) -> Result<Option<u64>> {
            self.check()?;
            Ok(self.latest_stars.get(identity).copied())
        }

        async fn save_summary(&self, identity: &str, text: &str, _model: &str) -> Result<bool> {
            self.check()?;
            self.saved_summaries
                .lock()
                .expect("lock")
                .push((identity.to_string(), text.to_string()));
            Ok(true)
        }
    }

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SummaryProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn model(&self) -> &str {
            "counting-model"
        }

        async fn summarize(&self, _request: &CompletionRequest) -> std::result::Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("Fresh summary.".into())
        }
    }

    struct RecordingNotifier {
        accept: bool,
        sent: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingNotifier {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, items: &[NotifiedCandidate], _range: TimeRange) -> Result<bool> {
            self.sent
                .lock()
                .expect("lock")
                .push(items.iter().map(|i| i.candidate.identity.clone()).collect());
            Ok(self.accept)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<CountingProvider>,
        notifier: Arc<RecordingNotifier>,
        pipeline: Arc<PipelineOrchestrator>,
    }

    fn harness(source: StubSource, store: MemoryStore, notifier: RecordingNotifier) -> Harness {
        let store = Arc::new(store);
        let provider = Arc::new(CountingProvider::default());
        let notifier = Arc::new(notifier);
        let summarizer = Summarizer::new(vec![provider.clone()], &AiConfig::default())
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

        let pipeline = PipelineOrchestrator::new(
            Arc::new(source),
            store.clone(),
            Arc::new(summarizer),
            notifier.clone(),
            &AppConfig::default(),
        );
        Harness {
            store,
            provider,
            notifier,
            pipeline: Arc::new(pipeline),
        }
    }

    fn three_candidates() -> Vec<Candidate> {
        vec![
            candidate("seen/before", 5_000),
            candidate("tiny/project", 10),
            candidate("good/project", 800),
        ]
    }

    fn store_with_seen() -> MemoryStore {
        MemoryStore {
            seen: HashSet::from(["seen/before".to_string()]),
            ..MemoryStore::default()
        }
    }

    #[tokio::test]
    async fn only_new_qualifying_candidate_is_summarized() {
        let h = harness(StubSource::new(three_candidates()), store_with_seen(), RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.found, 3);
        assert_eq!(outcome.after_dedup, 2);
        assert_eq!(outcome.after_filter, 1);
        assert_eq!(outcome.after_keywords, 1);
        assert_eq!(outcome.saved, 1);
        assert_eq!(outcome.summarized, 1);
        assert_eq!(outcome.fallbacks, 0);
        assert!(outcome.notified);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.calls(), vec![vec!["good/project".to_string()]]);

        let saved = h.store.saved_summaries.lock().expect("lock").clone();
        assert_eq!(saved, vec![("good/project".to_string(), "Fresh summary.".to_string())]);
        assert_eq!(
            outcome.items[0].summary.as_ref().map(|s| s.text.as_str()),
            Some("Fresh summary.")
        );
    }

    #[tokio::test]
    async fn duplicate_listing_entries_collapse() {
        let listed = vec![candidate("good/project", 800), candidate("good/project", 800)];
        let h = harness(StubSource::new(listed), MemoryStore::default(), RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;
        assert_eq!(outcome.found, 1);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_listing_ends_early_without_notifying() {
        let h = harness(StubSource::new(Vec::new()), MemoryStore::default(), RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Weekly), &CancellationToken::new()).await;
        assert!(outcome.success);
        assert!(!outcome.notified);
        assert!(h.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn everything_filtered_ends_early() {
        let listed = vec![candidate("tiny/one", 1), candidate("tiny/two", 2)];
        let h = harness(StubSource::new(listed), MemoryStore::default(), RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;
        assert!(outcome.success);
        assert_eq!(outcome.after_filter, 0);
        assert_eq!(h.store.saved_candidates.load(Ordering::SeqCst), 0);
        assert!(h.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn cold_start_keeps_small_projects() {
        let listed = vec![candidate("tiny/one", 1)];
        let h = harness(StubSource::new(listed), MemoryStore::default(), RecordingNotifier::new(true));

        let request = RunRequest {
            cold_start: true,
            ..RunRequest::new(TimeRange::Daily)
        };
        let outcome = h.pipeline.run(request, &CancellationToken::new()).await;
        assert_eq!(outcome.after_filter, 1);
        assert!(outcome.notified);
    }

    #[tokio::test]
    async fn fresh_cache_entry_is_reused() {
        let now = Utc::now();
        let c = candidate("good/project", 800);
        let mut store = MemoryStore::default();
        store.cached.insert(
            c.identity.clone(),
            SummaryCacheEntry {
                identity: c.identity.clone(),
                text: "Cached summary.".into(),
                model: "old-model".into(),
                created_at: now - chrono::Duration::days(1),
                source_description: c.description.clone(),
                source_star_count: Some(790),
            },
        );
        store.latest_stars.insert(c.identity.clone(), 795);
        let h = harness(StubSource::new(vec![c]), store, RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;
        assert_eq!(outcome.cache_hits, 1);
        assert_eq!(outcome.summarized, 0);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
        let summary = outcome.items[0].summary.as_ref().expect("summary");
        assert_eq!(summary.text, "Cached summary.");
        assert_eq!(summary.model.as_deref(), Some("old-model"));
    }

    #[tokio::test]
    async fn star_growth_since_previous_run_regenerates() {
        let now = Utc::now();
        let c = candidate("good/project", 1_000);
        let mut store = MemoryStore::default();
        store.cached.insert(
            c.identity.clone(),
            SummaryCacheEntry {
                identity: c.identity.clone(),
                text: "Cached summary.".into(),
                model: "old-model".into(),
                created_at: now - chrono::Duration::hours(2),
                source_description: c.description.clone(),
                source_star_count: Some(990),
            },
        );
        store.latest_stars.insert(c.identity.clone(), 500);
        let h = harness(StubSource::new(vec![c]), store, RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;
        assert_eq!(outcome.cache_hits, 0);
        assert_eq!(outcome.summarized, 1);
    }

    #[tokio::test]
    async fn force_refresh_skips_dedup_and_cache() {
        let h = harness(StubSource::new(three_candidates()), store_with_seen(), RecordingNotifier::new(true));
        let request = RunRequest {
            force_refresh: true,
            ..RunRequest::new(TimeRange::Daily)
        };

        let outcome = h.pipeline.run(request, &CancellationToken::new()).await;
        assert_eq!(outcome.after_dedup, 3);
        assert_eq!(outcome.after_filter, 2);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn storage_failures_do_not_abort() {
        let store = MemoryStore {
            broken: true,
            ..MemoryStore::default()
        };
        let h = harness(StubSource::new(three_candidates()), store, RecordingNotifier::new(true));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.after_dedup, 3);
        assert_eq!(outcome.saved, 0);
        assert_eq!(outcome.summarized, 2);
        assert!(outcome.notified);
    }

    #[tokio::test]
    async fn rejected_notification_fails_run_but_keeps_data() {
        let h = harness(StubSource::new(three_candidates()), store_with_seen(), RecordingNotifier::new(false));

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &CancellationToken::new()).await;
        assert!(!outcome.success);
        assert!(!outcome.notified);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.saved, 1);
        assert_eq!(h.store.saved_summaries.lock().expect("lock").len(), 1);
        assert_eq!(h.notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let h = harness(StubSource::new(three_candidates()), MemoryStore::default(), RecordingNotifier::new(true));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = h.pipeline.run(RunRequest::new(TimeRange::Daily), &token).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("run cancelled"));
        assert_eq!(outcome.found, 0);
    }

    #[tokio::test]
    async fn cancelled_while_listing() {
        let mut source = StubSource::new(three_candidates());
        source.delay = Duration::from_secs(30);
        let h = harness(source, MemoryStore::default(), RecordingNotifier::new(true));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = h.pipeline.clone().run_isolated(RunRequest::new(TimeRange::Monthly), token).await;
        assert_eq!(outcome.error.as_deref(), Some("run cancelled"));
        assert!(h.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn panic_becomes_failed_outcome() {
        let mut source = StubSource::new(Vec::new());
        source.panic = true;
        let h = harness(source, MemoryStore::default(), RecordingNotifier::new(true));

        let outcome = h
            .pipeline
            .clone()
            .run_isolated(RunRequest::new(TimeRange::Daily), CancellationToken::new())
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().is_some_and(|e| e.starts_with("run aborted")));
    }

    #[test]
    fn outcome_serializes_duration_in_millis() {
        let outcome = RunOutcome::failed(TimeRange::Weekly, "x".into(), Duration::from_millis(1500));
        let json = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["range"], "weekly");
        assert!(json.get("items").is_none());
    }
}
