//! Summarization orchestrator over the provider failover chain.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use trendscout_shared::{AiConfig, Candidate, RetryPolicy, SummaryOutcome};

use crate::providers::{CompletionRequest, ProviderError, SummaryProvider, build_providers};
use crate::report::{ProjectReport, parse_report};

const REPORT_MAX_TOKENS: u32 = 2000;
const REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// A detailed report and the model that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub identity: String,
    pub report: ProjectReport,
    /// `None` when no provider answered.
    pub model: Option<String>,
}

/// Progress of a streamed report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportEvent {
    Thinking { stage: String },
    Partial { content: String },
    Complete { report: ProjectReport, model: String },
    Error { message: String },
}

/// Runs summaries against the configured providers.
pub struct Summarizer {
    providers: Vec<Arc<dyn SummaryProvider>>,
    prompt_template: String,
    report_prompt_template: String,
    permits: Semaphore,
    retry: RetryPolicy,
}

impl Summarizer {
    pub fn new(providers: Vec<Arc<dyn SummaryProvider>>, config: &AiConfig) -> Self {
        Self {
            providers,
            prompt_template: config.prompt_template.clone(),
            report_prompt_template: config.report_prompt_template.clone(),
            permits: Semaphore::new(config.concurrency.max(1) as usize),
            retry: config.retry_policy().with_jitter(),
        }
    }

    /// Build the provider chain from config and wrap it.
    pub fn from_config(config: &AiConfig) -> Self {
        Self::new(build_providers(config), config)
    }

    /// Replace the per-item retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn providers(&self) -> &[Arc<dyn SummaryProvider>] {
        &self.providers
    }

    /// Try each provider once, in order. When all fail the description is returned verbatim.
    #[instrument(skip_all, fields(identity = %candidate.identity))]
    pub async fn summarize_with_failover(&self, candidate: &Candidate) -> SummaryOutcome {
        let request = CompletionRequest::new(fill_prompt(&self.prompt_template, candidate));

        for provider in &self.providers {
            match provider.summarize(&request).await {
                Ok(text) => {
                    return SummaryOutcome {
                        identity: candidate.identity.clone(),
                        text,
                        model: Some(provider.model().to_string()),
                        fallback: false,
                    };
                }
                Err(e) => warn!(error = %e, rate_limited = e.rate_limited, "provider failed, trying next"),
            }
        }

        warn!(providers = self.providers.len(), "all providers failed, using description");
        SummaryOutcome {
            identity: candidate.identity.clone(),
            text: candidate.description.clone(),
            model: None,
            fallback: true,
        }
    }

    /// Summarize every candidate with one provider, bounded by the shared semaphore.
    ///
    /// Output has the same length and order as `candidates`. Items whose retries
    /// run out get a fallback outcome.
    #[instrument(skip_all, fields(count = candidates.len(), provider = ?provider_name))]
    pub async fn summarize_batch(
        &self,
        candidates: &[Candidate],
        provider_name: Option<&str>,
    ) -> Vec<SummaryOutcome> {
        let Some(provider) = self.select(provider_name) else {
            warn!("no summary providers available, every item falls back");
            return candidates.iter().map(SummaryOutcome::fallback).collect();
        };
        let provider: &dyn SummaryProvider = provider.as_ref();
        let permits = &self.permits;
        let retry = &self.retry;

        let tasks = candidates.iter().map(|candidate| {
            let request = CompletionRequest::new(fill_prompt(&self.prompt_template, candidate));
            async move {
                let result = retry
                    .retry(
                        |attempt| {
                            let request = &request;
                            async move {
                                if attempt > 0 {
                                    debug!(identity = %candidate.identity, attempt = attempt + 1, "retrying summary");
                                }
                                let Ok(_permit) = permits.acquire().await else {
                                    return Err(ProviderError::new(provider.name(), "summarizer closed"));
                                };
                                provider.summarize(request).await
                            }
                        },
                        |_: &ProviderError| true,
                    )
                    .await;

                match result {
                    Ok(text) => SummaryOutcome {
                        identity: candidate.identity.clone(),
                        text,
                        model: Some(provider.model().to_string()),
                        fallback: false,
                    },
                    Err(e) => {
                        warn!(identity = %candidate.identity, error = %e, "summary failed, using fallback");
                        SummaryOutcome::fallback(candidate)
                    }
                }
            }
        });

        let outcomes = join_all(tasks).await;
        let fallbacks = outcomes.iter().filter(|o| o.fallback).count();
        info!(total = outcomes.len(), fallbacks, provider = provider.name(), "batch summarized");
        outcomes
    }

    /// One detailed report from the first provider.
    #[instrument(skip_all, fields(identity = %candidate.identity))]
    pub async fn generate_report(&self, candidate: &Candidate) -> ReportOutcome {
        let Some(provider) = self.providers.first() else {
            warn!("no summary providers available for report");
            return ReportOutcome {
                identity: candidate.identity.clone(),
                report: parse_report(""),
                model: None,
            };
        };

        let Ok(_permit) = self.permits.acquire().await else {
            warn!("summarizer closed");
            return ReportOutcome {
                identity: candidate.identity.clone(),
                report: parse_report(""),
                model: None,
            };
        };
        match provider.summarize(&self.report_request(candidate)).await {
            Ok(raw) => ReportOutcome {
                identity: candidate.identity.clone(),
                report: parse_report(&raw),
                model: Some(provider.model().to_string()),
            },
            Err(e) => {
                warn!(error = %e, "report generation failed");
                ReportOutcome {
                    identity: candidate.identity.clone(),
                    report: parse_report(""),
                    model: None,
                }
            }
        }
    }

    /// Stream a detailed report as [`ReportEvent`]s. Always ends with
    /// `Complete` or `Error` unless the receiver goes away, in which case the
    /// provider stream is closed and this returns early.
    #[instrument(skip_all, fields(identity = %candidate.identity))]
    pub async fn stream_report(&self, candidate: &Candidate, events: mpsc::Sender<ReportEvent>) {
        let thinking = |stage: &str| ReportEvent::Thinking { stage: stage.to_string() };

        let _ = events.send(thinking("preparing prompt")).await;
        let Some(provider) = self.providers.first() else {
            let _ = events
                .send(ReportEvent::Error {
                    message: "no summary providers configured".into(),
                })
                .await;
            return;
        };

        let request = self.report_request(candidate);
        let Ok(_permit) = self.permits.acquire().await else {
            let _ = events
                .send(ReportEvent::Error {
                    message: "summarizer closed".into(),
                })
                .await;
            return;
        };
        if events
            .send(thinking(&format!("querying {}", provider.name())))
            .await
            .is_err()
        {
            debug!("report receiver dropped before query");
            return;
        }

        let (chunk_tx, chunk_rx) = mpsc::channel::<String>(32);
        let forward = async {
            // Owned here so the provider sees a closed channel once forwarding stops.
            let mut chunk_rx = chunk_rx;
            while let Some(content) = chunk_rx.recv().await {
                if events.send(ReportEvent::Partial { content }).await.is_err() {
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(provider.summarize_stream(&request, chunk_tx), forward);

        let event = match result {
            Ok(raw) => {
                let _ = events.send(thinking("parsing report")).await;
                ReportEvent::Complete {
                    report: parse_report(&raw),
                    model: provider.model().to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "streamed report failed");
                ReportEvent::Error { message: e.to_string() }
            }
        };
        let _ = events.send(event).await;
    }

    fn select(&self, name: Option<&str>) -> Option<&Arc<dyn SummaryProvider>> {
        match name {
            Some(name) => self.providers.iter().find(|p| p.name() == name).or_else(|| {
                warn!(provider = name, "requested provider unavailable, using first");
                self.providers.first()
            }),
            None => self.providers.first(),
        }
    }

    fn report_request(&self, candidate: &Candidate) -> CompletionRequest {
        CompletionRequest::new(fill_prompt(&self.report_prompt_template, candidate))
            .with_max_tokens(REPORT_MAX_TOKENS)
            .with_timeout(REPORT_TIMEOUT)
    }
}

/// Substitute `{name}`, `{description}`, `{stars}`, `{forks}`, `{language}`
/// and `{updated_at}`.
pub fn fill_prompt(template: &str, candidate: &Candidate) -> String {
    let description = if candidate.description.is_empty() {
        "No description"
    } else {
        candidate.description.as_str()
    };
    let language = if candidate.language.is_empty() {
        "Unknown"
    } else {
        candidate.language.as_str()
    };

    template
        .replace("{name}", &candidate.identity)
        .replace("{description}", description)
        .replace("{stars}", &candidate.stars.to_string())
        .replace("{forks}", &candidate.forks.to_string())
        .replace("{language}", language)
        .replace("{updated_at}", &candidate.observed_at.format("%Y-%m-%d").to_string())
}
