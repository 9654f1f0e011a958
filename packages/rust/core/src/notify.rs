//! Digest delivery.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use trendscout_shared::{NotifiedCandidate, NotifyConfig, Result, TimeRange, TrendScoutError};

use crate::collaborators::Notifier;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts a JSON digest to a webhook.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| TrendScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Read the webhook URL from the configured env var. `None` when unset or empty.
    pub fn from_env(config: &NotifyConfig) -> Result<Option<Self>> {
        match std::env::var(&config.webhook_url_env) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()).map(Some),
            _ => {
                debug!(var = %config.webhook_url_env, "webhook disabled");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, items: &[NotifiedCandidate], range: TimeRange) -> Result<bool> {
        let body = json!({
            "time_range": range,
            "count": items.len(),
            "text": digest_text(items, range),
            "items": items,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TrendScoutError::Network(format!("webhook post failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            info!(count = items.len(), %range, "digest delivered");
            Ok(true)
        } else {
            warn!(status = status.as_u16(), "webhook rejected digest");
            Ok(false)
        }
    }
}

/// Writes the digest to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, items: &[NotifiedCandidate], range: TimeRange) -> Result<bool> {
        for item in items {
            let summary = item.summary.as_ref().map_or("", |s| s.text.as_str());
            info!(
                identity = %item.candidate.identity,
                stars = item.candidate.stars,
                period_stars = item.candidate.period_stars,
                summary,
                "trending"
            );
        }
        info!(count = items.len(), %range, "digest logged");
        Ok(true)
    }
}

/// Plain-text rendering of a digest, one block per project.
pub fn digest_text(items: &[NotifiedCandidate], range: TimeRange) -> String {
    let mut out = format!("Trending ({range}): {} projects\n", items.len());
    for (index, item) in items.iter().enumerate() {
        let c = &item.candidate;
        let _ = write!(out, "\n{}. {} ({} stars", index + 1, c.identity, c.stars);
        if c.period_stars > 0 {
            let _ = write!(out, ", +{}", c.period_stars);
        }
        out.push(')');
        if !c.language.is_empty() {
            let _ = write!(out, " [{}]", c.language);
        }
        let _ = write!(out, "\n{}\n", c.url);
        match &item.summary {
            Some(summary) => {
                let _ = writeln!(out, "{}", summary.text);
            }
            None if !c.description.is_empty() => {
                let _ = writeln!(out, "{}", c.description);
            }
            None => {}
        }
    }
    out
}
