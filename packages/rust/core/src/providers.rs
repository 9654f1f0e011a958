//! AI summary providers.
//!
//! Every configured backend speaks the OpenAI chat-completions dialect, so a
//! single [`OpenAiCompatibleProvider`] covers DeepSeek, NVIDIA, Kimi, GLM and
//! any other compatible endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use trendscout_shared::{AiConfig, ProviderConfig, Result, TrendScoutError, resolve_api_key};

/// One prompt to complete.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Overrides the provider's configured `max_tokens`.
    pub max_tokens: Option<u32>,
    /// Overrides the provider's configured timeout.
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            timeout: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A failed provider call. Always treated as retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
    /// The backend answered 429.
    pub rate_limited: bool,
}

impl ProviderError {
    pub fn new(provider: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            message: message.into(),
            rate_limited: false,
        }
    }

    fn rate_limited(provider: &str, message: impl Into<String>) -> Self {
        Self {
            rate_limited: true,
            ..Self::new(provider, message)
        }
    }
}

/// A text-completion backend.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn summarize(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderError>;

    /// Stream the completion as chunks and return the full text.
    ///
    /// The default sends the whole completion as one chunk.
    async fn summarize_stream(
        &self,
        request: &CompletionRequest,
        chunks: mpsc::Sender<String>,
    ) -> std::result::Result<String, ProviderError> {
        let text = self.summarize(request).await?;
        let _ = chunks.send(text.clone()).await;
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// OpenAiCompatibleProvider
// ---------------------------------------------------------------------------

/// Chat-completions client for one configured backend.
pub struct OpenAiCompatibleProvider {
    name: String,
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleProvider {
    /// Build a provider. Fails when `base_url` is not a valid http(s) URL.
    pub fn new(name: &str, config: &ProviderConfig, api_key: String) -> Result<Self> {
        let base = Url::parse(config.base_url.trim()).map_err(|e| {
            TrendScoutError::config(format!("{name}: invalid base_url '{}': {e}", config.base_url))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TrendScoutError::config(format!(
                "{name}: base_url must be http(s), got '{}'",
                config.base_url
            )));
        }
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            base.as_str().trim_end_matches('/')
        ))
        .map_err(|e| TrendScoutError::config(format!("{name}: {e}")))?;

        let client = Client::builder()
            .build()
            .map_err(|e| TrendScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn post(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: self.temperature,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            stream,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(request.timeout.unwrap_or(self.timeout))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let what = if e.is_timeout() { "request timed out" } else { "request failed" };
                ProviderError::new(&self.name, format!("{what}: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        let detail: String = detail.chars().take(200).collect();
        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderError::rate_limited(&self.name, format!("HTTP 429: {detail}")))
        } else {
            Err(ProviderError::new(&self.name, format!("HTTP {}: {detail}", status.as_u16())))
        }
    }
}

#[async_trait]
impl SummaryProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(provider = %self.name))]
    async fn summarize(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderError> {
        let response = self.post(request, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(&self.name, format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::new(&self.name, "empty completion"));
        }
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    #[instrument(skip_all, fields(provider = %self.name))]
    async fn summarize_stream(
        &self,
        request: &CompletionRequest,
        chunks: mpsc::Sender<String>,
    ) -> std::result::Result<String, ProviderError> {
        let response = self.post(request, true).await?;
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut full = String::new();

        'read: while let Some(next) = bytes.next().await {
            let next = next.map_err(|e| ProviderError::new(&self.name, format!("stream interrupted: {e}")))?;
            buffer.extend_from_slice(&next);

            while let Some(line) = take_line(&mut buffer) {
                match parse_sse_line(&line) {
                    SseLine::Done => {
                        buffer.clear();
                        break 'read;
                    }
                    SseLine::Delta(delta) => {
                        full.push_str(&delta);
                        if chunks.send(delta).await.is_err() {
                            debug!("stream receiver dropped, closing stream");
                            buffer.clear();
                            break 'read;
                        }
                    }
                    SseLine::Skip => {}
                }
            }
        }

        // Trailing line without a newline.
        let tail = String::from_utf8_lossy(&buffer);
        if let SseLine::Delta(delta) = parse_sse_line(tail.trim()) {
            full.push_str(&delta);
            if chunks.send(delta).await.is_err() {
                debug!("stream receiver dropped, closing stream");
            }
        }

        if full.trim().is_empty() {
            return Err(ProviderError::new(&self.name, "empty streamed completion"));
        }
        Ok(full)
    }
}

enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Pop one complete line off the byte buffer. Bytes after the last newline
/// stay buffered so a character split across network chunks decodes whole.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|s| !s.is_empty())
            .map_or(SseLine::Skip, SseLine::Delta),
        Err(e) => {
            debug!(error = %e, "ignoring unparseable stream chunk");
            SseLine::Skip
        }
    }
}

/// Build the failover chain in `enabled` order.
///
/// Providers without a usable key or with a bad base URL are logged and left out.
pub fn build_providers(config: &AiConfig) -> Vec<Arc<dyn SummaryProvider>> {
    let mut providers: Vec<Arc<dyn SummaryProvider>> = Vec::new();

    for name in &config.enabled {
        let Some(provider_config) = config.providers.get(name) else {
            warn!(provider = %name, "enabled provider has no [ai.providers] table");
            continue;
        };
        let api_key = match resolve_api_key(name, provider_config) {
            Ok(key) => key,
            Err(e) => {
                warn!(provider = %name, error = %e, "provider excluded");
                continue;
            }
        };
        match OpenAiCompatibleProvider::new(name, provider_config, api_key) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!(provider = %name, error = %e, "provider excluded"),
        }
    }

    info!(
        count = providers.len(),
        names = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "summary providers ready"
    );
    providers
}
