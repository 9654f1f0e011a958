//! Application configuration for TrendScout.
//!
//! User config lives at `~/.trendscout/trendscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrendScoutError};
use crate::retry::RetryPolicy;
use crate::types::TimeRange;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "trendscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".trendscout";

/// API key prefixes that indicate an unfilled template value.
const PLACEHOLDER_KEY_PREFIXES: &[&str] = &["YOUR_", "sk-xxx", "nvapi-xxx"];

// ---------------------------------------------------------------------------
// Config structs (matching trendscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listing fetch, politeness and rate limiting.
    #[serde(default)]
    pub fetch: FetchPoliciesConfig,

    /// Star and language thresholds.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Keyword subscription.
    #[serde(default)]
    pub keywords: KeywordConfig,

    /// AI provider backends and summarization limits.
    #[serde(default)]
    pub ai: AiConfig,

    /// Summary cache staleness policy.
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPoliciesConfig {
    /// Listing site origin, e.g. `https://github.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User agent for listing and robots.txt requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum concurrent listing requests.
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: u32,

    /// Attempts per listing request, including the first.
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,

    /// Backoff base; attempt `n` waits `base * 2^n`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_robots_timeout")]
    pub robots_timeout_secs: u64,

    /// Whether to respect robots.txt.
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    /// Initial request rate (requests per second).
    #[serde(default = "default_initial_rate")]
    pub initial_rate: f64,

    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for FetchPoliciesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            concurrency: default_fetch_concurrency(),
            max_attempts: default_fetch_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_fetch_timeout(),
            robots_timeout_secs: default_robots_timeout(),
            respect_robots: true,
            initial_rate: default_initial_rate(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://github.com".into()
}
fn default_user_agent() -> String {
    concat!("TrendScout/", env!("CARGO_PKG_VERSION")).into()
}
fn default_fetch_concurrency() -> u32 {
    5
}
fn default_fetch_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_robots_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_initial_rate() -> f64 {
    2.0
}
fn default_min_interval_ms() -> u64 {
    500
}
fn default_max_interval_ms() -> u64 {
    5_000
}

/// `[filters]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Total-star floor, independent of range.
    #[serde(default = "default_min_total_stars")]
    pub min_total_stars: u64,

    /// Per-range floor on the period star increment.
    #[serde(default)]
    pub min_period_increment: PeriodFloors,

    /// If non-empty, only these languages pass.
    #[serde(default)]
    pub language_allowlist: Vec<String>,

    #[serde(default)]
    pub language_denylist: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_total_stars: default_min_total_stars(),
            min_period_increment: PeriodFloors::default(),
            language_allowlist: Vec::new(),
            language_denylist: Vec::new(),
        }
    }
}

fn default_min_total_stars() -> u64 {
    100
}

/// `[filters.min_period_increment]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodFloors {
    #[serde(default)]
    pub daily: u64,
    #[serde(default)]
    pub weekly: u64,
    #[serde(default)]
    pub monthly: u64,
}

impl PeriodFloors {
    pub fn for_range(&self, range: TimeRange) -> u64 {
        match range {
            TimeRange::Daily => self.daily,
            TimeRange::Weekly => self.weekly,
            TimeRange::Monthly => self.monthly,
        }
    }
}

/// Keyword match strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    Regex,
    #[default]
    Fuzzy,
}

/// Candidate field a keyword is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Name,
    Description,
    Language,
}

/// `[keywords]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Empty list disables keyword narrowing.
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub match_mode: MatchMode,

    /// Minimum token similarity for fuzzy mode.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default = "default_match_fields")]
    pub match_fields: Vec<MatchField>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            match_mode: MatchMode::default(),
            fuzzy_threshold: default_fuzzy_threshold(),
            case_sensitive: false,
            match_fields: default_match_fields(),
        }
    }
}

fn default_fuzzy_threshold() -> f64 {
    0.6
}
fn default_match_fields() -> Vec<MatchField> {
    vec![MatchField::Name, MatchField::Description]
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider names in failover order. Each must have a `[ai.providers.<name>]` table.
    #[serde(default = "default_enabled_providers")]
    pub enabled: Vec<String>,

    /// Maximum concurrent summarization calls.
    #[serde(default = "default_ai_concurrency")]
    pub concurrency: u32,

    /// Attempts per summarization call in batch mode.
    #[serde(default = "default_ai_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Short summary prompt. Placeholders: `{name}`, `{description}`, `{stars}`,
    /// `{forks}`, `{language}`, `{updated_at}`.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    /// Detailed report prompt; same placeholders.
    #[serde(default = "default_report_prompt_template")]
    pub report_prompt_template: String,

    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_providers(),
            concurrency: default_ai_concurrency(),
            max_attempts: default_ai_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            prompt_template: default_prompt_template(),
            report_prompt_template: default_report_prompt_template(),
            providers: default_providers(),
        }
    }
}

impl AiConfig {
    /// Retry policy for per-item batch calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }
}

fn default_enabled_providers() -> Vec<String> {
    vec!["deepseek".into(), "nvidia".into()]
}
fn default_ai_concurrency() -> u32 {
    3
}
fn default_ai_attempts() -> u32 {
    5
}
fn default_prompt_template() -> String {
    "Summarize the open-source project below in two or three sentences for a \
     developer newsletter. Mention what it does and who it is for.\n\n\
     Name: {name}\nDescription: {description}\nStars: {stars}\n\
     Language: {language}\nObserved: {updated_at}"
        .into()
}
fn default_report_prompt_template() -> String {
    r#"Analyze the open-source project below and answer with JSON only.

Name: {name}
Description: {description}
Stars: {stars}
Forks: {forks}
Language: {language}

Return this structure:
{
  "executive_summary": "100-200 words",
  "scores": {
    "architecture": {"score": 8.5, "reason": "..."},
    "code_quality": {"score": 7.0, "reason": "..."},
    "documentation": {"score": 6.5, "reason": "..."},
    "community": {"score": 9.0, "reason": "..."},
    "innovation": {"score": 8.0, "reason": "..."}
  },
  "key_features": ["..."],
  "tech_stack": ["..."],
  "use_cases": ["..."],
  "limitations": ["..."],
  "learning_resources": ["..."],
  "integration_examples": [{"title": "...", "description": "...", "code": "..."}],
  "faq": [{"question": "...", "answer": "..."}]
}"#
    .into()
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "deepseek".into(),
        ProviderConfig::new("DEEPSEEK_API_KEY", "https://api.deepseek.com/v1", "deepseek-chat", 0.7),
    );
    providers.insert(
        "nvidia".into(),
        ProviderConfig::new(
            "NVIDIA_API_KEY",
            "https://integrate.api.nvidia.com/v1",
            "meta/llama-3.1-70b-instruct",
            0.7,
        ),
    );
    providers.insert(
        "kimi".into(),
        ProviderConfig::new("MOONSHOT_API_KEY", "https://api.moonshot.cn/v1", "moonshot-v1-8k", 0.3),
    );
    providers.insert(
        "glm".into(),
        ProviderConfig::new(
            "ZHIPU_API_KEY",
            "https://open.bigmodel.cn/api/paas/v4",
            "glm-4-flash",
            0.7,
        ),
    );
    providers
}

/// `[ai.providers.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name of the env var holding the API key (never store the key itself).
    pub api_key_env: String,

    /// OpenAI-compatible API root, e.g. `https://api.deepseek.com/v1`.
    pub base_url: String,

    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn new(api_key_env: &str, base_url: &str, model: &str, temperature: f32) -> Self {
        Self {
            api_key_env: api_key_env.into(),
            base_url: base_url.into(),
            model: model.into(),
            temperature,
            max_tokens: default_max_tokens(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_provider_timeout() -> u64 {
    30
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cached summaries older than this are regenerated.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,

    /// Relative star growth that invalidates a cached summary.
    #[serde(default = "default_star_growth")]
    pub star_growth_threshold: f64,

    /// Always regenerate.
    #[serde(default)]
    pub force_refresh: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_expiry_days(),
            star_growth_threshold: default_star_growth(),
            force_refresh: false,
        }
    }
}

fn default_expiry_days() -> u32 {
    7
}
fn default_star_growth() -> f64 {
    0.2
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path; a leading `~/` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Resolve `db_path`, expanding `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    TrendScoutError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

fn default_db_path() -> String {
    "~/.trendscout/trendscout.db".into()
}

/// `[notify]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Env var holding the webhook URL. Unset means log-only notification.
    #[serde(default = "default_webhook_env")]
    pub webhook_url_env: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url_env: default_webhook_env(),
        }
    }
}

fn default_webhook_env() -> String {
    "TRENDSCOUT_WEBHOOK_URL".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Bounds and starting point for the adaptive rate limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Requests per second at start-up.
    pub initial_rate: f64,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_rate: default_initial_rate(),
            min_interval: Duration::from_millis(default_min_interval_ms()),
            max_interval: Duration::from_millis(default_max_interval_ms()),
        }
    }
}

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Maximum concurrent listing requests.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub robots_timeout: Duration,
    pub respect_robots: bool,
    pub limiter: RateLimiterConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            base_url: fetch.base_url.trim_end_matches('/').to_string(),
            user_agent: fetch.user_agent.clone(),
            concurrency: fetch.concurrency.max(1) as usize,
            retry: RetryPolicy::new(
                fetch.max_attempts,
                Duration::from_millis(fetch.backoff_base_ms),
            ),
            timeout: Duration::from_secs(fetch.timeout_secs),
            robots_timeout: Duration::from_secs(fetch.robots_timeout_secs),
            respect_robots: fetch.respect_robots,
            limiter: RateLimiterConfig {
                initial_rate: fetch.initial_rate,
                min_interval: Duration::from_millis(fetch.min_interval_ms),
                max_interval: Duration::from_millis(fetch.max_interval_ms),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.trendscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TrendScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.trendscout/trendscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TrendScoutError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        TrendScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TrendScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TrendScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TrendScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a provider's API key from its env var.
///
/// Missing, empty and placeholder keys are rejected so the provider can be
/// excluded from the failover chain up front.
pub fn resolve_api_key(name: &str, provider: &ProviderConfig) -> Result<String> {
    let var_name = &provider.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if is_placeholder_key(&val) => Err(TrendScoutError::config(format!(
            "{name}: {var_name} holds a placeholder value"
        ))),
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(TrendScoutError::config(format!(
            "{name}: API key not found. Set the {var_name} environment variable."
        ))),
    }
}

fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    PLACEHOLDER_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}
