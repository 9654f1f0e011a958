//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trendscout_core::{
    ListingSource, LogNotifier, Notifier, PipelineOrchestrator, ProgressReporter, ProjectReport,
    ReportEvent, RunOutcome, RunRequest, Summarizer, TrendingSource, WebhookNotifier,
};
use trendscout_crawler::{FetchClient, RateLimiter};
use trendscout_shared::{AppConfig, FetchConfig, TimeRange, init_config, load_config};
use trendscout_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// TrendScout: trending projects, summarized.
#[derive(Parser)]
#[command(
    name = "trendscout",
    version,
    about = "Track trending open-source projects and deliver AI-summarized digests.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch, filter, summarize and notify for one time-range.
    Run {
        /// Time-range: daily, weekly or monthly.
        #[arg(short, long, default_value = "daily")]
        range: TimeRange,

        /// Ignore star thresholds (first run with no history).
        #[arg(long)]
        cold_start: bool,

        /// Skip dedup and regenerate every summary.
        #[arg(long)]
        force_refresh: bool,

        /// Only list projects in this language.
        #[arg(short, long)]
        language: Option<String>,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Stream a detailed report for one listed project.
    Report {
        /// Project identity, `owner/name`.
        identity: String,

        /// Listing to look the project up in.
        #[arg(short, long, default_value = "daily")]
        range: TimeRange,

        /// Print the final report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show recent runs.
    History {
        /// Number of runs to show.
        #[arg(short = 'n', long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "trendscout=info",
        1 => "trendscout=debug",
        _ => "trendscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            range,
            cold_start,
            force_refresh,
            language,
            json,
        } => {
            let request = RunRequest {
                range,
                cold_start,
                force_refresh,
                language,
            };
            cmd_run(request, json).await
        }
        Command::Report { identity, range, json } => cmd_report(&identity, range, json).await,
        Command::History { limit } => cmd_history(limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Composition root
// ---------------------------------------------------------------------------

/// Build the listing source around one shared rate limiter.
fn build_source(config: &AppConfig) -> Result<Arc<TrendingSource>> {
    let fetch = FetchConfig::from(config);
    let limiter = Arc::new(RateLimiter::new(fetch.limiter));
    let client = FetchClient::new(&fetch, limiter)?;
    Ok(Arc::new(TrendingSource::new(client, &fetch.base_url)?))
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    match WebhookNotifier::from_env(&config.notify)? {
        Some(webhook) => Ok(Arc::new(webhook)),
        None => {
            info!(
                var = %config.notify.webhook_url_env,
                "no webhook configured, digest goes to the log"
            );
            Ok(Arc::new(LogNotifier))
        }
    }
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = config.storage.resolved_path()?;
    info!(path = %path.display(), "opening database");
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            token.cancel();
        }
    });
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(request: RunRequest, json: bool) -> Result<()> {
    let config = load_config()?;
    let range = request.range;

    let storage = open_storage(&config).await?;
    let summarizer = Summarizer::from_config(&config.ai);
    if summarizer.providers().is_empty() {
        warn!("no AI providers available, summaries will fall back to descriptions");
    }

    let pipeline = PipelineOrchestrator::new(
        build_source(&config)?,
        storage.clone(),
        Arc::new(summarizer),
        build_notifier(&config)?,
        &config,
    )
    .with_progress(Arc::new(CliProgress::new()));

    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);

    let started_at = Utc::now();
    let outcome = Arc::new(pipeline).run_isolated(request, token).await;

    let stats = RunOutcome {
        items: Vec::new(),
        ..outcome.clone()
    };
    match storage
        .record_run(range, started_at, outcome.success, &serde_json::to_string(&stats)?)
        .await
    {
        Ok(id) => info!(run_id = %id, "run recorded"),
        Err(e) => warn!(error = %e, "failed to record run"),
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    match outcome.error {
        Some(error) if !outcome.success => Err(eyre!("run failed: {error}")),
        _ => Ok(()),
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!();
    if outcome.success {
        println!("  Run complete ({})", outcome.range);
    } else {
        println!("  Run failed ({})", outcome.range);
    }
    println!("  Found:       {}", outcome.found);
    println!("  New:         {}", outcome.after_dedup);
    println!("  Qualified:   {}", outcome.after_filter);
    println!("  Matched:     {}", outcome.after_keywords);
    println!("  Summarized:  {} ({} fallback)", outcome.summarized, outcome.fallbacks);
    println!("  Cache hits:  {}", outcome.cache_hits);
    println!("  Notified:    {}", if outcome.notified { "yes" } else { "no" });
    if let Some(error) = &outcome.error {
        println!("  Error:       {error}");
    }
    println!("  Time:        {:.1}s", outcome.duration.as_secs_f64());

    for item in &outcome.items {
        println!();
        println!("  {} ({} stars)", item.candidate.identity, item.candidate.stars);
        if let Some(summary) = &item.summary {
            println!("    {}", summary.text);
        }
    }
    println!();
}

async fn cmd_report(identity: &str, range: TimeRange, json: bool) -> Result<()> {
    let config = load_config()?;
    let source = build_source(&config)?;
    let summarizer = Summarizer::from_config(&config.ai);

    let progress = CliProgress::new();
    progress.phase("Fetching listing");
    let candidates = source.fetch_candidates(range, None).await?;
    let Some(candidate) = candidates
        .into_iter()
        .find(|c| c.identity.eq_ignore_ascii_case(identity))
    else {
        progress.spinner.finish_and_clear();
        return Err(eyre!("'{identity}' is not on the {range} listing"));
    };

    let (tx, mut rx) = mpsc::channel(64);
    let consume = async {
        let mut received = 0usize;
        let mut last = None;
        while let Some(event) = rx.recv().await {
            match event {
                ReportEvent::Thinking { stage } => progress.phase(&stage),
                ReportEvent::Partial { content } => {
                    received += content.len();
                    progress.phase(&format!("Receiving report ({received} chars)"));
                }
                done @ (ReportEvent::Complete { .. } | ReportEvent::Error { .. }) => last = Some(done),
            }
        }
        last
    };
    let ((), last) = tokio::join!(summarizer.stream_report(&candidate, tx), consume);
    progress.spinner.finish_and_clear();

    match last {
        Some(ReportEvent::Complete { report, model }) => {
            if json {
                let body = serde_json::json!({
                    "identity": candidate.identity,
                    "model": model,
                    "report": report,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_report(&candidate.identity, &model, &report);
            }
            Ok(())
        }
        Some(ReportEvent::Error { message }) => Err(eyre!("report failed: {message}")),
        _ => Err(eyre!("report stream ended unexpectedly")),
    }
}

fn print_report(identity: &str, model: &str, report: &ProjectReport) {
    println!();
    println!("  {identity}  (model: {model})");
    println!();
    println!("  {}", report.executive_summary);
    println!();

    let scores = &report.scores;
    for (label, dim) in [
        ("Architecture", &scores.architecture),
        ("Code quality", &scores.code_quality),
        ("Documentation", &scores.documentation),
        ("Community", &scores.community),
        ("Innovation", &scores.innovation),
    ] {
        println!("  {label:<14} {:>4.1}  {}", dim.score, dim.reason);
    }

    for (heading, items) in [
        ("Key features", &report.key_features),
        ("Tech stack", &report.tech_stack),
        ("Use cases", &report.use_cases),
        ("Limitations", &report.limitations),
        ("Learning resources", &report.learning_resources),
    ] {
        if items.is_empty() {
            continue;
        }
        println!();
        println!("  {heading}:");
        for item in items {
            println!("    - {item}");
        }
    }

    if !report.faq.is_empty() {
        println!();
        println!("  FAQ:");
        for entry in &report.faq {
            println!("    Q: {}", entry.question);
            println!("    A: {}", entry.answer);
        }
    }
    println!();
}

async fn cmd_history(limit: u32) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let runs = storage.recent_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!();
    for run in runs {
        let stats: serde_json::Value = serde_json::from_str(&run.stats_json).unwrap_or_default();
        let count = |key: &str| stats.get(key).and_then(serde_json::Value::as_u64).unwrap_or(0);
        println!(
            "  {}  {:<8} {:<4} found {:>3}  summarized {:>3}  cache hits {:>3}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.range,
            if run.success { "ok" } else { "FAIL" },
            count("found"),
            count("summarized"),
            count("cache_hits"),
        );
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_done(&self, stage: &str, remaining: usize) {
        self.spinner.set_message(format!("{stage}: {remaining} remaining"));
    }

    fn done(&self, _outcome: &RunOutcome) {
        self.spinner.finish_and_clear();
    }
}
