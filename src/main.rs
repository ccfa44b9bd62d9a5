//! integrity-engine - academic-integrity risk scoring from the command line
//!
//! Runs the enabled analysis modules over one submission (or a directory
//! of submissions) and renders the aggregated risk report.
//!
//! Exit codes:
//!   0 - Success (risk below threshold, or no --fail-on set)
//!   1 - Runtime error (unreadable input, bad config, registry failure, etc.)
//!   2 - Risk level at or above the --fail-on threshold

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use integrity_engine::cli::{Args, OutputFormat};
use integrity_engine::config::{Config, DEFAULT_CONFIG_FILE};
use integrity_engine::detectors::standard_modules;
use integrity_engine::engine::{
    AnalysisRequest, EventChannel, EventKind, IntegrityController, KeyValueStore, MemoryStore,
    ModuleRegistry,
};
use integrity_engine::input::{build_metadata, collect_submissions, load_metadata, Submission};
use integrity_engine::models::{AggregatedResult, Metadata, ReportMetadata, SubmissionReport};
use integrity_engine::{report, RiskAggregator};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("integrity-engine v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .integrity.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize timeouts, thresholds, weights, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr so reports and `--stream` events on stdout stay clean.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete analysis workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let registry = build_registry(&config).await?;
    apply_admin_changes(&registry, &args).await?;

    if args.list_modules {
        return list_modules(&registry, args.institution.as_deref()).await;
    }

    let submissions = collect_submissions(args.input.as_deref(), args.submission_id.as_deref())?;
    let extra_metadata = load_metadata(args.metadata.as_deref())?;

    let events = Arc::new(EventChannel::new(config.engine.event_queue_capacity));
    let controller = Arc::new(IntegrityController::new(
        registry,
        RiskAggregator::new(config.aggregator_config()),
        events,
        config.controller_config(),
    ));

    let mut reports = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let report =
            analyze_submission(&controller, &config, &args, submission, &extra_metadata).await?;
        reports.push(report);
    }

    let output = match (args.format, reports.as_slice()) {
        (OutputFormat::Json, [single]) => report::generate_json_report(single)?,
        (OutputFormat::Json, many) => report::generate_batch_json_report(many)?,
        (OutputFormat::Markdown, [single]) => report::generate_markdown_report(single),
        (OutputFormat::Markdown, many) => report::generate_batch_markdown_report(many),
    };

    match args.output {
        Some(ref path) => {
            report::write_report(&output, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !args.quiet {
                print_summary(&reports);
                println!("\n✅ Report saved to: {}", path.display());
            }
        }
        None => {
            println!("{}", output);
        }
    }

    // Check --fail-on threshold
    if let Some(fail_level) = args.fail_on {
        let reached = reports
            .iter()
            .filter(|r| fail_level.is_reached_by(r.result.risk_level))
            .count();

        if reached > 0 {
            eprintln!(
                "\n⛔ {} submission(s) at or above {:?} risk. Failing (exit code 2).",
                reached, fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Build the registry over the bundled modules and seed its defaults.
async fn build_registry(config: &Config) -> Result<Arc<ModuleRegistry>> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let registry = Arc::new(ModuleRegistry::new(store, standard_modules(config)));

    registry
        .initialize()
        .await
        .context("Failed to initialize module registry")?;
    registry.warmup_all().await;

    Ok(registry)
}

/// Apply --enable, --disable and --weights at the requested scope.
async fn apply_admin_changes(registry: &ModuleRegistry, args: &Args) -> Result<()> {
    let scope = args.institution.as_deref();

    for module_id in &args.enable {
        registry.toggle(module_id, true, scope).await?;
    }
    for module_id in &args.disable {
        registry.toggle(module_id, false, scope).await?;
    }

    let weights = args.parse_weights().map_err(anyhow::Error::msg)?;
    if let Some(weights) = weights {
        registry.set_weights(weights, scope).await?;
    }

    Ok(())
}

/// Handle --list-modules.
async fn list_modules(registry: &ModuleRegistry, institution: Option<&str>) -> Result<i32> {
    let weights = registry.get_weights(institution).await?;

    println!("📦 Installed modules:\n");
    for info in registry.list_modules() {
        let enabled = registry.is_enabled(&info.module_id, institution).await?;
        println!(
            "   {} {} v{} (weight {:.2}, default {:.2}){}",
            if enabled { "✅" } else { "⏸️ " },
            info.module_id,
            info.version,
            weights.get(&info.module_id).copied().unwrap_or(0.0),
            info.default_weight,
            if info.healthy { "" } else { " [unhealthy]" }
        );
    }

    Ok(0)
}

/// Analyze one submission, consuming its event stream while it runs.
async fn analyze_submission(
    controller: &Arc<IntegrityController>,
    config: &Config,
    args: &Args,
    submission: Submission,
    extra_metadata: &Metadata,
) -> Result<SubmissionReport> {
    let start_time = Instant::now();
    let Submission {
        submission_id,
        source,
        text,
    } = submission;

    info!(submission_id = %submission_id, source = %source, "Analyzing submission");

    let metadata = build_metadata(
        extra_metadata,
        &submission_id,
        args.user_id.as_deref(),
        args.institution.as_deref(),
    );
    let word_count = text.split_whitespace().count();

    let request = AnalysisRequest {
        submission_id: submission_id.clone(),
        text,
        metadata,
        requested_modules: args.modules.clone(),
        institution_id: args.institution.clone(),
    };

    let progress = if args.stream || args.quiet {
        None
    } else {
        let active = controller
            .registry()
            .get_active_modules(args.modules.as_deref(), args.institution.as_deref())
            .await?;
        Some(module_progress_bar(active.len() as u64, &source))
    };

    // Subscribe before starting so no event is missed.
    let mut events = std::pin::pin!(controller
        .events()
        .stream(&submission_id, config.stream_timeout()));
    let handle = controller.spawn_run(request);

    while let Some(event) = events.next().await {
        if args.stream {
            println!("{}", event.to_json_line()?);
        }
        match (&event.kind, &progress) {
            (EventKind::ModuleComplete { module_id, .. }, Some(pb)) => {
                pb.set_message(module_id.clone());
                pb.inc(1);
            }
            (EventKind::Timeout, _) => {
                warn!(submission_id = %submission_id, "No progress event within the stream timeout");
            }
            _ => {}
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let result: AggregatedResult = handle
        .await
        .context("Analysis task failed")?
        .with_context(|| format!("Analysis of {} failed", submission_id))?;

    info!(
        submission_id = %submission_id,
        score = result.integrity_score,
        risk = %result.risk_level,
        "Submission analyzed"
    );

    if result.is_empty() {
        warn!(submission_id = %submission_id, "No module produced a result");
    }

    Ok(SubmissionReport {
        metadata: ReportMetadata {
            submission_id,
            user_id: args.user_id.clone(),
            institution_id: args.institution.clone(),
            analysis_date: Utc::now(),
            source,
            word_count,
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        result,
    })
}

fn module_progress_bar(len: u64, source: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_prefix(source.to_string());
    pb
}

fn print_summary(reports: &[SubmissionReport]) {
    println!("\n📊 Analysis Summary:");
    for r in reports {
        println!(
            "   {} {} - score {:.4} ({}), {} flag(s), {:.2}s",
            r.result.risk_level.emoji(),
            r.metadata.submission_id,
            r.result.integrity_score,
            r.result.risk_level,
            r.result.flags.len(),
            r.metadata.duration_seconds
        );
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            bail!("Failed to load {}: {:#}", DEFAULT_CONFIG_FILE, e);
        }
    }
}
