//! grantlens - NSF grant termination dashboards
//!
//! A CLI tool that cleans the terminated-grant export, counts flagged
//! language in titles and abstracts, joins the Cruz list and writes the
//! dashboard aggregates as a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unreadable source, bad config, write failure, etc.)

mod analysis;
mod cache;
mod cleaner;
mod cli;
mod config;
mod counter;
mod error;
mod loader;
mod merger;
mod models;
mod pipeline;
mod report;

use anyhow::{Context, Result};
use cache::{CacheKey, DashboardCache};
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use error::PipelineError;
use indicatif::{ProgressBar, ProgressStyle};
use models::{Dashboard, MergeStatus};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
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

    info!("grantlens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args) {
        error!("Dashboard build failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);

        let stopped_pipeline = e
            .chain()
            .filter_map(|cause| cause.downcast_ref::<PipelineError>())
            .any(PipelineError::is_fatal);
        if stopped_pipeline {
            eprintln!(
                "   Check the [sources] paths in {} or pass --grants, --cruz-list and --lexicon.",
                DEFAULT_CONFIG_FILE
            );
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .grantlens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

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
    println!("   Edit it to set source paths, the dashboard variant, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
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

/// Spinner for the pipeline stages, hidden in quiet mode.
fn stage_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Load sources, build or fetch the dashboard, and write the report.
fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    let settings = config.pipeline_settings();

    let spinner = stage_spinner(args.quiet);

    // Step 1: Load the three sources
    spinner.set_message("Loading sources...");
    let sources = loader::load_sources(&config.sources.paths())
        .context("Failed to load input sources")?;

    // Step 2: Reuse a cached dashboard or compute a fresh one
    let cache = config
        .cache
        .enabled
        .then(|| DashboardCache::new(config.cache.dir.clone()));
    if let Some(ref cache) = cache {
        debug!("Cache directory: {}", cache.dir().display());
    }
    let key = CacheKey::new(&sources, &settings)?;

    let cached = cache.as_ref().and_then(|c| c.load(&key));
    let from_cache = cached.is_some();
    let mut dashboard = match cached {
        Some(dashboard) => {
            info!("Using cached {} dashboard", settings.variant);
            dashboard
        }
        None => {
            spinner.set_message(format!("Building {} dashboard...", settings.variant));
            pipeline::run_pipeline(&sources, &settings)?
        }
    };
    dashboard.metadata.cache_key = Some(key.to_string());

    if let (Some(cache), false) = (&cache, from_cache) {
        if let Err(e) = cache.store(&key, &dashboard) {
            warn!("Could not cache dashboard: {:#}", e);
        }
        if let Err(e) = cache.prune(config.cache.max_entries) {
            warn!("Could not prune cache: {:#}", e);
        }
    }

    // Step 3: Render and save the report
    spinner.set_message("Writing report...");
    let output = match config.report.format {
        OutputFormat::Json => report::generate_json_report(&dashboard, &config.report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&dashboard, &config.report),
    };

    let output_path = &config.report.output;
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;
    spinner.finish_and_clear();

    if !args.quiet {
        print_summary(&dashboard, from_cache, start_time.elapsed());
        println!(
            "\n✅ Dashboard complete! Report saved to: {}",
            output_path.display()
        );
    }

    Ok(())
}

/// Print the console summary.
fn print_summary(dashboard: &Dashboard, from_cache: bool, elapsed: Duration) {
    let metadata = &dashboard.metadata;

    println!("\n📊 Dashboard Summary ({}):", metadata.variant);
    println!("   Grant records: {}", metadata.total_records);
    println!("   Cancelled grants: {}", metadata.terminated_records);
    println!("   Flagged terms: {}", metadata.lexicon_terms);

    if let Some(ref states) = dashboard.by_state {
        if let Some(top) = states.first() {
            println!(
                "   Most affected state: {} ({} grants)",
                top.state, top.cancelled_grants
            );
        }
    }
    if let Some(ref budget) = dashboard.by_institution_budget {
        println!(
            "   Budget impact: {} across {} institutions",
            report::format_money(budget.total_budget_impact),
            budget.institutions.len()
        );
    }
    if let Some(ref words) = dashboard.flagged_words {
        if let Some(term) = words.top_terms.first() {
            println!(
                "   Most frequent flagged term: \"{}\" ({} times)",
                term.word, term.occurrences
            );
        }
    }

    match dashboard.merge.status {
        MergeStatus::Joined => println!(
            "   Cruz list: {} grants matched",
            dashboard.merge.members
        ),
        _ => println!("   ⚠️  Cruz list could not be joined; membership set to false"),
    }

    let failures = dashboard.cleaning.total_failures();
    if failures > 0 {
        println!("   ⚠️  {} values could not be parsed", failures);
    }

    if from_cache {
        println!("   Source: cache");
    }
    println!("   Duration: {:.1}s", elapsed.as_secs_f64());
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
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
